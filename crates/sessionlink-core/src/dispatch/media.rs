//! Persisting downloaded media under the media directory.

use crate::config::DispatchConfig;
use crate::persist::atomic_write_bytes;
use crate::session::{MediaKind, MediaPayload};
use crate::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a downloaded payload was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedMedia {
    pub message_id: String,
    pub path: PathBuf,
    pub mimetype: String,
    pub size: u64,
}

/// Longest extension taken from a sender-supplied file name.
const MAX_FILENAME_EXTENSION_LEN: usize = 8;

/// Hex digits of the id hash appended to rewritten stems.
const STEM_HASH_LEN: usize = 8;

/// File extension for a payload.
///
/// Order: the MIME type, the extension of the sender's file name, the media
/// kind, then `bin`.
pub fn extension_for(mimetype: &str, filename: Option<&str>, kind: Option<MediaKind>) -> String {
    let essence = mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let from_mime = match essence.as_str() {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/heic" => Some("heic"),
        "video/mp4" => Some("mp4"),
        "video/3gpp" => Some("3gp"),
        "video/quicktime" => Some("mov"),
        "audio/ogg" | "audio/opus" => Some("ogg"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "application/pdf" => Some("pdf"),
        "application/zip" => Some("zip"),
        "application/msword" => Some("doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => Some("docx"),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some("xlsx"),
        "text/plain" => Some("txt"),
        "text/csv" => Some("csv"),
        _ => None,
    };

    if let Some(ext) = from_mime {
        return ext.to_string();
    }
    if let Some(ext) = filename.and_then(filename_extension) {
        return ext;
    }
    kind.map(|k| k.default_extension())
        .unwrap_or(DispatchConfig::FALLBACK_MEDIA_EXTENSION)
        .to_string()
}

/// Lowercased extension of `filename`, if it is short and alphanumeric.
fn filename_extension(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    let usable = !stem.is_empty()
        && !ext.is_empty()
        && ext.len() <= MAX_FILENAME_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    usable.then(|| ext.to_ascii_lowercase())
}

/// File stem for a message id.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`. When that rewrites the id,
/// a short hash of the raw id is appended so distinct ids keep distinct files.
pub fn media_file_stem(message_id: &str) -> String {
    let stem: String = message_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    if stem.is_empty() {
        return "media".to_string();
    }
    if stem == message_id {
        return stem;
    }

    let digest = hex::encode(Sha256::digest(message_id.as_bytes()));
    format!("{}-{}", stem, &digest[..STEM_HASH_LEN])
}

/// Write a payload to `<media_dir>/<stem>.<ext>` atomically.
pub fn persist_media(
    media_dir: &Path,
    message_id: &str,
    payload: &MediaPayload,
    kind: Option<MediaKind>,
) -> Result<SavedMedia> {
    let file_name = format!(
        "{}.{}",
        media_file_stem(message_id),
        extension_for(&payload.mimetype, payload.filename.as_deref(), kind)
    );
    let path = media_dir.join(file_name);
    atomic_write_bytes(&path, &payload.data)?;
    debug!("Saved {} bytes of media to {}", payload.data.len(), path.display());

    Ok(SavedMedia {
        message_id: message_id.to_string(),
        path,
        mimetype: payload.mimetype.clone(),
        size: payload.data.len() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extension_ignores_mime_parameters() {
        assert_eq!(extension_for("audio/ogg; codecs=opus", None, None), "ogg");
        assert_eq!(extension_for(" IMAGE/JPEG ", None, None), "jpg");
    }

    #[test]
    fn test_extension_fallbacks() {
        assert_eq!(extension_for("application/x-unknown", None, Some(MediaKind::Sticker)), "webp");
        assert_eq!(extension_for("", None, Some(MediaKind::Voice)), "ogg");
        assert_eq!(extension_for("application/x-unknown", None, None), "bin");
    }

    #[test]
    fn test_extension_from_sender_filename() {
        let unknown = "application/octet-stream";
        assert_eq!(
            extension_for(unknown, Some("Quarterly Report.KEY"), Some(MediaKind::Document)),
            "key"
        );
        // MIME still wins when it is known
        assert_eq!(extension_for("application/pdf", Some("scan.jpeg"), None), "pdf");
        // Unusable names fall through to the media kind
        assert_eq!(extension_for(unknown, Some(".bashrc"), Some(MediaKind::Document)), "pdf");
        assert_eq!(extension_for(unknown, Some("notes.tar/../x"), None), "bin");
        assert_eq!(extension_for(unknown, Some("noextension"), None), "bin");
    }

    #[test]
    fn test_file_stem_cannot_escape_media_dir() {
        let stem = media_file_stem("../../etc/passwd");
        assert!(stem.starts_with("______etc_passwd-"));
        assert!(!stem.contains('/') && !stem.contains('.'));
        assert_eq!(media_file_stem(""), "media");
    }

    #[test]
    fn test_clean_ids_are_kept_verbatim() {
        assert_eq!(media_file_stem("3EB0C431C2F1_A-9"), "3EB0C431C2F1_A-9");
    }

    #[test]
    fn test_ids_that_sanitize_alike_keep_separate_files() {
        let dir = TempDir::new().unwrap();
        let payload = |byte: u8| MediaPayload {
            mimetype: "image/png".to_string(),
            data: vec![byte],
            filename: None,
        };

        let dotted = persist_media(dir.path(), "a.b", &payload(1), None).unwrap();
        let underscored = persist_media(dir.path(), "a_b", &payload(2), None).unwrap();

        assert_ne!(dotted.path, underscored.path);
        assert_eq!(underscored.path, dir.path().join("a_b.png"));
        assert_eq!(std::fs::read(&dotted.path).unwrap(), vec![1]);
        assert_eq!(std::fs::read(&underscored.path).unwrap(), vec![2]);
        // Same id, same file
        assert_eq!(media_file_stem("a.b"), media_file_stem("a.b"));
    }

    #[test]
    fn test_persist_media_uses_sender_filename_extension() {
        let dir = TempDir::new().unwrap();
        let payload = MediaPayload {
            mimetype: "application/octet-stream".to_string(),
            data: vec![7],
            filename: Some("slides.odp".to_string()),
        };

        let saved = persist_media(dir.path(), "m2", &payload, Some(MediaKind::Document)).unwrap();
        assert_eq!(saved.path, dir.path().join("m2.odp"));
    }

    #[test]
    fn test_persist_media_writes_file() {
        let dir = TempDir::new().unwrap();
        let media_dir = dir.path().join("media");
        let payload = MediaPayload {
            mimetype: "image/png".to_string(),
            data: vec![1, 2, 3, 4],
            filename: None,
        };

        let saved = persist_media(&media_dir, "m1", &payload, None).unwrap();
        assert_eq!(saved.path, media_dir.join("m1.png"));
        assert_eq!(saved.size, 4);
        assert_eq!(std::fs::read(&saved.path).unwrap(), vec![1, 2, 3, 4]);
    }
}
