//! On-disk record persistence shared by the mailbox, lease and state files.

pub mod atomic;

pub use atomic::{
    atomic_read_json, atomic_replace_bytes, atomic_replace_json, atomic_write_bytes,
    atomic_write_json, is_temp_file, remove_if_exists, temp_path_for,
};
