//! Filesystem mailbox bridging proxies to the primary.
//!
//! Replaces a socket transport with a shared directory pair, so any process
//! on the host can reach the primary without knowing where it listens.
//!
//! # Architecture
//!
//! - **Store**: `requests/` + `responses/` primitives, atomic publish
//! - **Client**: [`RequestBridge`], used by proxies to submit and collect
//! - **Server**: [`RequestProcessor`], run by the primary to reconcile and serve
//! - **Protocol**: Record types shared by both sides
//! - **Watcher**: Optional filesystem notification to cut polling latency

pub mod client;
pub mod protocol;
pub mod server;
pub mod store;
pub mod watcher;

pub use client::RequestBridge;
pub use protocol::{Operation, RequestId, RequestRecord, ResponseRecord};
pub use server::{ProcessorHandle, ReconcileReport, RequestDispatch, RequestProcessor};
pub use store::MailboxStore;
