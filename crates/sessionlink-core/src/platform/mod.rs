//! Platform abstraction layer.
//!
//! All `#[cfg]` blocks for OS-specific behavior live here rather than being
//! scattered through the coordination code.
//!
//! - `process` - Process liveness probes used by the lease manager

pub mod process;

pub use process::{current_pid, is_process_alive};
