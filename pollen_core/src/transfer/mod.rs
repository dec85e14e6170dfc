//! Chunked file transfer over a single connection.
//!
//! This module provides:
//! - File sources (in memory or on disk)
//! - The outbound state machine (`meta` -> `chunk`* -> `end`)
//! - The inbound state machine that reassembles payloads
//! - Helpers for progress reporting and saving received files

pub mod receiver;
pub mod sender;
pub mod source;
pub mod utils;

pub use receiver::FileReceiver;
pub use sender::{FileSender, SendOutcome, stream_file};
pub use utils::save_received_file;
