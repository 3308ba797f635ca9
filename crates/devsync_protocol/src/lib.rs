//! # devsync Protocol
//!
//! Remote conventions shared by the devsync engine and any backend that
//! talks to it.
//!
//! This crate provides:
//! - `Command` and the decoder for command payloads (flat JSON objects)
//! - Remote path conventions (`commands`, `logs/<key>`)
//! - `LogKeyTranslator` for turning device-monotonic timestamps into
//!   sortable, backend-safe log keys
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod error;
mod log_key;
mod paths;

pub use command::{decode_commands, Command};
pub use error::{ProtocolError, ProtocolResult};
pub use log_key::{render_wall_clock_key, LogKeyTranslator};
pub use paths::{is_key_safe, log_record_path, COMMANDS_PATH, LOGS_PATH};
