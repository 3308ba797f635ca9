//! # Device Sync Testkit
//!
//! Test utilities for the device sync engine.
//!
//! This crate provides:
//! - A simulated device: an engine wired to in-memory collaborators
//! - Property-based test generators using proptest
//! - Fuzz harnesses for payload decoding and engine call sequences
//! - Concurrent stress harnesses
//!
//! ## Usage
//!
//! ```rust
//! use devsync_testkit::prelude::*;
//!
//! let device = TestDevice::new();
//! device.backend.push_payload(r#"{"relay":"on"}"#);
//! assert_eq!(device.next_command().as_deref(), Some("relay:on"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod fuzz;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
pub use stress::*;
