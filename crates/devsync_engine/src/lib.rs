//! # Device Sync Engine
//!
//! Fault-isolating coordinator between a device and a remote key-value
//! backend over an intermittent network.
//!
//! This crate provides:
//! - Command retrieval from a streamed remote inbox, decoded into a FIFO
//! - Bounded log buffering with batch publication under wall-clock keys
//! - A single connection kept consistent with the current network identity
//! - Failure latching: after a remote failure the engine stops issuing
//!   remote calls until a reset succeeds
//! - A tracing layer that captures the device's own events for publication
//!
//! ## Architecture
//!
//! Two entry points, [`SyncEngine::retrieve_command`] and
//! [`SyncEngine::publish_logs`], may be called from independent threads.
//! Remote work is serialized by an in-progress flag; a caller that loses the
//! race gets [`SyncOutcome::AnotherOperationInProgress`] instead of waiting.
//!
//! ## Key Invariants
//!
//! - At most one remote call is in flight at any time
//! - While dirty, no remote call is made except by a reset
//! - Queued commands are served before anything touches the network
//! - Log records are lost only through capacity eviction
//! - The connection is rebound exactly once per network identity change

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod connection;
mod error;
mod flags;
mod layer;
mod log_buffer;
mod network;
mod queue;
mod state;
mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, LogCapacity};
pub use connection::{ConnectionController, ConnectionState};
pub use devsync_protocol::Command;
pub use error::{RemoteOperation, SyncError, SyncOutcome, SyncResult};
pub use flags::{Activity, EngineStatus, Health};
pub use layer::LogBufferLayer;
pub use log_buffer::{LogBuffer, LogRecords};
pub use network::{MockNetwork, NetworkIdentity, NetworkStatusProvider};
pub use queue::RequestQueue;
pub use state::{Retrieval, SyncEngine, SyncStats};
pub use transport::{MockBackend, MockBackendStats, RemoteBackendClient};
