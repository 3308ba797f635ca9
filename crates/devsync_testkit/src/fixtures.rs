//! Test fixtures for a simulated device.
//!
//! Provides an engine wired to in-memory collaborators, with handles kept so
//! tests can script the backend, the network, and time.

use devsync_engine::{
    EngineConfig, ManualClock, MockBackend, MockNetwork, SyncEngine, SyncOutcome,
};
use std::sync::Arc;
use std::time::Duration;

/// Engine type used by [`TestDevice`].
pub type TestEngine = SyncEngine<Arc<MockBackend>, Arc<MockNetwork>, Arc<ManualClock>>;

/// Monotonic time a [`TestDevice`] starts at.
pub const BOOT_MS: u64 = 1_000;

/// Configuration with no settle delay and a short drain cap, so tests that
/// rebind do not sleep.
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_settle_delay(Duration::ZERO)
        .with_drain_timeout(Duration::from_millis(50))
}

/// An engine plus the mocks behind it.
pub struct TestDevice {
    /// The engine under test.
    pub engine: Arc<TestEngine>,
    /// Scripted backend.
    pub backend: Arc<MockBackend>,
    /// Scripted network.
    pub network: Arc<MockNetwork>,
    /// Hand-driven clock, starting at [`BOOT_MS`] with no wall clock.
    pub clock: Arc<ManualClock>,
}

impl TestDevice {
    /// Creates a device with [`fast_config`].
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a device with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let backend = Arc::new(MockBackend::new());
        let network = Arc::new(MockNetwork::new());
        let clock = Arc::new(ManualClock::new(BOOT_MS));
        let engine = Arc::new(SyncEngine::new(
            config,
            Arc::clone(&backend),
            Arc::clone(&network),
            Arc::clone(&clock),
        ));
        Self {
            engine,
            backend,
            network,
            clock,
        }
    }

    /// Retrieves one command and returns its `"key:value"` line.
    pub fn next_command(&self) -> Option<String> {
        self.engine.retrieve_command().command.map(|c| c.line())
    }

    /// Retrieves until a call yields no command, returning the lines seen.
    ///
    /// Stops early on anything but success, so a dirty engine does not spin.
    pub fn drain_commands(&self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let retrieval = self.engine.retrieve_command();
            match (retrieval.outcome, retrieval.command) {
                (SyncOutcome::Succeeded, Some(command)) => lines.push(command.line()),
                _ => return lines,
            }
        }
    }

    /// Publishes until the buffer is empty or `attempts` calls have been made.
    /// Returns the last outcome.
    pub fn flush_logs(&self, attempts: usize) -> SyncOutcome {
        let mut outcome = SyncOutcome::Succeeded;
        for _ in 0..attempts {
            outcome = self.engine.publish_logs();
            if outcome.is_success() && self.engine.log_buffer().is_empty() {
                break;
            }
        }
        outcome
    }

    /// Every message either written to the backend or still buffered, sorted.
    pub fn accounted_messages(&self) -> Vec<String> {
        let buffer = self.engine.log_buffer();
        let buffered = buffer.take_logs();
        let mut messages: Vec<String> = self.backend.written().into_values().collect();
        messages.extend(buffered.values().cloned());
        buffer.add_logs(buffered);
        messages.sort();
        messages
    }
}

impl Default for TestDevice {
    fn default() -> Self {
        Self::new()
    }
}
