//! Sync engine coordinator.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::connection::{ConnectionController, ConnectionState};
use crate::error::{SyncError, SyncOutcome, SyncResult};
use crate::flags::{BusyGuard, EngineFlags, EngineStatus};
use crate::log_buffer::{LogBuffer, LogRecords};
use crate::network::NetworkStatusProvider;
use crate::queue::RequestQueue;
use crate::transport::RemoteBackendClient;
use devsync_protocol::{decode_commands, log_record_path, Command, LogKeyTranslator};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Commands handed to callers.
    pub commands_retrieved: u64,
    /// Stream reads that returned (with or without payload).
    pub stream_reads: u64,
    /// Log records written to the backend.
    pub records_published: u64,
    /// Log records handed back to the buffer after a failed publish.
    pub records_rebuffered: u64,
    /// Reset attempts made while dirty.
    pub resets: u64,
    /// Housekeeping deletes that succeeded.
    pub housekeeping_runs: u64,
    /// Last time an entry point succeeded with remote work.
    pub last_success: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of [`SyncEngine::retrieve_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieval {
    /// The next command, if one was available.
    pub command: Option<Command>,
    /// How the call went.
    pub outcome: SyncOutcome,
}

impl Retrieval {
    fn succeeded(command: Option<Command>) -> Self {
        Self {
            command,
            outcome: SyncOutcome::Succeeded,
        }
    }

    fn failed(outcome: SyncOutcome) -> Self {
        Self {
            command: None,
            outcome,
        }
    }
}

/// Coordinates command retrieval and log publication over one connection.
///
/// # Invariants
///
/// - At most one remote call is in flight: every remote step runs while the
///   in-progress flag is held, and the flag is released on every exit path
/// - Once a remote failure latches the dirty flag, neither entry point does
///   remote work until a reset rebinds the connection
/// - Queued commands are served before anything touches the network
/// - Log records taken for publication are either written or handed back
pub struct SyncEngine<B, N, C> {
    config: EngineConfig,
    connection: ConnectionController<B, N>,
    clock: C,
    flags: EngineFlags,
    queue: RequestQueue,
    logs: Arc<LogBuffer>,
    translator: LogKeyTranslator,
    last_housekeeping_ms: AtomicU64,
    stats: RwLock<SyncStats>,
}

impl<B, N, C> SyncEngine<B, N, C>
where
    B: RemoteBackendClient,
    N: NetworkStatusProvider,
    C: Clock,
{
    /// Creates a new sync engine with an empty log buffer.
    pub fn new(config: EngineConfig, backend: B, network: N, clock: C) -> Self {
        let connection = ConnectionController::new(
            backend,
            network,
            config.command_path.clone(),
            config.drain_timeout,
            config.settle_delay,
        );
        let logs = Arc::new(LogBuffer::new(config.log_capacity));
        Self {
            config,
            connection,
            clock,
            flags: EngineFlags::default(),
            queue: RequestQueue::new(),
            logs,
            translator: LogKeyTranslator::new(),
            last_housekeeping_ms: AtomicU64::new(0),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Uses an existing log buffer, e.g. one already fed by a
    /// [`LogBufferLayer`](crate::LogBufferLayer).
    pub fn with_log_buffer(mut self, logs: Arc<LogBuffer>) -> Self {
        self.logs = logs;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the dirty/in-progress state.
    pub fn status(&self) -> EngineStatus {
        self.flags.status()
    }

    /// Returns the connection binding state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Number of connection rebinds performed so far.
    pub fn rebind_count(&self) -> u64 {
        self.connection.rebind_count()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the shared log buffer.
    pub fn log_buffer(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Buffers a log line stamped with the current device time.
    pub fn record_log(&self, message: impl Into<String>) -> u64 {
        self.logs.append(self.clock.monotonic_ms(), message)
    }

    /// Number of decoded commands waiting to be handed out.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Returns the next command.
    ///
    /// A queued command is returned without touching the network or the
    /// flags. Otherwise one stream read is performed; "no command" is a
    /// success. While dirty the call attempts a reset instead and reports
    /// [`SyncOutcome::NotReady`].
    pub fn retrieve_command(&self) -> Retrieval {
        if let Some(command) = self.queue.try_pop() {
            self.stats.write().commands_retrieved += 1;
            return Retrieval::succeeded(Some(command));
        }

        match self.retrieve_remote() {
            Ok(command) => {
                let mut stats = self.stats.write();
                if command.is_some() {
                    stats.commands_retrieved += 1;
                }
                stats.last_success = Some(Instant::now());
                Retrieval::succeeded(command)
            }
            Err(e) => {
                self.note_failure("retrieve", &e);
                Retrieval::failed(e.outcome())
            }
        }
    }

    /// Publishes every buffered log record.
    ///
    /// Records that cannot be written, or that were taken while the engine
    /// could not publish, go back into the buffer. Returns
    /// [`SyncOutcome::Succeeded`] only if every record was written.
    pub fn publish_logs(&self) -> SyncOutcome {
        let mut pending = self.logs.take_logs();
        if pending.is_empty() {
            return SyncOutcome::Succeeded;
        }
        let total = pending.len();

        let result = self.publish_remote(&mut pending);

        let published = (total - pending.len()) as u64;
        let rebuffered = pending.len() as u64;
        if !pending.is_empty() {
            self.logs.add_logs(pending);
        }
        {
            let mut stats = self.stats.write();
            stats.records_published += published;
            stats.records_rebuffered += rebuffered;
            if result.is_ok() {
                stats.last_success = Some(Instant::now());
            }
        }

        match result {
            Ok(()) => SyncOutcome::Succeeded,
            Err(e) => {
                self.note_failure("publish", &e);
                e.outcome()
            }
        }
    }

    fn retrieve_remote(&self) -> SyncResult<Option<Command>> {
        let _busy = self.acquire()?;
        let result = self.read_commands();
        self.latch_on_failure(&result);
        result
    }

    fn publish_remote(&self, pending: &mut LogRecords) -> SyncResult<()> {
        let _busy = self.acquire()?;
        let result = self.write_logs(pending);
        self.latch_on_failure(&result);
        result
    }

    /// Takes the in-progress flag for remote work.
    ///
    /// While dirty, the flag is used for a reset instead and the caller gets
    /// [`SyncError::Suspended`].
    fn acquire(&self) -> SyncResult<BusyGuard<'_>> {
        let busy = self.flags.try_acquire()?;
        if self.flags.is_dirty() {
            self.reset();
            return Err(SyncError::Suspended);
        }
        Ok(busy)
    }

    // Must run while the in-progress flag is held.
    fn latch_on_failure<T>(&self, result: &SyncResult<T>) {
        if let Err(e) = result {
            if e.marks_dirty() {
                self.flags.mark_dirty();
            }
        }
    }

    fn reset(&self) {
        self.stats.write().resets += 1;
        if !self.connection.network_available() {
            debug!("reset deferred, no network path");
            self.connection.unbind();
            return;
        }
        match self.connection.rebind() {
            Ok(()) => {
                self.flags.clear_dirty();
                info!("connection reset, remote operations resumed");
            }
            Err(e) => warn!(error = %e, "connection reset failed, staying suspended"),
        }
    }

    fn read_commands(&self) -> SyncResult<Option<Command>> {
        if !self.connection.ensure_matches_network() {
            return Err(SyncError::Unavailable);
        }
        self.connection.ensure_bound()?;
        self.connection.ensure_stream()?;

        let payload = self.connection.read_stream()?;
        self.stats.write().stream_reads += 1;

        let Some(payload) = payload else {
            self.run_housekeeping_if_due();
            return Ok(None);
        };

        let decoded = decode_commands(&payload);
        self.run_housekeeping_if_due();
        let commands = decoded?;
        debug!(count = commands.len(), "decoded commands from stream");
        self.queue.push_all(commands);
        Ok(self.queue.try_pop())
    }

    fn write_logs(&self, pending: &mut LogRecords) -> SyncResult<()> {
        if !self.connection.ensure_matches_network() {
            return Err(SyncError::Unavailable);
        }
        self.connection.ensure_bound()?;

        self.translator
            .calibrate(self.clock.monotonic_ms(), self.clock.wall_clock_secs());

        let total = pending.len();
        let backend = self.connection.backend();
        pending.retain(|&key, message| {
            let path = log_record_path(&self.config.log_path, &self.translator.translate(key));
            match backend.write_string(&path, message.as_str()) {
                Ok(()) => false,
                Err(e) => {
                    warn!(key, %path, error = %e, "log record not published");
                    true
                }
            }
        });

        if pending.is_empty() {
            debug!(count = total, "published log records");
            Ok(())
        } else {
            Err(SyncError::PartialPublish {
                failed: pending.len(),
                total,
            })
        }
    }

    /// Deletes consumed command data, at most once per housekeeping interval.
    fn run_housekeeping_if_due(&self) {
        let now = self.clock.monotonic_ms();
        let last = self.last_housekeeping_ms.load(Ordering::Acquire);
        let interval =
            u64::try_from(self.config.housekeeping_interval.as_millis()).unwrap_or(u64::MAX);
        if now.saturating_sub(last) < interval {
            return;
        }

        match self
            .connection
            .backend()
            .delete_node(&self.config.command_path)
        {
            Ok(()) => {
                self.last_housekeeping_ms.store(now, Ordering::Release);
                self.stats.write().housekeeping_runs += 1;
                debug!(path = %self.config.command_path, "housekeeping delete done");
            }
            Err(e) => {
                warn!(error = %e, "housekeeping delete failed");
                self.flags.mark_dirty();
            }
        }
    }

    fn note_failure(&self, operation: &'static str, error: &SyncError) {
        if error.is_expected() {
            debug!(operation, error = %error, "remote operation skipped");
            return;
        }
        warn!(operation, error = %error, "remote operation failed");
        self.stats.write().last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flags::Health;
    use crate::network::MockNetwork;
    use crate::transport::MockBackend;
    use std::time::Duration;

    type TestEngine = SyncEngine<Arc<MockBackend>, Arc<MockNetwork>, Arc<ManualClock>>;

    struct Fixture {
        engine: TestEngine,
        backend: Arc<MockBackend>,
        network: Arc<MockNetwork>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let config = EngineConfig::new()
            .with_settle_delay(Duration::ZERO)
            .with_drain_timeout(Duration::from_millis(50));
        let backend = Arc::new(MockBackend::new());
        let network = Arc::new(MockNetwork::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = SyncEngine::new(
            config,
            Arc::clone(&backend),
            Arc::clone(&network),
            Arc::clone(&clock),
        );
        Fixture {
            engine,
            backend,
            network,
            clock,
        }
    }

    fn line(retrieval: &Retrieval) -> Option<String> {
        retrieval.command.as_ref().map(Command::line)
    }

    #[test]
    fn sync_engine_initial_state() {
        let f = fixture();
        assert_eq!(f.engine.status().health, Health::Ready);
        assert!(!f.engine.status().is_busy());
        assert_eq!(f.engine.connection_state(), ConnectionState::Unbound);
        assert_eq!(f.engine.stats().commands_retrieved, 0);
    }

    #[test]
    fn empty_read_is_success() {
        let f = fixture();
        let retrieval = f.engine.retrieve_command();
        assert_eq!(retrieval, Retrieval::succeeded(None));
        assert_eq!(f.engine.connection_state(), ConnectionState::Bound);
        assert_eq!(f.backend.stats().reads, 1);
    }

    #[test]
    fn payload_is_served_one_command_per_call() {
        let f = fixture();
        f.backend.push_payload(r#"{"A":"1","B":"true"}"#);

        assert_eq!(line(&f.engine.retrieve_command()).as_deref(), Some("A:1"));
        assert_eq!(line(&f.engine.retrieve_command()).as_deref(), Some("B:true"));
        assert_eq!(f.backend.stats().reads, 1);

        assert_eq!(f.engine.retrieve_command().command, None);
        assert_eq!(f.backend.stats().reads, 2);
        assert_eq!(f.engine.stats().commands_retrieved, 2);
    }

    #[test]
    fn queued_commands_bypass_dirty_engine() {
        let f = fixture();
        f.backend.push_payload(r#"{"A":"1","B":"2"}"#);
        assert!(f.engine.retrieve_command().command.is_some());

        f.engine.flags.mark_dirty();
        f.network.set_link(false);
        let calls = f.backend.stats().total_calls();

        let retrieval = f.engine.retrieve_command();
        assert_eq!(line(&retrieval).as_deref(), Some("B:2"));
        assert_eq!(retrieval.outcome, SyncOutcome::Succeeded);
        assert_eq!(f.backend.stats().total_calls(), calls);
    }

    #[test]
    fn no_network_is_not_ready_and_not_dirty() {
        let f = fixture();
        f.network.set_internet(false);
        let retrieval = f.engine.retrieve_command();
        assert_eq!(retrieval.outcome, SyncOutcome::NotReady);
        assert!(!f.engine.status().is_dirty());
        assert_eq!(f.backend.stats().reads, 0);
    }

    #[test]
    fn backend_not_ready_marks_dirty() {
        let f = fixture();
        f.backend.set_ready(false);
        assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::NotReady);
        assert!(f.engine.status().is_dirty());
    }

    #[test]
    fn stream_failure_is_not_ready_and_marks_dirty() {
        let f = fixture();
        f.backend.fail_stream(true);
        assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::NotReady);
        assert!(f.engine.status().is_dirty());
        assert_eq!(f.backend.stats().reads, 0);
        assert!(f
            .engine
            .stats()
            .last_error
            .is_some_and(|e| e.contains("mock stream failure")));
    }

    #[test]
    fn begin_failure_is_not_ready_and_marks_dirty() {
        let f = fixture();
        f.backend.fail_begin(true);
        assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::NotReady);
        assert!(f.engine.status().is_dirty());
        assert_eq!(f.backend.stats().stream_begins, 0);

        let f = fixture();
        f.backend.fail_begin(true);
        f.engine.record_log("boot");
        assert_eq!(f.engine.publish_logs(), SyncOutcome::NotReady);
        assert!(f.engine.status().is_dirty());
        assert_eq!(f.engine.log_buffer().len(), 1);
        assert_eq!(f.backend.stats().writes, 0);
    }

    #[test]
    fn read_failure_then_reset() {
        let f = fixture();
        f.backend.fail_reads(Some("connection reset by peer"));
        assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::Failed);
        assert!(f.engine.status().is_dirty());
        assert!(f
            .engine
            .stats()
            .last_error
            .unwrap()
            .contains("connection reset by peer"));

        // Next call resets instead of reading.
        f.backend.fail_reads(None);
        let reads = f.backend.stats().reads;
        assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::NotReady);
        assert_eq!(f.backend.stats().reads, reads);
        assert!(!f.engine.status().is_dirty());
        assert_eq!(f.engine.stats().resets, 1);

        // Then normal operation resumes.
        f.backend.push_payload(r#"{"relay":"off"}"#);
        assert_eq!(
            line(&f.engine.retrieve_command()).as_deref(),
            Some("relay:off")
        );
    }

    #[test]
    fn failed_reset_stays_dirty() {
        let f = fixture();
        f.backend.fail_reads(Some("timeout"));
        f.engine.retrieve_command();

        f.backend.fail_begin(true);
        for _ in 0..3 {
            assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::NotReady);
            assert_eq!(f.engine.publish_logs(), SyncOutcome::Succeeded);
        }
        assert!(f.engine.status().is_dirty());
        assert_eq!(f.backend.stats().reads, 1);
    }

    #[test]
    fn reset_deferred_without_network() {
        let f = fixture();
        f.backend.fail_reads(Some("timeout"));
        f.engine.retrieve_command();

        f.network.set_link(false);
        let begins = f.backend.stats().begins;
        assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::NotReady);
        assert!(f.engine.status().is_dirty());
        assert_eq!(f.backend.stats().begins, begins);
    }

    #[test]
    fn malformed_payload_marks_dirty() {
        let f = fixture();
        f.backend.push_payload("not json");
        assert_eq!(f.engine.retrieve_command().outcome, SyncOutcome::Failed);
        assert!(f.engine.status().is_dirty());
    }

    #[test]
    fn contention_is_reported() {
        let f = fixture();
        let _busy = f.engine.flags.try_acquire().unwrap();
        f.engine.record_log("hello");

        assert_eq!(
            f.engine.retrieve_command().outcome,
            SyncOutcome::AnotherOperationInProgress
        );
        assert_eq!(
            f.engine.publish_logs(),
            SyncOutcome::AnotherOperationInProgress
        );
        assert_eq!(f.engine.log_buffer().len(), 1);
        assert_eq!(f.backend.stats().total_calls(), 0);
    }

    #[test]
    fn dirty_and_busy_reports_in_progress_without_reset() {
        let f = fixture();
        f.engine.flags.mark_dirty();
        let _busy = f.engine.flags.try_acquire().unwrap();
        f.engine.record_log("pending");

        assert_eq!(
            f.engine.retrieve_command(),
            Retrieval {
                command: None,
                outcome: SyncOutcome::AnotherOperationInProgress,
            }
        );
        assert_eq!(
            f.engine.publish_logs(),
            SyncOutcome::AnotherOperationInProgress
        );

        let stats = f.engine.stats();
        assert_eq!(stats.resets, 0);
        assert_eq!(stats.records_rebuffered, 1);
        let left = f.engine.log_buffer().take_logs();
        assert_eq!(left.values().collect::<Vec<_>>(), vec!["pending"]);
        assert_eq!(f.backend.stats().total_calls(), 0);
        assert!(f.engine.status().is_dirty());
        assert_eq!(f.engine.rebind_count(), 0);
    }

    #[test]
    fn housekeeping_runs_once_per_interval() {
        let f = fixture();
        f.engine.retrieve_command();
        assert!(f.backend.deleted().is_empty());

        f.clock.advance(60_000);
        f.engine.retrieve_command();
        f.engine.retrieve_command();
        assert_eq!(f.backend.deleted(), vec!["commands".to_string()]);

        f.clock.advance(59_999);
        f.engine.retrieve_command();
        assert_eq!(f.backend.deleted().len(), 1);

        f.clock.advance(1);
        f.backend.push_payload(r#"{"A":"1"}"#);
        assert!(f.engine.retrieve_command().command.is_some());
        assert_eq!(f.backend.deleted().len(), 2);
        assert_eq!(f.engine.stats().housekeeping_runs, 2);
    }

    #[test]
    fn housekeeping_failure_keeps_decoded_commands() {
        let f = fixture();
        f.clock.advance(60_000);
        f.backend.fail_deletes(Some("permission denied"));
        f.backend.push_payload(r#"{"A":"1","B":"2"}"#);

        let retrieval = f.engine.retrieve_command();
        assert_eq!(line(&retrieval).as_deref(), Some("A:1"));
        assert!(f.engine.status().is_dirty());
        assert_eq!(line(&f.engine.retrieve_command()).as_deref(), Some("B:2"));
    }

    #[test]
    fn publish_writes_translated_keys() {
        let f = fixture();
        // Wall clock 2024-03-01T10:20:30Z observed at monotonic 1_000.
        f.clock.set_wall_clock(Some(1_709_288_430));
        f.engine.log_buffer().add_log(1_000, "boot");
        f.engine.log_buffer().add_log(2_345, "relay on");

        assert_eq!(f.engine.publish_logs(), SyncOutcome::Succeeded);
        assert!(f.engine.log_buffer().is_empty());

        let written = f.backend.written();
        assert_eq!(written["logs/2024-03-01T10-20-30_000Z"], "boot");
        assert_eq!(written["logs/2024-03-01T10-20-31_345Z"], "relay on");
        assert_eq!(f.engine.stats().records_published, 2);
    }

    #[test]
    fn publish_without_wall_clock_uses_uptime_keys() {
        let f = fixture();
        f.engine.log_buffer().add_log(42, "early");
        assert_eq!(f.engine.publish_logs(), SyncOutcome::Succeeded);
        assert_eq!(
            f.backend.written()["logs/00000000000000000042_uptime"],
            "early"
        );
    }

    #[test]
    fn empty_publish_does_not_connect() {
        let f = fixture();
        assert_eq!(f.engine.publish_logs(), SyncOutcome::Succeeded);
        assert_eq!(f.backend.stats().total_calls(), 0);
    }

    #[test]
    fn partial_publish_rebuffers_failures() {
        let f = fixture();
        for key in [10, 20, 30] {
            f.engine.log_buffer().add_log(key, format!("m{key}"));
        }
        f.backend.fail_next_writes(1);

        assert_eq!(f.engine.publish_logs(), SyncOutcome::Failed);
        assert_eq!(f.backend.stats().writes, 3);
        assert!(f.engine.status().is_dirty());

        let left = f.engine.log_buffer().take_logs();
        assert_eq!(left.keys().copied().collect::<Vec<_>>(), vec![10]);
        assert_eq!(f.engine.stats().records_rebuffered, 1);
        assert_eq!(f.engine.stats().records_published, 2);
    }

    #[test]
    fn publish_gate_failure_rebuffers_everything() {
        let f = fixture();
        f.engine.log_buffer().add_log(1, "a");
        f.engine.log_buffer().add_log(2, "b");
        f.backend.set_ready(false);

        assert_eq!(f.engine.publish_logs(), SyncOutcome::NotReady);
        assert_eq!(f.engine.log_buffer().len(), 2);
        assert_eq!(f.backend.stats().writes, 0);
        assert!(f.engine.status().is_dirty());
    }

    #[test]
    fn network_change_rebinds_before_read() {
        let f = fixture();
        f.engine.retrieve_command();
        assert_eq!(f.engine.rebind_count(), 0);

        f.network.reassociate();
        f.backend.push_payload(r#"{"A":"1"}"#);
        assert!(f.engine.retrieve_command().command.is_some());
        assert_eq!(f.engine.rebind_count(), 1);
        assert_eq!(f.backend.stats().stream_ends, 1);
        assert_eq!(f.backend.stats().reads, 2);
    }
}
