//! Remote backend abstraction.

use crate::error::{RemoteOperation, SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Client for the remote streaming key-value service.
///
/// One instance represents the single physical connection of the device.
/// Calls may block for up to one network timeout. The engine guarantees that
/// at most one call is executing at any time.
pub trait RemoteBackendClient: Send + Sync {
    /// Establishes the connection (transport buffers, credentials).
    /// Calling it on an established connection must be harmless.
    fn begin(&self) -> SyncResult<()>;

    /// Returns true once the backend has completed its handshake.
    fn ready(&self) -> bool;

    /// Arms the stream on `path`.
    fn begin_stream(&self, path: &str) -> SyncResult<()>;

    /// Reads one stream event. `Ok(None)` means no new payload.
    fn read_stream(&self) -> SyncResult<Option<Vec<u8>>>;

    /// Ends the stream and releases the connection.
    fn end_stream(&self);

    /// Deletes the node at `path`.
    fn delete_node(&self, path: &str) -> SyncResult<()>;

    /// Writes a string value at `path`.
    fn write_string(&self, path: &str, value: &str) -> SyncResult<()>;
}

impl<T: RemoteBackendClient + ?Sized> RemoteBackendClient for Arc<T> {
    fn begin(&self) -> SyncResult<()> {
        (**self).begin()
    }

    fn ready(&self) -> bool {
        (**self).ready()
    }

    fn begin_stream(&self, path: &str) -> SyncResult<()> {
        (**self).begin_stream(path)
    }

    fn read_stream(&self) -> SyncResult<Option<Vec<u8>>> {
        (**self).read_stream()
    }

    fn end_stream(&self) {
        (**self).end_stream()
    }

    fn delete_node(&self, path: &str) -> SyncResult<()> {
        (**self).delete_node(path)
    }

    fn write_string(&self, path: &str, value: &str) -> SyncResult<()> {
        (**self).write_string(path, value)
    }
}

/// Call counters recorded by [`MockBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockBackendStats {
    /// Calls to `begin`.
    pub begins: usize,
    /// Calls to `begin_stream`.
    pub stream_begins: usize,
    /// Calls to `end_stream`.
    pub stream_ends: usize,
    /// Calls to `read_stream`.
    pub reads: usize,
    /// Calls to `write_string`.
    pub writes: usize,
    /// Calls to `delete_node`.
    pub deletes: usize,
}

impl MockBackendStats {
    /// Total number of remote calls.
    pub fn total_calls(&self) -> usize {
        self.begins + self.stream_begins + self.stream_ends + self.reads + self.writes + self.deletes
    }
}

#[derive(Debug, Default)]
struct MockState {
    ready: bool,
    streaming: bool,
    payloads: VecDeque<Vec<u8>>,
    nodes: BTreeMap<String, String>,
    deleted: Vec<String>,
    fail_begin: bool,
    fail_stream: bool,
    read_failure: Option<String>,
    write_failure: Option<String>,
    failing_writes: usize,
    delete_failure: Option<String>,
    call_delay: Duration,
    stats: MockBackendStats,
}

/// An in-memory backend for tests and host simulation.
///
/// Payloads pushed with [`MockBackend::push_payload`] are handed out one per
/// `read_stream`. Written values are kept so tests can inspect them. The mock
/// also tracks how many calls execute at the same time.
#[derive(Debug)]
pub struct MockBackend {
    state: Mutex<MockState>,
    active_calls: AtomicUsize,
    max_active_calls: AtomicUsize,
}

impl MockBackend {
    /// Creates a healthy mock backend.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                ready: true,
                ..MockState::default()
            }),
            active_calls: AtomicUsize::new(0),
            max_active_calls: AtomicUsize::new(0),
        }
    }

    /// Queues a raw payload for the next stream read.
    pub fn push_payload(&self, payload: impl Into<Vec<u8>>) {
        self.state.lock().payloads.push_back(payload.into());
    }

    /// Sets whether the backend reports ready.
    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    /// Makes `begin` fail.
    pub fn fail_begin(&self, fail: bool) {
        self.state.lock().fail_begin = fail;
    }

    /// Makes `begin_stream` fail.
    pub fn fail_stream(&self, fail: bool) {
        self.state.lock().fail_stream = fail;
    }

    /// Makes every `read_stream` fail with `reason`, or clears the failure.
    pub fn fail_reads(&self, reason: Option<&str>) {
        self.state.lock().read_failure = reason.map(str::to_string);
    }

    /// Makes every `write_string` fail with `reason`, or clears the failure.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.state.lock().write_failure = reason.map(str::to_string);
    }

    /// Makes the next `count` writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failing_writes = count;
    }

    /// Makes every `delete_node` fail with `reason`, or clears the failure.
    pub fn fail_deletes(&self, reason: Option<&str>) {
        self.state.lock().delete_failure = reason.map(str::to_string);
    }

    /// Makes every call sleep for `delay`, widening overlap windows in
    /// concurrency tests.
    pub fn set_call_delay(&self, delay: Duration) {
        self.state.lock().call_delay = delay;
    }

    /// Returns the call counters.
    pub fn stats(&self) -> MockBackendStats {
        self.state.lock().stats.clone()
    }

    /// Returns all successfully written nodes.
    pub fn written(&self) -> BTreeMap<String, String> {
        self.state.lock().nodes.clone()
    }

    /// Returns the paths deleted so far, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    /// Returns true while a stream is armed.
    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Highest number of calls observed executing at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active_calls.load(Ordering::SeqCst)
    }

    fn enter_call(&self) -> CallGuard<'_> {
        let active = self.active_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_calls.fetch_max(active, Ordering::SeqCst);
        let delay = self.state.lock().call_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        CallGuard { backend: self }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct CallGuard<'a> {
    backend: &'a MockBackend,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.backend.active_calls.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RemoteBackendClient for MockBackend {
    fn begin(&self) -> SyncResult<()> {
        let _call = self.enter_call();
        let mut state = self.state.lock();
        state.stats.begins += 1;
        if state.fail_begin {
            return Err(SyncError::remote(RemoteOperation::Begin, "mock begin failure"));
        }
        Ok(())
    }

    fn ready(&self) -> bool {
        self.state.lock().ready
    }

    fn begin_stream(&self, _path: &str) -> SyncResult<()> {
        let _call = self.enter_call();
        let mut state = self.state.lock();
        state.stats.stream_begins += 1;
        if state.fail_stream {
            return Err(SyncError::remote(
                RemoteOperation::BeginStream,
                "mock stream failure",
            ));
        }
        state.streaming = true;
        Ok(())
    }

    fn read_stream(&self) -> SyncResult<Option<Vec<u8>>> {
        let _call = self.enter_call();
        let mut state = self.state.lock();
        state.stats.reads += 1;
        if let Some(reason) = &state.read_failure {
            return Err(SyncError::remote(RemoteOperation::ReadStream, reason.clone()));
        }
        if !state.streaming {
            return Err(SyncError::remote(
                RemoteOperation::ReadStream,
                "stream not armed",
            ));
        }
        Ok(state.payloads.pop_front())
    }

    fn end_stream(&self) {
        let _call = self.enter_call();
        let mut state = self.state.lock();
        state.stats.stream_ends += 1;
        state.streaming = false;
    }

    fn delete_node(&self, path: &str) -> SyncResult<()> {
        let _call = self.enter_call();
        let mut state = self.state.lock();
        state.stats.deletes += 1;
        if let Some(reason) = &state.delete_failure {
            return Err(SyncError::remote(RemoteOperation::Delete, reason.clone()));
        }
        let prefix = format!("{}/", path);
        state
            .nodes
            .retain(|node, _| node != path && !node.starts_with(&prefix));
        state.deleted.push(path.to_string());
        Ok(())
    }

    fn write_string(&self, path: &str, value: &str) -> SyncResult<()> {
        let _call = self.enter_call();
        let mut state = self.state.lock();
        state.stats.writes += 1;
        if let Some(reason) = &state.write_failure {
            return Err(SyncError::remote(RemoteOperation::Write, reason.clone()));
        }
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(SyncError::remote(RemoteOperation::Write, "mock write failure"));
        }
        state.nodes.insert(path.to_string(), value.to_string());
        Ok(())
    }
}
