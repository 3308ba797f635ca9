//! Lifecycle of the single remote connection.

use crate::error::{SyncError, SyncResult};
use crate::network::{NetworkIdentity, NetworkStatusProvider};
use crate::transport::RemoteBackendClient;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Binding state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not established, or the stream is not armed.
    Unbound,
    /// Established with the stream armed under the current network.
    Bound,
    /// Bound under a network identity that is no longer current.
    StaleBinding,
}

#[derive(Debug, Default)]
struct Binding {
    connected: bool,
    stream_armed: bool,
    identity: Option<NetworkIdentity>,
}

/// Owns the physical connection and keeps it consistent with the network.
///
/// The controller is driven by the engine while it holds the in-progress
/// flag. Every method that reaches the backend is crate-private; outside
/// the engine the controller can only be observed. Teardown still waits
/// for in-flight stream reads, up to `drain_timeout`.
pub struct ConnectionController<B, N> {
    backend: B,
    network: N,
    stream_path: String,
    drain_timeout: Duration,
    settle_delay: Duration,
    binding: Mutex<Binding>,
    reads_in_flight: Mutex<usize>,
    reads_done: Condvar,
    rebinds: AtomicU64,
}

impl<B: RemoteBackendClient, N: NetworkStatusProvider> ConnectionController<B, N> {
    /// Creates an unbound controller streaming `stream_path`.
    pub fn new(
        backend: B,
        network: N,
        stream_path: impl Into<String>,
        drain_timeout: Duration,
        settle_delay: Duration,
    ) -> Self {
        Self {
            backend,
            network,
            stream_path: stream_path.into(),
            drain_timeout,
            settle_delay,
            binding: Mutex::new(Binding::default()),
            reads_in_flight: Mutex::new(0),
            reads_done: Condvar::new(),
            rebinds: AtomicU64::new(0),
        }
    }

    /// Returns the backend client.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns the current binding state.
    pub fn state(&self) -> ConnectionState {
        let binding = self.binding.lock();
        if !binding.connected || !binding.stream_armed {
            return ConnectionState::Unbound;
        }
        match binding.identity {
            Some(bound) if bound != self.network.network_identity() => {
                ConnectionState::StaleBinding
            }
            _ => ConnectionState::Bound,
        }
    }

    /// Number of rebinds performed so far.
    pub fn rebind_count(&self) -> u64 {
        self.rebinds.load(Ordering::Relaxed)
    }

    /// Returns true if the link is up and the internet reachable.
    pub fn network_available(&self) -> bool {
        self.network.is_link_connected() && self.network.is_internet_reachable()
    }

    /// Checks the network and keeps the connection consistent with it.
    ///
    /// Without a link or internet the connection is released and `false` is
    /// returned. When the network identity differs from the one recorded
    /// last, the connection is rebound and the new identity recorded. A
    /// failed rebind is not reported here: it leaves the connection unbound
    /// and the next readiness check fails.
    pub(crate) fn ensure_matches_network(&self) -> bool {
        if !self.network_available() {
            debug!("no network path, releasing connection");
            self.unbind();
            return false;
        }

        let current = self.network.network_identity();
        let previous = self.binding.lock().identity;
        match previous {
            None => {
                self.binding.lock().identity = Some(current);
            }
            Some(previous) if previous != current => {
                info!(%previous, %current, "network identity changed, rebinding");
                if let Err(e) = self.rebind() {
                    warn!(error = %e, "rebind after network change failed");
                }
            }
            Some(_) => {}
        }
        true
    }

    /// Establishes the connection if needed and checks backend readiness.
    ///
    /// A no-op on an established connection apart from the readiness check.
    /// A failed `begin` is reported as [`SyncError::NotReady`] carrying the
    /// backend's reason.
    pub(crate) fn ensure_bound(&self) -> SyncResult<()> {
        let mut binding = self.binding.lock();
        if !binding.connected {
            self.backend.begin().map_err(not_ready)?;
            binding.connected = true;
            debug!("connection established");
        }
        if !self.backend.ready() {
            return Err(SyncError::NotReady("backend handshake incomplete".into()));
        }
        Ok(())
    }

    /// Arms the stream on the command path if it is not armed yet.
    /// A failed arm is reported as [`SyncError::NotReady`].
    pub(crate) fn ensure_stream(&self) -> SyncResult<()> {
        let mut binding = self.binding.lock();
        if !binding.stream_armed {
            self.backend.begin_stream(&self.stream_path).map_err(not_ready)?;
            binding.stream_armed = true;
            debug!(path = %self.stream_path, "stream armed");
        }
        Ok(())
    }

    /// Reads one stream event, counted as in flight until it returns.
    pub(crate) fn read_stream(&self) -> SyncResult<Option<Vec<u8>>> {
        let _read = InFlightRead::enter(self);
        self.backend.read_stream()
    }

    /// Tears the connection down and establishes it again.
    ///
    /// Records the current network identity as the one bound to. Succeeds
    /// only if the connection ends up bound with the stream armed.
    pub(crate) fn rebind(&self) -> SyncResult<()> {
        self.rebinds.fetch_add(1, Ordering::Relaxed);
        self.teardown();
        self.binding.lock().identity = Some(self.network.network_identity());
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
        self.ensure_bound()?;
        self.ensure_stream()?;
        info!(path = %self.stream_path, "connection rebound");
        Ok(())
    }

    /// Releases the connection without re-establishing it.
    pub(crate) fn unbind(&self) {
        self.teardown();
    }

    fn teardown(&self) {
        self.drain_reads();
        let mut binding = self.binding.lock();
        if binding.stream_armed || binding.connected {
            self.backend.end_stream();
        }
        binding.stream_armed = false;
        binding.connected = false;
    }

    fn drain_reads(&self) {
        let deadline = Instant::now() + self.drain_timeout;
        let mut in_flight = self.reads_in_flight.lock();
        while *in_flight > 0 {
            if self
                .reads_done
                .wait_until(&mut in_flight, deadline)
                .timed_out()
            {
                warn!(
                    in_flight = *in_flight,
                    timeout_ms =
                        u64::try_from(self.drain_timeout.as_millis()).unwrap_or(u64::MAX),
                    "in-flight read did not finish, tearing down anyway"
                );
                break;
            }
        }
    }
}

fn not_ready(error: SyncError) -> SyncError {
    match error {
        SyncError::Remote { operation, reason } => {
            SyncError::NotReady(format!("{operation} failed: {reason}"))
        }
        other => other,
    }
}

struct InFlightRead<'a> {
    reads_in_flight: &'a Mutex<usize>,
    reads_done: &'a Condvar,
}

impl<'a> InFlightRead<'a> {
    fn enter<B, N>(controller: &'a ConnectionController<B, N>) -> Self {
        *controller.reads_in_flight.lock() += 1;
        Self {
            reads_in_flight: &controller.reads_in_flight,
            reads_done: &controller.reads_done,
        }
    }
}

impl Drop for InFlightRead<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.reads_in_flight.lock();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.reads_done.notify_all();
        }
    }
}
