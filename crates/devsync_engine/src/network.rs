//! Network status source.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Opaque token identifying the current network association.
///
/// It changes whenever the link is re-established (reassociation, address
/// renewal), which invalidates any connection bound under the old token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkIdentity(pub u32);

impl fmt::Display for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "net#{}", self.0)
    }
}

/// Reports connectivity and the current network identity.
pub trait NetworkStatusProvider: Send + Sync {
    /// Returns true if the link layer (e.g. Wi-Fi) is associated.
    fn is_link_connected(&self) -> bool;

    /// Returns true if the internet is reachable over the link.
    fn is_internet_reachable(&self) -> bool;

    /// Returns the identity of the current association.
    fn network_identity(&self) -> NetworkIdentity;
}

impl<T: NetworkStatusProvider + ?Sized> NetworkStatusProvider for Arc<T> {
    fn is_link_connected(&self) -> bool {
        (**self).is_link_connected()
    }

    fn is_internet_reachable(&self) -> bool {
        (**self).is_internet_reachable()
    }

    fn network_identity(&self) -> NetworkIdentity {
        (**self).network_identity()
    }
}

/// A settable network source for tests and host simulation.
#[derive(Debug)]
pub struct MockNetwork {
    link: AtomicBool,
    internet: AtomicBool,
    identity: AtomicU32,
}

impl MockNetwork {
    /// Creates a connected network with identity 1.
    pub fn new() -> Self {
        Self {
            link: AtomicBool::new(true),
            internet: AtomicBool::new(true),
            identity: AtomicU32::new(1),
        }
    }

    /// Sets the link state.
    pub fn set_link(&self, connected: bool) {
        self.link.store(connected, Ordering::SeqCst);
    }

    /// Sets internet reachability.
    pub fn set_internet(&self, reachable: bool) {
        self.internet.store(reachable, Ordering::SeqCst);
    }

    /// Simulates a reassociation: the identity changes.
    pub fn reassociate(&self) -> NetworkIdentity {
        NetworkIdentity(self.identity.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

impl Default for MockNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStatusProvider for MockNetwork {
    fn is_link_connected(&self) -> bool {
        self.link.load(Ordering::SeqCst)
    }

    fn is_internet_reachable(&self) -> bool {
        self.internet.load(Ordering::SeqCst)
    }

    fn network_identity(&self) -> NetworkIdentity {
        NetworkIdentity(self.identity.load(Ordering::SeqCst))
    }
}
