//! Connectivity oracles.
//!
//! An oracle answers "which network classes are reachable right now" and
//! broadcasts a [`ConnectivityChange`] whenever that set changes. The
//! executor consults it before every send and the retry listener sweeps the
//! offline cache on each change.

mod probe;

pub use probe::{ConnectivityConfig, ConnectivityState, ProbeConnectivity};

use crate::request::{NetworkClass, RequiredConnectivity};
use std::collections::HashSet;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of each oracle's change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// Notification carrying the newly active set of network classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityChange {
    pub active: HashSet<NetworkClass>,
}

impl ConnectivityChange {
    pub fn new(active: HashSet<NetworkClass>) -> Self {
        Self { active }
    }

    /// True when at least one class is reachable.
    pub fn is_connected(&self) -> bool {
        !self.active.is_empty()
    }
}

/// Source of truth for network reachability.
pub trait ConnectivityOracle: Send + Sync {
    /// Classes reachable right now.
    fn active_classes(&self) -> HashSet<NetworkClass>;

    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange>;

    fn is_available(&self, class: NetworkClass) -> bool {
        self.active_classes().contains(&class)
    }

    /// Check a request's requirement against the current state.
    fn satisfies(&self, required: RequiredConnectivity) -> bool {
        required.is_satisfied_by(&self.active_classes())
    }
}

/// Oracle driven by the application, e.g. from OS network callbacks.
#[derive(Debug)]
pub struct ManualConnectivity {
    active: RwLock<HashSet<NetworkClass>>,
    sender: broadcast::Sender<ConnectivityChange>,
}

impl ManualConnectivity {
    /// Start with the given classes active.
    pub fn new(active: impl IntoIterator<Item = NetworkClass>) -> Self {
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            active: RwLock::new(active.into_iter().collect()),
            sender,
        }
    }

    /// Start with nothing reachable.
    pub fn offline() -> Self {
        Self::new([])
    }

    /// Replace the active set. Subscribers are notified only when the set
    /// actually changes; returns whether it did.
    pub fn set_active(&self, active: impl IntoIterator<Item = NetworkClass>) -> bool {
        let active: HashSet<NetworkClass> = active.into_iter().collect();
        {
            let mut current = self.active.write().unwrap_or_else(|e| e.into_inner());
            if *current == active {
                return false;
            }
            *current = active.clone();
        }

        debug!("Connectivity changed: {:?}", active);
        // No subscribers is fine
        let _ = self.sender.send(ConnectivityChange::new(active));
        true
    }

    /// Mark one class reachable.
    pub fn connect(&self, class: NetworkClass) -> bool {
        let mut active = self.active_classes();
        active.insert(class);
        self.set_active(active)
    }

    /// Mark one class unreachable.
    pub fn disconnect(&self, class: NetworkClass) -> bool {
        let mut active = self.active_classes();
        active.remove(&class);
        self.set_active(active)
    }
}

impl Default for ManualConnectivity {
    fn default() -> Self {
        Self::offline()
    }
}

impl ConnectivityOracle for ManualConnectivity {
    fn active_classes(&self) -> HashSet<NetworkClass> {
        self.active
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange> {
        self.sender.subscribe()
    }
}
