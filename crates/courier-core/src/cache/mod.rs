//! Offline cache of undelivered requests.
//!
//! The cache is one JSON list stored under a single durable-store key. Every
//! read-modify-write of that list happens under one async mutex, so inserts,
//! sweeps and removals never interleave.
//!
//! Per entry the lifecycle is `PENDING -> SENDING -> {removed, PENDING}`.
//! `SENDING` lives only in memory: an entry is never persisted mid-flight,
//! and a restarted process sees every entry as `PENDING`.

mod hooks;

pub use hooks::{HookFuture, HookRegistry, PreSendHook};

use crate::cancel::CancellationToken;
use crate::config::CourierConfig;
use crate::error::CourierError;
use crate::executor::Dispatcher;
use crate::request::{NetworkClass, RequestDescriptor, RequiredConnectivity};
use crate::store::DurableStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Durable list of requests waiting for connectivity.
pub struct OfflineCache {
    store: Arc<dyn DurableStore>,
    dispatcher: Arc<Dispatcher>,
    runtime: Handle,
    hooks: HookRegistry,
    key: String,
    ttl: Duration,
    sweep_connectivity: RequiredConnectivity,
    /// Serializes every read-modify-write of the persisted list.
    list_lock: Mutex<()>,
    /// Entries with an outstanding resend.
    inflight: StdMutex<Vec<RequestDescriptor>>,
}

impl OfflineCache {
    pub(crate) fn new(
        store: Arc<dyn DurableStore>,
        dispatcher: Arc<Dispatcher>,
        runtime: Handle,
        config: &CourierConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            runtime,
            hooks: HookRegistry::new(),
            key: config.cache_key.clone(),
            ttl: config.cache_ttl,
            sweep_connectivity: config.sweep_connectivity,
            list_lock: Mutex::new(()),
            inflight: StdMutex::new(Vec::new()),
        }
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // === Persistence ===

    /// Read the persisted list. Unreadable data counts as an empty cache.
    fn load(&self) -> Vec<RequestDescriptor> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Failed to read request cache, treating as empty: {}", e);
                return Vec::new();
            }
        };

        let mut entries: Vec<RequestDescriptor> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Request cache is corrupt, treating as empty: {}", e);
                return Vec::new();
            }
        };

        let inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        for entry in &mut entries {
            let sending = inflight.iter().any(|other| other.is_equivalent(entry));
            entry.set_sending(sending);
        }
        entries
    }

    /// Rewrite the whole list. Failures are logged and dropped.
    fn persist(&self, entries: &[RequestDescriptor]) {
        let result = if entries.is_empty() {
            self.store.remove(&self.key)
        } else {
            serde_json::to_string(entries)
                .map_err(CourierError::from)
                .and_then(|raw| self.store.set(&self.key, &raw))
        };

        if let Err(e) = result {
            warn!("Failed to write request cache, change dropped: {}", e);
        }
    }

    // === Administration ===

    /// Park a request for later retry.
    ///
    /// Returns false when an equivalent request is already cached; the
    /// existing entry is kept.
    pub async fn insert(&self, mut descriptor: RequestDescriptor) -> bool {
        let _guard = self.list_lock.lock().await;
        let mut entries = self.load();

        if entries.iter().any(|entry| entry.is_equivalent(&descriptor)) {
            debug!(
                "Equivalent request already cached: {} {}",
                descriptor.method(),
                descriptor.url()
            );
            return false;
        }

        descriptor.set_sending(false);
        debug!("Caching {} {}", descriptor.method(), descriptor.url());
        entries.push(descriptor);
        self.persist(&entries);
        true
    }

    /// Snapshot of the cached requests, in insertion order.
    pub async fn entries(&self) -> Vec<RequestDescriptor> {
        let _guard = self.list_lock.lock().await;
        self.load()
    }

    pub async fn len(&self) -> usize {
        self.entries().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every cached request.
    pub async fn clear(&self) {
        let _guard = self.list_lock.lock().await;
        self.persist(&[]);
        info!("Request cache cleared");
    }

    /// Remove the entry equivalent to `descriptor`, if any.
    pub async fn remove(&self, descriptor: &RequestDescriptor) -> bool {
        let _guard = self.list_lock.lock().await;
        let mut entries = self.load();
        let before = entries.len();
        entries.retain(|entry| !entry.is_equivalent(descriptor));

        if entries.len() == before {
            return false;
        }
        self.persist(&entries);
        true
    }

    // === Sweeping ===

    /// Retry cached requests whose requirements `active` satisfies.
    pub async fn sweep(self: &Arc<Self>, active: &HashSet<NetworkClass>) -> SweepOutcome {
        self.sweep_at(active, Utc::now()).await
    }

    /// Like [`Self::sweep`], with expiry judged as of `now`.
    ///
    /// Entries older than the TTL are dropped without a send; an entry
    /// exactly TTL old is still retried. Entries with a registered
    /// pre-send hook are handed to it and removed. The rest are resent in
    /// the background; [`SweepOutcome::wait`] awaits those resends.
    pub async fn sweep_at(
        self: &Arc<Self>,
        active: &HashSet<NetworkClass>,
        now: DateTime<Utc>,
    ) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();
        if !self.sweep_connectivity.is_satisfied_by(active) {
            debug!(
                "Skipping sweep: {} not among active classes",
                self.sweep_connectivity
            );
            return outcome;
        }
        outcome.ran = true;

        let _guard = self.list_lock.lock().await;
        let entries = self.load();
        let mut kept = Vec::with_capacity(entries.len());

        for mut entry in entries {
            if entry.is_sending() {
                outcome.in_flight += 1;
                kept.push(entry);
                continue;
            }

            if !entry.required_connectivity().is_satisfied_by(active) {
                outcome.deferred += 1;
                kept.push(entry);
                continue;
            }

            if self.is_expired(&entry, now) {
                debug!("Dropping expired request {} {}", entry.method(), entry.url());
                outcome.expired += 1;
                continue;
            }

            if let Some(name) = entry.pre_send_hook().map(str::to_string) {
                match self.hooks.get(&name) {
                    Some(hook) => {
                        debug!("Handing {} {} to hook '{}'", entry.method(), entry.url(), name);
                        outcome.handed_off += 1;
                        outcome.hook_tasks.push(self.runtime.spawn(hook(entry)));
                    }
                    None => {
                        warn!(
                            "Pre-send hook '{}' is not registered; keeping {} {} cached",
                            name,
                            entry.method(),
                            entry.url()
                        );
                        outcome.deferred += 1;
                        kept.push(entry);
                    }
                }
                continue;
            }

            self.mark_inflight(&entry);
            let cache = Arc::clone(self);
            let resend = entry.clone();
            outcome
                .resends
                .push(self.runtime.spawn(async move { cache.resend(resend).await }));
            outcome.dispatched += 1;

            entry.set_sending(true);
            kept.push(entry);
        }

        self.persist(&kept);
        outcome
    }

    fn is_expired(&self, entry: &RequestDescriptor, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => entry.age_at(now) > ttl,
            Err(_) => false,
        }
    }

    /// One cached retry. Failures are swallowed; the entry stays cached.
    async fn resend(&self, descriptor: RequestDescriptor) -> bool {
        let token = CancellationToken::new();
        let result = self.dispatcher.dispatch(&descriptor, &token).await;

        let delivered = match result {
            Ok(response) => {
                info!(
                    "Cached request {} {} delivered ({})",
                    descriptor.method(),
                    descriptor.url(),
                    response.status
                );
                self.remove(&descriptor).await;
                true
            }
            Err(e) => {
                warn!(
                    "Cached request {} {} failed, will retry: {}",
                    descriptor.method(),
                    descriptor.url(),
                    e
                );
                false
            }
        };

        // Cleared only after removal so a concurrent sweep never resends a
        // delivered entry.
        self.clear_inflight(&descriptor);
        delivered
    }

    fn mark_inflight(&self, descriptor: &RequestDescriptor) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(descriptor.clone());
    }

    fn clear_inflight(&self, descriptor: &RequestDescriptor) {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|entry| !entry.is_equivalent(descriptor));
    }
}

impl std::fmt::Debug for OfflineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineCache")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .field("sweep_connectivity", &self.sweep_connectivity)
            .finish()
    }
}

/// What one sweep did.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// False when the global sweep requirement was not met.
    pub ran: bool,
    /// Resends started.
    pub dispatched: usize,
    /// Entries dropped for exceeding the TTL.
    pub expired: usize,
    /// Entries handed to a pre-send hook and removed.
    pub handed_off: usize,
    /// Entries skipped because a resend is already outstanding.
    pub in_flight: usize,
    /// Entries left for a later sweep.
    pub deferred: usize,
    resends: Vec<JoinHandle<bool>>,
    hook_tasks: Vec<JoinHandle<()>>,
}

impl SweepOutcome {
    /// Wait for the resends and hooks started by this sweep. Returns how
    /// many resends were delivered.
    pub async fn wait(self) -> usize {
        join_all(self.hook_tasks).await;
        join_all(self.resends)
            .await
            .into_iter()
            .filter(|result| matches!(result, Ok(true)))
            .count()
    }
}

impl std::fmt::Display for SweepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sweep: {} resent, {} expired, {} handed off, {} in flight, {} deferred",
            self.dispatched, self.expired, self.handed_off, self.in_flight, self.deferred
        )
    }
}
