//! Oracle that infers reachability by probing well-known URLs.

use super::{ConnectivityChange, ConnectivityOracle, CHANGE_CHANNEL_CAPACITY};
use crate::config::NetworkConfig;
use crate::error::{CourierError, Result};
use crate::request::NetworkClass;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Result of the most recent probe round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectivityState {
    Online = 0,
    Offline = 1,
    /// A probe round is running.
    Checking = 2,
    /// No probe round has finished yet.
    Unknown = 3,
}

impl ConnectivityState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Online,
            1 => Self::Offline,
            2 => Self::Checking,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Checking => "checking",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for connectivity probing.
#[derive(Debug, Clone)]
pub struct ConnectivityConfig {
    /// URLs to probe, in order of preference.
    pub probe_urls: Vec<String>,
    /// Timeout for each probe.
    pub probe_timeout: Duration,
    /// How often to re-check while offline.
    pub offline_recheck_interval: Duration,
    /// How often to verify while online.
    pub online_verify_interval: Duration,
    /// Classes reported as active while probes succeed.
    pub online_classes: Vec<NetworkClass>,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_urls: vec![
                "https://www.gstatic.com/generate_204".to_string(),
                "https://cloudflare.com/cdn-cgi/trace".to_string(),
            ],
            probe_timeout: NetworkConfig::PROBE_TIMEOUT,
            offline_recheck_interval: NetworkConfig::OFFLINE_RECHECK_INTERVAL,
            online_verify_interval: NetworkConfig::ONLINE_VERIFY_INTERVAL,
            online_classes: vec![NetworkClass::Ethernet],
        }
    }
}

impl ConnectivityConfig {
    pub fn with_probe_urls(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.probe_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_online_classes(mut self, classes: impl IntoIterator<Item = NetworkClass>) -> Self {
        self.online_classes = classes.into_iter().collect();
        self
    }

    pub fn with_intervals(mut self, offline_recheck: Duration, online_verify: Duration) -> Self {
        self.offline_recheck_interval = offline_recheck;
        self.online_verify_interval = online_verify;
        self
    }
}

/// Lock-free cell holding a [`ConnectivityState`].
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: ConnectivityState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ConnectivityState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Probing oracle with optional background monitoring.
///
/// Until the first probe completes nothing is reported active.
pub struct ProbeConnectivity {
    client: reqwest::Client,
    state: StateCell,
    /// State as of the last completed check; `state` reads `Checking` mid-probe.
    settled: StateCell,
    last_check: RwLock<Option<Instant>>,
    config: ConnectivityConfig,
    sender: broadcast::Sender<ConnectivityChange>,
    monitoring_active: AtomicBool,
}

impl ProbeConnectivity {
    pub fn new() -> Result<Self> {
        Self::with_config(ConnectivityConfig::default())
    }

    pub fn with_config(config: ConnectivityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .build()
            .map_err(|e| CourierError::Transport {
                message: format!("Failed to create probe client: {}", e),
                source: Some(Box::new(e)),
            })?;
        let (sender, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            state: StateCell::new(ConnectivityState::Unknown),
            settled: StateCell::new(ConnectivityState::Unknown),
            last_check: RwLock::new(None),
            config,
            sender,
            monitoring_active: AtomicBool::new(false),
        })
    }

    /// Current connectivity state.
    pub fn connectivity(&self) -> ConnectivityState {
        self.state.get()
    }

    pub fn is_online(&self) -> bool {
        self.settled.get() == ConnectivityState::Online
    }

    /// Time since the last completed check.
    pub async fn since_last_check(&self) -> Option<Duration> {
        self.last_check.read().await.map(|t| t.elapsed())
    }

    /// Probe the configured URLs and update the state.
    ///
    /// Subscribers are notified whenever the settled state changes.
    pub async fn check_connectivity(&self) -> ConnectivityState {
        let previous = self.settled.get();
        self.state.set(ConnectivityState::Checking);

        let mut result = ConnectivityState::Offline;
        for url in &self.config.probe_urls {
            if self.probe_url(url).await {
                result = ConnectivityState::Online;
                break;
            }
            debug!("Probe failed for {}", url);
        }

        self.state.set(result);
        self.settled.set(result);
        *self.last_check.write().await = Some(Instant::now());

        if result != previous {
            match result {
                ConnectivityState::Online => info!("Network connectivity available"),
                _ => warn!("Network connectivity lost - all probe URLs failed"),
            }
            // No subscribers is fine
            let _ = self
                .sender
                .send(ConnectivityChange::new(self.active_classes()));
        }

        result
    }

    /// HEAD request with a short timeout. Success, redirects and 403 all
    /// count as reachable.
    async fn probe_url(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                status.is_success() || status.is_redirection() || status.as_u16() == 403
            }
            Err(e) => {
                debug!("Probe request failed: {}", e);
                false
            }
        }
    }

    /// Probe on a loop in the background, faster while offline.
    ///
    /// The first check runs immediately.
    pub fn start_monitoring(self: &Arc<Self>) {
        if self.monitoring_active.swap(true, Ordering::SeqCst) {
            debug!("Connectivity monitor already running");
            return;
        }

        let oracle = Arc::clone(self);
        tokio::spawn(async move {
            info!("Connectivity monitor started");

            while oracle.monitoring_active.load(Ordering::SeqCst) {
                oracle.check_connectivity().await;

                let interval = if oracle.is_online() {
                    oracle.config.online_verify_interval
                } else {
                    oracle.config.offline_recheck_interval
                };
                tokio::time::sleep(interval).await;
            }

            info!("Connectivity monitor stopped");
        });
    }

    /// Stop background monitoring after the current interval.
    pub fn stop_monitoring(&self) {
        self.monitoring_active.store(false, Ordering::SeqCst);
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring_active.load(Ordering::SeqCst)
    }
}

impl ConnectivityOracle for ProbeConnectivity {
    fn active_classes(&self) -> HashSet<NetworkClass> {
        if self.is_online() {
            self.config.online_classes.iter().copied().collect()
        } else {
            HashSet::new()
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectivityChange> {
        self.sender.subscribe()
    }
}
