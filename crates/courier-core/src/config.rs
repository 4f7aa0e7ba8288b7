//! Centralized configuration for Courier.
//!
//! Constant tables for network and cache defaults, plus the runtime
//! [`CourierConfig`] owned by a single [`crate::Courier`] instance.

use crate::request::RequiredConnectivity;
use std::time::Duration;

/// Network-related defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const OFFLINE_RECHECK_INTERVAL: Duration = Duration::from_secs(30);
    pub const ONLINE_VERIFY_INTERVAL: Duration = Duration::from_secs(300);
    pub const USER_AGENT: &'static str = "Courier/0.3";
    pub const DEFAULT_CHARSET: &'static str = "utf-8";
    pub const WORKER_COUNT: usize = 4;
}

/// Offline cache defaults.
pub struct CacheDefaults;

impl CacheDefaults {
    /// Cached requests older than this are dropped by the next sweep.
    pub const TTL: Duration = Duration::from_secs(24 * 60 * 60);
    /// Well-known durable store key holding the serialized request list.
    pub const STORE_KEY: &'static str = "courier.request_cache";
}

/// Runtime configuration for a [`crate::Courier`].
#[derive(Debug, Clone)]
pub struct CourierConfig {
    /// Maximum age of a cached request before a sweep drops it.
    pub cache_ttl: Duration,
    /// Upper bound on concurrent transport calls.
    pub worker_count: usize,
    /// Durable store key of the cached request list.
    pub cache_key: String,
    /// Charset used when encoding request bodies.
    pub charset: String,
    /// Connectivity that must be active before any sweep runs.
    pub sweep_connectivity: RequiredConnectivity,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            cache_ttl: CacheDefaults::TTL,
            worker_count: NetworkConfig::WORKER_COUNT,
            cache_key: CacheDefaults::STORE_KEY.to_string(),
            charset: NetworkConfig::DEFAULT_CHARSET.to_string(),
            sweep_connectivity: RequiredConnectivity::Any,
        }
    }
}

impl CourierConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cache time-to-live.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the worker bound. Values below one are raised to one.
    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers.max(1);
        self
    }

    /// Set the durable store key for the cached request list.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    /// Set the body encoding charset.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    /// Only sweep the cache when this connectivity is active.
    pub fn with_sweep_connectivity(mut self, required: RequiredConnectivity) -> Self {
        self.sweep_connectivity = required;
        self
    }
}
