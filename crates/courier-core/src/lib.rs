//! Courier Core - resilient HTTP request execution with an offline retry
//! cache.
//!
//! Requests are declared with a [`RequestSpec`] over a caller-owned parameter
//! holder, resolved on every send, and executed by a [`Courier`] built once
//! per application. Requests that fail for lack of connectivity can be parked
//! in a durable cache and are retried when the connectivity oracle reports
//! the network back.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::{Courier, HttpMethod, RequestSpec, RequiredConnectivity};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> courier_core::Result<()> {
//!     let courier = Courier::builder().build()?;
//!     courier.start_retry_listener();
//!
//!     let spec = RequestSpec::new(HttpMethod::Post, "https://api.example.com/items")
//!         .json_body(&json!({ "name": "x" }))
//!         .expect_status([201])
//!         .require_connectivity(RequiredConnectivity::WifiOnly)
//!         .cache_on_failure(true);
//!
//!     let created: serde_json::Value = courier.send(&spec).wait().await?.into_value();
//!     println!("created {}", created);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod request;
pub mod store;
pub mod transport;

mod executor;
mod future;

// Re-export commonly used types
pub use cache::{HookRegistry, OfflineCache, SweepOutcome};
pub use cancel::{CancellationToken, CancelledError};
pub use codec::{Codec, CodecRegistry, FormCodec, JsonCodec, FORM_CODEC, JSON_CODEC};
pub use config::{CacheDefaults, CourierConfig, NetworkConfig};
pub use connectivity::{
    ConnectivityChange, ConnectivityConfig, ConnectivityOracle, ManualConnectivity,
    ProbeConnectivity,
};
pub use error::{CourierError, Result};
pub use executor::{Courier, CourierBuilder, Response};
pub use future::RequestFuture;
pub use request::{
    HttpMethod, NetworkClass, ParamRole, RequestBody, RequestDescriptor, RequestSpec,
    RequiredConnectivity, ResolveRequest,
};
pub use store::{DurableStore, MemoryStore, SqliteStore};
pub use transport::{ReqwestTransport, Transport, TransportRequest, TransportResponse};
