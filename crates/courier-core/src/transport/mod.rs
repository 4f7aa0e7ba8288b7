//! Transport boundary: one HTTP exchange in, status plus headers plus bytes
//! out.
//!
//! The executor only ever talks to a [`Transport`], so tests swap in fakes
//! and applications choose their own TLS policy through
//! [`ReqwestTransport`].

mod reqwest_transport;

pub use reqwest_transport::{extract_domain, ReqwestTransport, ReqwestTransportBuilder};

use crate::error::Result;
use crate::request::HttpMethod;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// A fully resolved request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Encoded entity. `None` sends no body.
    pub body: Option<Vec<u8>>,
}

/// Raw response as received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Response headers with lower-cased names.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Add a header. Names are stored lower-cased.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Issues a single HTTP call.
///
/// Implementations report DNS, TLS, timeout and connection failures as
/// [`crate::CourierError::Transport`]. Any status code, including 4xx and
/// 5xx, is a successful exchange at this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse>;
}
