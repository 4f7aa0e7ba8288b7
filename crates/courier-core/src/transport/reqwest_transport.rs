//! Transport over reqwest.

use super::{Transport, TransportRequest, TransportResponse};
use crate::config::NetworkConfig;
use crate::error::{CourierError, Result};
use crate::request::HttpMethod;
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Builder for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct ReqwestTransportBuilder {
    timeout: Duration,
    user_agent: String,
    accept_invalid_hostnames: bool,
    accept_invalid_certs: bool,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: NetworkConfig::REQUEST_TIMEOUT,
            user_agent: NetworkConfig::USER_AGENT.to_string(),
            accept_invalid_hostnames: false,
            accept_invalid_certs: false,
        }
    }
}

impl ReqwestTransportBuilder {
    /// Total timeout per request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Skip host-name verification of server certificates.
    pub fn accept_invalid_hostnames(mut self, accept: bool) -> Self {
        self.accept_invalid_hostnames = accept;
        self
    }

    /// Skip certificate validation entirely.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    pub fn build(self) -> Result<ReqwestTransport> {
        if self.accept_invalid_hostnames || self.accept_invalid_certs {
            warn!(
                "TLS verification relaxed (invalid hostnames: {}, invalid certs: {})",
                self.accept_invalid_hostnames, self.accept_invalid_certs
            );
        }

        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .danger_accept_invalid_hostnames(self.accept_invalid_hostnames)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| CourierError::Transport {
                message: format!("Failed to create HTTP client: {}", e),
                source: Some(Box::new(e)),
            })?;

        Ok(ReqwestTransport { client })
    }
}

/// [`Transport`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with default timeout and strict TLS.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let domain = extract_domain(&request.url);
        debug!("{} {} ({})", request.method, request.url, domain);

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            let err = CourierError::from(e);
            debug!("{} {} failed: {}", request.method, domain, err);
            err
        })?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let body = response.bytes().await.map_err(CourierError::from)?.to_vec();
        debug!("{} {} -> {} ({} bytes)", request.method, domain, status, body.len());

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

/// Host part of a URL, for log lines.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("unknown").to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
