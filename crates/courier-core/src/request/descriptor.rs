//! The resolved, persistable description of one HTTP call.

use super::{HttpMethod, RequiredConnectivity};
use crate::error::{CourierError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A request body: a structured value plus the name of the codec that
/// encodes it.
///
/// Top-level fields listed in `header_fields` are projected into headers and
/// never encoded into the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    value: Value,
    codec: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    header_fields: BTreeSet<String>,
}

impl RequestBody {
    /// Capture a serializable value as a body for the named codec.
    pub fn new<T: Serialize + ?Sized>(value: &T, codec: impl Into<String>) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(|e| CourierError::Encoding {
            message: format!("Failed to capture request body: {}", e),
        })?;
        Ok(Self::from_value(value, codec))
    }

    /// Wrap an already-structured value.
    pub fn from_value(value: Value, codec: impl Into<String>) -> Self {
        Self {
            value,
            codec: codec.into(),
            header_fields: BTreeSet::new(),
        }
    }

    /// The captured value, header-only fields included.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Name of the codec used to encode this body.
    pub fn codec(&self) -> &str {
        &self.codec
    }

    /// Fields excluded from encoding because they travel as headers.
    pub fn header_fields(&self) -> &BTreeSet<String> {
        &self.header_fields
    }

    /// Value to hand to a codec: the captured value minus header-only fields.
    pub fn payload(&self) -> Value {
        match &self.value {
            Value::Object(map) if !self.header_fields.is_empty() => Value::Object(
                map.iter()
                    .filter(|(key, _)| !self.header_fields.contains(*key))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub(crate) fn exclude_field(&mut self, field: impl Into<String>) {
        self.header_fields.insert(field.into());
    }
}

/// Immutable description of one HTTP call, as resolved for a send attempt.
///
/// This is the unit the offline cache persists. Every field round-trips
/// through serialization except the in-flight `sending` flag, which always
/// deserializes as `false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub(crate) method: HttpMethod,
    pub(crate) url_template: String,
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) path_params: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) query_params: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) headers: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) body: Option<RequestBody>,
    pub(crate) response_codec: String,
    #[serde(default)]
    pub(crate) expected_status: BTreeSet<u16>,
    #[serde(default)]
    pub(crate) required_connectivity: RequiredConnectivity,
    #[serde(default)]
    pub(crate) cache_eligible: bool,
    pub(crate) created_at: DateTime<Utc>,
    #[serde(default)]
    pub(crate) correlation_tag: Option<String>,
    #[serde(default)]
    pub(crate) pre_send_hook: Option<String>,
    #[serde(skip)]
    pub(crate) sending: bool,
}

impl RequestDescriptor {
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// URL template before placeholder substitution.
    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Fully resolved URL: placeholders substituted, query appended.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path_params(&self) -> &BTreeMap<String, String> {
        &self.path_params
    }

    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.query_params
    }

    /// Merged headers: bound values, body projections and explicit headers.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    /// Name of the codec used to decode the response.
    pub fn response_codec(&self) -> &str {
        &self.response_codec
    }

    /// Accepted status codes. Empty means any 2xx.
    pub fn expected_status(&self) -> &BTreeSet<u16> {
        &self.expected_status
    }

    pub fn required_connectivity(&self) -> RequiredConnectivity {
        self.required_connectivity
    }

    /// Whether a connectivity failure should park this request in the cache.
    pub fn is_cache_eligible(&self) -> bool {
        self.cache_eligible
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn correlation_tag(&self) -> Option<&str> {
        self.correlation_tag.as_deref()
    }

    /// Name of the hook that takes over this request when it is retried from
    /// the cache.
    pub fn pre_send_hook(&self) -> Option<&str> {
        self.pre_send_hook.as_deref()
    }

    /// True while an attempt for this cached entry is outstanding.
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub(crate) fn set_sending(&mut self, sending: bool) {
        self.sending = sending;
    }

    /// Two descriptors are equivalent when method, resolved URL and body
    /// match. Headers are deliberately not compared.
    pub fn is_equivalent(&self, other: &RequestDescriptor) -> bool {
        self.method == other.method && self.url == other.url && self.body == other.body
    }

    /// Check whether `status` satisfies the expected status codes.
    pub fn accepts_status(&self, status: u16) -> bool {
        if self.expected_status.is_empty() {
            (200..=299).contains(&status)
        } else {
            self.expected_status.contains(&status)
        }
    }

    /// Age of the descriptor relative to `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// Copy of this descriptor with a different creation time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}
