//! Builder that turns a parameter holder plus static configuration into a
//! [`RequestDescriptor`].
//!
//! Role bindings replace runtime field inspection: each binding names a
//! header, path or query parameter and supplies a getter over the holder.
//! Getters run on every [`RequestSpec::build`], never at registration.

use super::descriptor::{RequestBody, RequestDescriptor};
use super::{HttpMethod, RequiredConnectivity};
use crate::codec::{FORM_CODEC, JSON_CODEC};
use crate::error::{CourierError, Result};
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

/// Where a bound parameter is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRole {
    Header,
    Path,
    Query,
}

/// Conversion from a getter's return value into a parameter string.
///
/// `None` and empty strings mean "omit this parameter".
pub trait IntoParamValue {
    fn into_param_value(self) -> Option<String>;
}

impl IntoParamValue for String {
    fn into_param_value(self) -> Option<String> {
        Some(self)
    }
}

impl IntoParamValue for &str {
    fn into_param_value(self) -> Option<String> {
        Some(self.to_string())
    }
}

impl<T: IntoParamValue> IntoParamValue for Option<T> {
    fn into_param_value(self) -> Option<String> {
        self.and_then(IntoParamValue::into_param_value)
    }
}

macro_rules! impl_param_value_display {
    ($($ty:ty),*) => {
        $(
            impl IntoParamValue for $ty {
                fn into_param_value(self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )*
    };
}

impl_param_value_display!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, bool, char
);

type Getter<P> = Arc<dyn Fn(&P) -> Option<String> + Send + Sync>;
type BodyFn<P> = Arc<dyn Fn(&P) -> Result<Value> + Send + Sync>;

struct ParamBinding<P> {
    role: ParamRole,
    /// Injected parameter name.
    name: String,
    /// Holder field or accessor the value comes from.
    source: String,
    getter: Getter<P>,
}

impl<P> Clone for ParamBinding<P> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            name: self.name.clone(),
            source: self.source.clone(),
            getter: Arc::clone(&self.getter),
        }
    }
}

enum BodySource<P> {
    Value(Value),
    Invalid(String),
    Params(BodyFn<P>),
}

impl<P> Clone for BodySource<P> {
    fn clone(&self) -> Self {
        match self {
            BodySource::Value(value) => BodySource::Value(value.clone()),
            BodySource::Invalid(message) => BodySource::Invalid(message.clone()),
            BodySource::Params(f) => BodySource::Params(Arc::clone(f)),
        }
    }
}

/// Declarative request configuration over a parameter holder `P`.
///
/// # Example
///
/// ```
/// use courier_core::request::{HttpMethod, ParamRole, RequestSpec};
///
/// struct UserQuery {
///     user_id: u64,
///     token: String,
///     page: Option<u32>,
/// }
///
/// let mut spec = RequestSpec::with_params(
///     HttpMethod::Get,
///     "https://api.example.com/users/{id}/posts",
///     UserQuery { user_id: 7, token: "abc".into(), page: None },
/// )
/// .bind_field_as(ParamRole::Path, "user_id", "id", |q: &UserQuery| q.user_id)
/// .bind_accessor(ParamRole::Query, "getPage", |q: &UserQuery| q.page)
/// .with_header("Authorization", |q: &UserQuery| format!("Bearer {}", q.token));
///
/// let first = spec.build().unwrap();
/// assert_eq!(first.url(), "https://api.example.com/users/7/posts");
///
/// spec.params_mut().page = Some(2);
/// let second = spec.build().unwrap();
/// assert_eq!(second.url(), "https://api.example.com/users/7/posts?page=2");
/// ```
pub struct RequestSpec<P = ()> {
    method: HttpMethod,
    url_template: String,
    params: P,
    bindings: Vec<ParamBinding<P>>,
    headers: BTreeMap<String, String>,
    path_params: BTreeMap<String, String>,
    query_params: BTreeMap<String, String>,
    body: Option<BodySource<P>>,
    body_codec: String,
    body_headers: Vec<(String, Option<String>)>,
    response_codec: String,
    expected_status: BTreeSet<u16>,
    required_connectivity: RequiredConnectivity,
    cache_eligible: bool,
    correlation_tag: Option<String>,
    pre_send_hook: Option<String>,
}

impl RequestSpec<()> {
    /// Create a spec with no parameter holder.
    pub fn new(method: HttpMethod, url_template: impl Into<String>) -> Self {
        Self::with_params(method, url_template, ())
    }
}

impl<P: 'static> RequestSpec<P> {
    /// Create a spec over a parameter holder.
    pub fn with_params(method: HttpMethod, url_template: impl Into<String>, params: P) -> Self {
        Self {
            method,
            url_template: url_template.into(),
            params,
            bindings: Vec::new(),
            headers: BTreeMap::new(),
            path_params: BTreeMap::new(),
            query_params: BTreeMap::new(),
            body: None,
            body_codec: JSON_CODEC.to_string(),
            body_headers: Vec::new(),
            response_codec: JSON_CODEC.to_string(),
            expected_status: BTreeSet::new(),
            required_connectivity: RequiredConnectivity::Any,
            cache_eligible: false,
            correlation_tag: None,
            pre_send_hook: None,
        }
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    /// Mutable access to the holder; changes apply to the next build.
    pub fn params_mut(&mut self) -> &mut P {
        &mut self.params
    }

    // === Static parameters ===

    /// Set an explicit header. Explicit headers win over bound values.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set a fixed path parameter. The value is inserted into the URL
    /// verbatim, so it must already be percent-encoded where needed.
    pub fn path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    /// Add a constant query parameter.
    ///
    /// Unlike path values, query names and values are percent-encoded on
    /// build: pass them decoded, or `a%20b` is sent as `a%2520b`.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    // === Bindings over the parameter holder ===

    /// Bind a holder field under its own name.
    pub fn bind_field<F, V>(self, role: ParamRole, field: &str, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bind(role, field.to_string(), field.to_string(), getter)
    }

    /// Bind a holder field under an override name.
    pub fn bind_field_as<F, V>(self, role: ParamRole, field: &str, name: &str, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bind(role, name.to_string(), field.to_string(), getter)
    }

    /// Bind a zero-argument accessor. `getUserId` is injected as `userId`.
    pub fn bind_accessor<F, V>(self, role: ParamRole, accessor: &str, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bind(role, derive_accessor_name(accessor), format!("{}()", accessor), getter)
    }

    /// Bind a zero-argument accessor under an override name.
    pub fn bind_accessor_as<F, V>(self, role: ParamRole, accessor: &str, name: &str, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bind(role, name.to_string(), format!("{}()", accessor), getter)
    }

    /// Shorthand for a header binding.
    pub fn with_header<F, V>(self, name: &str, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bind(ParamRole::Header, name.to_string(), name.to_string(), getter)
    }

    /// Shorthand for a path binding.
    pub fn with_path_param<F, V>(self, name: &str, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bind(ParamRole::Path, name.to_string(), name.to_string(), getter)
    }

    /// Shorthand for a query binding.
    pub fn with_query_param<F, V>(self, name: &str, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bind(ParamRole::Query, name.to_string(), name.to_string(), getter)
    }

    fn bind<F, V>(mut self, role: ParamRole, name: String, source: String, getter: F) -> Self
    where
        F: Fn(&P) -> V + Send + Sync + 'static,
        V: IntoParamValue,
    {
        self.bindings.push(ParamBinding {
            role,
            name,
            source,
            getter: Arc::new(move |params: &P| getter(params).into_param_value()),
        });
        self
    }

    // === Body ===

    /// Send `value` encoded with the JSON codec.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Self {
        self.body_with_codec(value, JSON_CODEC)
    }

    /// Send `value` encoded as `application/x-www-form-urlencoded`.
    pub fn form_body<T: Serialize + ?Sized>(self, value: &T) -> Self {
        self.body_with_codec(value, FORM_CODEC)
    }

    /// Send `value` encoded with a named codec.
    ///
    /// A value that cannot be captured fails the next build with an
    /// encoding error.
    pub fn body_with_codec<T: Serialize + ?Sized>(mut self, value: &T, codec: &str) -> Self {
        self.body = Some(match serde_json::to_value(value) {
            Ok(value) => BodySource::Value(value),
            Err(e) => BodySource::Invalid(format!("Failed to capture request body: {}", e)),
        });
        self.body_codec = codec.to_string();
        self
    }

    /// Move a top-level body field into a header.
    ///
    /// The field is excluded from the encoded body. `header` overrides the
    /// header name, which defaults to the field name.
    pub fn header_from_body(mut self, field: &str, header: Option<&str>) -> Self {
        self.body_headers
            .push((field.to_string(), header.map(str::to_string)));
        self
    }

    // === Response and delivery ===

    /// Name of the codec that decodes the response body.
    pub fn response_codec(mut self, codec: &str) -> Self {
        self.response_codec = codec.to_string();
        self
    }

    /// Accept only these status codes. All must lie in 200-299.
    pub fn expect_status(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.expected_status.extend(codes);
        self
    }

    pub fn require_connectivity(mut self, required: RequiredConnectivity) -> Self {
        self.required_connectivity = required;
        self
    }

    /// Park the request in the offline cache when it fails for lack of
    /// connectivity.
    pub fn cache_on_failure(mut self, eligible: bool) -> Self {
        self.cache_eligible = eligible;
        self
    }

    pub fn correlation_tag(mut self, tag: impl Into<String>) -> Self {
        self.correlation_tag = Some(tag.into());
        self
    }

    /// Hand this request to the named hook instead of resending it from the
    /// cache.
    pub fn pre_send_hook(mut self, hook: impl Into<String>) -> Self {
        self.pre_send_hook = Some(hook.into());
        self
    }
}

impl<P: Serialize + 'static> RequestSpec<P> {
    /// Serialize the parameter holder itself as the body on every build.
    pub fn params_as_body(mut self, codec: &str) -> Self {
        self.body = Some(BodySource::Params(Arc::new(|params: &P| {
            serde_json::to_value(params).map_err(|e| CourierError::Encoding {
                message: format!("Failed to capture request body: {}", e),
            })
        })));
        self.body_codec = codec.to_string();
        self
    }
}

impl<P> RequestSpec<P> {
    /// Resolve the spec into a descriptor for one send attempt.
    ///
    /// Fails with a configuration error when an expected status code lies
    /// outside 200-299, when a `{placeholder}` has no path parameter, or
    /// when the resolved URL is empty or not absolute http(s).
    pub fn build(&self) -> Result<RequestDescriptor> {
        if let Some(code) = self
            .expected_status
            .iter()
            .find(|code| !(200..=299).contains(*code))
        {
            return Err(CourierError::configuration(format!(
                "Expected status codes must be in the 200-299 range, got {}",
                code
            )));
        }

        let mut path_params = self.path_params.clone();
        let mut query_params = self.query_params.clone();
        let mut headers = BTreeMap::new();

        for binding in &self.bindings {
            let Some(value) = (binding.getter)(&self.params).filter(|v| !v.is_empty()) else {
                continue;
            };
            let target = match binding.role {
                ParamRole::Header => &mut headers,
                ParamRole::Path => &mut path_params,
                ParamRole::Query => &mut query_params,
            };
            target.insert(binding.name.clone(), value);
        }

        let body = self.resolve_body(&mut headers)?;

        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }

        let url = substitute_path(&self.url_template, &path_params)?;
        let url = append_query(url, &query_params);
        validate_url(&url)?;

        Ok(RequestDescriptor {
            method: self.method,
            url_template: self.url_template.clone(),
            url,
            path_params,
            query_params,
            headers,
            body,
            response_codec: self.response_codec.clone(),
            expected_status: self.expected_status.clone(),
            required_connectivity: self.required_connectivity,
            cache_eligible: self.cache_eligible,
            created_at: Utc::now(),
            correlation_tag: self.correlation_tag.clone(),
            pre_send_hook: self.pre_send_hook.clone(),
            sending: false,
        })
    }

    fn resolve_body(&self, headers: &mut BTreeMap<String, String>) -> Result<Option<RequestBody>> {
        let value = match &self.body {
            None => return Ok(None),
            Some(BodySource::Value(value)) => value.clone(),
            Some(BodySource::Invalid(message)) => {
                return Err(CourierError::Encoding {
                    message: message.clone(),
                })
            }
            Some(BodySource::Params(capture)) => capture(&self.params)?,
        };

        let mut body = RequestBody::from_value(value, self.body_codec.clone());
        for (field, header) in &self.body_headers {
            let projected = body.value().get(field).and_then(stringify_value);
            if let Some(projected) = projected {
                let name = header.clone().unwrap_or_else(|| field.clone());
                headers.insert(name, projected);
            }
            body.exclude_field(field.clone());
        }

        Ok(Some(body))
    }
}

impl<P: Clone> Clone for RequestSpec<P> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            url_template: self.url_template.clone(),
            params: self.params.clone(),
            bindings: self.bindings.clone(),
            headers: self.headers.clone(),
            path_params: self.path_params.clone(),
            query_params: self.query_params.clone(),
            body: self.body.clone(),
            body_codec: self.body_codec.clone(),
            body_headers: self.body_headers.clone(),
            response_codec: self.response_codec.clone(),
            expected_status: self.expected_status.clone(),
            required_connectivity: self.required_connectivity,
            cache_eligible: self.cache_eligible,
            correlation_tag: self.correlation_tag.clone(),
            pre_send_hook: self.pre_send_hook.clone(),
        }
    }
}

impl<P> std::fmt::Debug for RequestSpec<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSpec")
            .field("method", &self.method)
            .field("url_template", &self.url_template)
            .field(
                "bindings",
                &self
                    .bindings
                    .iter()
                    .map(|b| format!("{:?} {} <- {}", b.role, b.name, b.source))
                    .collect::<Vec<_>>(),
            )
            .field("headers", &self.headers)
            .field("body_codec", &self.body_codec)
            .field("response_codec", &self.response_codec)
            .field("expected_status", &self.expected_status)
            .field("required_connectivity", &self.required_connectivity)
            .field("cache_eligible", &self.cache_eligible)
            .finish()
    }
}

/// `getUserId` -> `userId`; names without the prefix only lose their
/// leading capital.
fn derive_accessor_name(accessor: &str) -> String {
    let stripped = accessor
        .strip_prefix("get")
        .filter(|rest| !rest.is_empty())
        .unwrap_or(accessor);

    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn stringify_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn placeholder_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    if let Some(pattern) = PATTERN.get() {
        return Ok(pattern);
    }
    let compiled = Regex::new(r"\{([^{}/?&=]+)\}")
        .map_err(|e| CourierError::configuration(format!("Invalid placeholder pattern: {}", e)))?;
    Ok(PATTERN.get_or_init(|| compiled))
}

/// Fill `{name}` placeholders in one pass over the template. Substituted
/// values are never rescanned, so a value may itself contain braces.
fn substitute_path(template: &str, path_params: &BTreeMap<String, String>) -> Result<String> {
    let pattern = placeholder_pattern()?;

    let unresolved: Vec<&str> = pattern
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .filter(|name| !path_params.contains_key(*name))
        .collect();
    if !unresolved.is_empty() {
        return Err(CourierError::configuration(format!(
            "Unresolved path placeholders in {}: {}",
            template,
            unresolved.join(", ")
        )));
    }

    let url = pattern.replace_all(template, |caps: &regex::Captures<'_>| {
        caps.get(1)
            .and_then(|name| path_params.get(name.as_str()))
            .cloned()
            .unwrap_or_default()
    });

    if url.trim().is_empty() {
        return Err(CourierError::configuration("Request URL is empty"));
    }

    Ok(url.into_owned())
}

/// The resolved URL must be absolute http(s).
fn validate_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| CourierError::configuration(format!("Invalid request URL {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(CourierError::configuration(format!(
            "Unsupported URL scheme '{}' in {}",
            other, url
        ))),
    }
}

fn append_query(mut url: String, query_params: &BTreeMap<String, String>) -> String {
    for (name, value) in query_params {
        let separator = if url.contains('?') { '&' } else { '?' };
        url.push(separator);
        url.push_str(&urlencoding::encode(name));
        url.push('=');
        url.push_str(&urlencoding::encode(value));
    }
    url
}
