//! Request execution.
//!
//! [`Courier`] is the single entry point an application builds once. It
//! owns the worker bound, the delivery context, the codec registry and the
//! offline cache, and wires them to the transport, connectivity oracle and
//! durable store collaborators.
//!
//! A send runs through these steps on a background task:
//!
//! 1. Connectivity precondition, failing with `NoConnectivity` and no I/O.
//! 2. Body encoding, failing with `Encoding` before any I/O.
//! 3. The transport call, raced against cancellation.
//! 4. Status validation against the expected codes.
//! 5. Decoding with the response codec, then conversion to the target type.
//!
//! Cache-eligible sends that fail with `NoConnectivity` or `Transport` are
//! parked in the offline cache before the error is delivered.

use crate::cache::{HookRegistry, OfflineCache, SweepOutcome};
use crate::cancel::CancellationToken;
use crate::codec::{self, Codec, CodecRegistry};
use crate::config::{CourierConfig, NetworkConfig};
use crate::connectivity::{ConnectivityOracle, ManualConnectivity};
use crate::error::{CourierError, Result};
use crate::future::RequestFuture;
use crate::request::{NetworkClass, RequestDescriptor, ResolveRequest};
use crate::store::{DurableStore, MemoryStore};
use crate::transport::{extract_domain, ReqwestTransport, Transport, TransportRequest};
use serde::de::DeserializeOwned;
use serde_json::Value;
use reqwest::header::{HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A successful response: the decoded value plus status and headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub value: T,
    pub status: u16,
    /// Response headers with lower-cased names.
    pub headers: BTreeMap<String, String>,
}

impl<T> Response<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Convert the value, keeping status and headers.
    pub fn try_map<U>(self, f: impl FnOnce(T) -> Result<U>) -> Result<Response<U>> {
        Ok(Response {
            value: f(self.value)?,
            status: self.status,
            headers: self.headers,
        })
    }
}

/// Raw executor: connectivity gate, encoding, bounded transport calls,
/// validation and decoding. Shared by caller sends and cache resends.
pub(crate) struct Dispatcher {
    transport: Arc<dyn Transport>,
    oracle: Arc<dyn ConnectivityOracle>,
    codecs: CodecRegistry,
    permits: Semaphore,
    charset: String,
}

impl Dispatcher {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        oracle: Arc<dyn ConnectivityOracle>,
        codecs: CodecRegistry,
        config: &CourierConfig,
    ) -> Self {
        Self {
            transport,
            oracle,
            codecs,
            permits: Semaphore::new(config.worker_count.max(1)),
            charset: config.charset.clone(),
        }
    }

    pub(crate) fn oracle(&self) -> &Arc<dyn ConnectivityOracle> {
        &self.oracle
    }

    pub(crate) async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        token: &CancellationToken,
    ) -> Result<Response<Value>> {
        token.check()?;

        let required = descriptor.required_connectivity();
        if !self.oracle.satisfies(required) {
            debug!(
                "{} {} needs {}; not attempting",
                descriptor.method(),
                descriptor.url(),
                required
            );
            return Err(CourierError::NoConnectivity {
                required: required.to_string(),
            });
        }

        let request = self.encode(descriptor)?;
        let domain = extract_domain(&request.url);

        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| CourierError::transport("Worker pool closed"))?,
            _ = token.cancelled() => return Err(CourierError::Cancelled),
        };

        let response = tokio::select! {
            result = self.transport.execute(request) => result.map_err(categorize)?,
            _ = token.cancelled() => {
                debug!("{} {} cancelled in flight", descriptor.method(), domain);
                return Err(CourierError::Cancelled);
            }
        };

        if !descriptor.accepts_status(response.status) {
            debug!(
                "{} {} returned unexpected status {}",
                descriptor.method(),
                domain,
                response.status
            );
            return Err(CourierError::UnexpectedStatus {
                status: response.status,
                body: response.body,
            });
        }

        let charset = response
            .header("content-type")
            .and_then(codec::charset_from_content_type)
            .unwrap_or_else(|| NetworkConfig::DEFAULT_CHARSET.to_string());
        let value = self
            .codecs
            .decode(descriptor.response_codec(), &response.body, &charset)?;

        Ok(Response {
            value,
            status: response.status,
            headers: response.headers,
        })
    }

    fn encode(&self, descriptor: &RequestDescriptor) -> Result<TransportRequest> {
        let mut headers = descriptor.headers().clone();
        for (name, value) in &headers {
            validate_header(name, value)?;
        }
        let body = match descriptor.body() {
            Some(body) => {
                let (bytes, content_type) = self.codecs.encode_body(body, &self.charset)?;
                let has_content_type = headers
                    .keys()
                    .any(|name| name.eq_ignore_ascii_case("content-type"));
                if !has_content_type {
                    headers.insert(
                        "Content-Type".to_string(),
                        format!("{}; charset={}", content_type, self.charset),
                    );
                }
                Some(bytes)
            }
            None => None,
        };

        Ok(TransportRequest {
            method: descriptor.method(),
            url: descriptor.url().to_string(),
            headers,
            body,
        })
    }
}

/// Header names and values must be valid on the wire.
fn validate_header(name: &str, value: &str) -> Result<()> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|e| CourierError::Encoding {
        message: format!("Invalid header name '{}': {}", name, e),
    })?;
    HeaderValue::from_str(value).map_err(|e| CourierError::Encoding {
        message: format!("Invalid value for header '{}': {}", name, e),
    })?;
    Ok(())
}

/// Anything a transport returns that is not already categorized becomes a
/// transport error. Request defects the transport rejects before I/O keep
/// their terminal category.
fn categorize(err: CourierError) -> CourierError {
    match err {
        CourierError::Transport { .. }
        | CourierError::Cancelled
        | CourierError::Configuration { .. }
        | CourierError::Encoding { .. } => err,
        other => CourierError::Transport {
            message: other.to_string(),
            source: Some(Box::new(other)),
        },
    }
}

type Delivery = Box<dyn FnOnce() + Send>;

/// Single task on which every completion callback runs, in arrival order.
#[derive(Clone)]
struct DeliveryContext {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl DeliveryContext {
    fn spawn(runtime: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Delivery>();
        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("Completion callback panicked");
                }
            }
            debug!("Delivery context stopped");
        });
        Self { sender }
    }

    fn deliver(&self, job: Delivery) {
        if let Err(mpsc::error::SendError(job)) = self.sender.send(job) {
            // Context is gone (runtime shutting down); run inline
            job();
        }
    }
}

/// Builder for [`Courier`].
pub struct CourierBuilder {
    config: CourierConfig,
    transport: Option<Arc<dyn Transport>>,
    oracle: Option<Arc<dyn ConnectivityOracle>>,
    store: Option<Arc<dyn DurableStore>>,
    codecs: CodecRegistry,
    runtime: Option<Handle>,
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self {
            config: CourierConfig::default(),
            transport: None,
            oracle: None,
            store: None,
            codecs: CodecRegistry::default(),
            runtime: None,
        }
    }
}

impl CourierBuilder {
    pub fn config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport<T: Transport + 'static>(self, transport: T) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connectivity(mut self, oracle: Arc<dyn ConnectivityOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an extra codec alongside `json` and `form`.
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codecs.register(codec);
        self
    }

    /// Runtime that runs sends, sweeps and the delivery context. Defaults to
    /// the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the executor.
    ///
    /// Without explicit collaborators this uses a reqwest transport, an
    /// in-memory store and a manual oracle reporting Ethernet.
    pub fn build(self) -> Result<Courier> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| {
                CourierError::configuration(
                    "Courier must be built inside a Tokio runtime or given a runtime handle",
                )
            })?,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let oracle: Arc<dyn ConnectivityOracle> = match self.oracle {
            Some(oracle) => oracle,
            None => {
                debug!("No connectivity oracle configured; assuming ethernet");
                Arc::new(ManualConnectivity::new([NetworkClass::Ethernet]))
            }
        };
        let store: Arc<dyn DurableStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };

        let dispatcher = Arc::new(Dispatcher::new(transport, oracle, self.codecs, &self.config));
        let cache = Arc::new(OfflineCache::new(
            store,
            Arc::clone(&dispatcher),
            runtime.clone(),
            &self.config,
        ));
        let delivery = DeliveryContext::spawn(&runtime);

        debug!(
            "Courier ready ({} workers, cache key {})",
            self.config.worker_count, self.config.cache_key
        );

        Ok(Courier {
            inner: Arc::new(CourierInner {
                dispatcher,
                cache,
                delivery,
                runtime,
                config: self.config,
                listener_active: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        })
    }
}

struct CourierInner {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<OfflineCache>,
    delivery: DeliveryContext,
    runtime: Handle,
    config: CourierConfig,
    listener_active: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Resilient request executor with an offline retry cache.
///
/// Cheap to clone; clones share workers, cache and delivery context.
#[derive(Clone)]
pub struct Courier {
    inner: Arc<CourierInner>,
}

impl Courier {
    pub fn builder() -> CourierBuilder {
        CourierBuilder::default()
    }

    pub fn config(&self) -> &CourierConfig {
        &self.inner.config
    }

    /// The offline cache of undelivered requests.
    pub fn cache(&self) -> &Arc<OfflineCache> {
        &self.inner.cache
    }

    /// Pre-send hooks consulted when cached requests are retried.
    pub fn hooks(&self) -> &HookRegistry {
        self.inner.cache.hooks()
    }

    /// Send a request and get a handle to its result.
    ///
    /// The request is resolved on the calling thread, so parameter-holder
    /// changes made before this call are honored. Work starts immediately.
    pub fn send<T, R>(&self, request: &R) -> RequestFuture<T>
    where
        T: DeserializeOwned + Send + 'static,
        R: ResolveRequest + ?Sized,
    {
        let descriptor = match request.resolve() {
            Ok(descriptor) => descriptor,
            Err(e) => return RequestFuture::ready(Err(e)),
        };

        let token = CancellationToken::new();
        let (future, completer) = RequestFuture::pending(token.clone());
        self.spawn_send(descriptor, token, move |result: Result<Response<T>>| {
            completer.complete(result);
        });
        future
    }

    /// Send a request and receive the outcome through callbacks.
    ///
    /// Exactly one callback runs, on the delivery context. Cancelling the
    /// returned token makes the send fail with `Cancelled` unless it already
    /// finished.
    pub fn send_with<T, R, S, E>(&self, request: &R, on_success: S, on_error: E) -> CancellationToken
    where
        T: DeserializeOwned + Send + 'static,
        R: ResolveRequest + ?Sized,
        S: FnOnce(Response<T>) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        let token = CancellationToken::new();
        let complete = move |result: Result<Response<T>>| match result {
            Ok(response) => on_success(response),
            Err(e) => on_error(e),
        };

        match request.resolve() {
            Ok(descriptor) => self.spawn_send(descriptor, token.clone(), complete),
            Err(e) => self.inner.delivery.deliver(Box::new(move || complete(Err(e)))),
        }
        token
    }

    fn spawn_send<T, F>(&self, descriptor: RequestDescriptor, token: CancellationToken, complete: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<Response<T>>) + Send + 'static,
    {
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let cache = Arc::clone(&self.inner.cache);
        let delivery = self.inner.delivery.clone();

        self.inner.runtime.spawn(async move {
            let result = dispatcher.dispatch(&descriptor, &token).await;

            if let Err(e) = &result {
                if e.is_cacheable() && descriptor.is_cache_eligible() {
                    debug!("Parking {} {} for retry: {}", descriptor.method(), descriptor.url(), e);
                    cache.insert(descriptor.clone()).await;
                }
            }

            let typed = result.and_then(|response| response.try_map(codec::from_value::<T>));
            delivery.deliver(Box::new(move || complete(typed)));
        });
    }

    /// Sweep the offline cache against the oracle's current state.
    pub async fn sweep_now(&self) -> SweepOutcome {
        let active = self.inner.dispatcher.oracle().active_classes();
        self.inner.cache.sweep(&active).await
    }

    /// Sweep the offline cache on every connectivity change.
    pub fn start_retry_listener(&self) {
        if self.inner.listener_active.swap(true, Ordering::SeqCst) {
            debug!("Retry listener already active");
            return;
        }

        let mut receiver = self.inner.dispatcher.oracle().subscribe();
        let cache = Arc::clone(&self.inner.cache);
        let dispatcher = Arc::clone(&self.inner.dispatcher);

        let handle = self.inner.runtime.spawn(async move {
            info!("Starting offline retry listener");
            loop {
                let active = match receiver.recv().await {
                    Ok(change) => change.active,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Retry listener missed {} connectivity changes", missed);
                        dispatcher.oracle().active_classes()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if active.is_empty() {
                    continue;
                }
                let outcome = cache.sweep(&active).await;
                if outcome.ran {
                    info!("{}", outcome);
                }
            }
            info!("Offline retry listener stopped");
        });

        let mut slot = self.inner.listener.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);
    }

    /// Unsubscribe from connectivity changes.
    pub fn stop_retry_listener(&self) {
        if !self.inner.listener_active.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            info!("Offline retry listener stopped");
        }
    }

    pub fn is_listening(&self) -> bool {
        self.inner.listener_active.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Courier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Courier")
            .field("config", &self.inner.config)
            .field("listening", &self.is_listening())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{HttpMethod, RequestSpec, RequiredConnectivity};
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StaticTransport {
        response: TransportResponse,
        calls: AtomicUsize,
        last: Mutex<Option<TransportRequest>>,
        delay: Duration,
    }

    impl StaticTransport {
        fn new(response: TransportResponse) -> Arc<Self> {
            Self::delayed(response, Duration::ZERO)
        }

        fn delayed(response: TransportResponse, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
                last: Mutex::new(None),
                delay,
            })
        }
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.response.clone())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl Transport for FailingTransport {
        async fn execute(&self, _request: TransportRequest) -> Result<TransportResponse> {
            Err(CourierError::Io {
                message: "socket closed".into(),
                path: None,
                source: None,
            })
        }
    }

    fn courier_with(transport: Arc<dyn Transport>, oracle: Arc<ManualConnectivity>) -> Courier {
        Courier::builder()
            .shared_transport(transport)
            .connectivity(oracle)
            .build()
            .unwrap()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u64,
        name: String,
    }

    #[tokio::test]
    async fn test_send_decodes_typed_value() {
        let transport = StaticTransport::new(
            TransportResponse::new(200)
                .with_header("Content-Type", "application/json; charset=utf-8")
                .with_body(r#"{"id":1,"name":"x"}"#),
        );
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport.clone(), oracle);

        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com/items/1");
        let response = courier.send::<Item, _>(&spec).wait().await.unwrap();

        assert_eq!(response.value, Item { id: 1, name: "x".into() });
        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some("application/json; charset=utf-8"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_body_encoded_with_content_type() {
        let transport = StaticTransport::new(TransportResponse::new(201));
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport.clone(), oracle);

        let spec = RequestSpec::new(HttpMethod::Post, "https://example.com/items")
            .form_body(&json!({"name": "a b"}));
        courier.send::<(), _>(&spec).wait().await.unwrap();

        let sent = transport.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.body, Some(b"name=a+b".to_vec()));
        assert_eq!(
            sent.headers["Content-Type"],
            "application/x-www-form-urlencoded; charset=utf-8"
        );
    }

    #[tokio::test]
    async fn test_explicit_content_type_wins() {
        let transport = StaticTransport::new(TransportResponse::new(200));
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport.clone(), oracle);

        let spec = RequestSpec::new(HttpMethod::Put, "https://example.com/items/1")
            .json_body(&json!({"name": "y"}))
            .header("content-type", "application/vnd.items+json");
        courier.send::<(), _>(&spec).wait().await.unwrap();

        let sent = transport.last.lock().unwrap().clone().unwrap();
        assert_eq!(sent.headers.len(), 1);
        assert_eq!(sent.headers["content-type"], "application/vnd.items+json");
    }

    #[tokio::test]
    async fn test_unsupported_response_charset_is_decoding_error() {
        let transport = StaticTransport::new(
            TransportResponse::new(200)
                .with_header("content-type", "application/json; charset=ISO-8859-1")
                .with_body("{}"),
        );
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport, oracle);

        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com/latin");
        let err = courier.send::<Value, _>(&spec).wait().await.unwrap_err();
        assert!(matches!(err, CourierError::Decoding { .. }));
    }

    #[tokio::test]
    async fn test_uncategorized_transport_failure_is_wrapped() {
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(Arc::new(FailingTransport), oracle);

        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com/");
        let err = courier.send::<Value, _>(&spec).wait().await.unwrap_err();
        assert!(matches!(err, CourierError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_invalid_header_fails_before_io() {
        let transport = StaticTransport::new(TransportResponse::new(200));
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport.clone(), oracle);

        for spec in [
            RequestSpec::new(HttpMethod::Get, "https://example.com/items").header("X-Bad", "a\nb"),
            RequestSpec::new(HttpMethod::Get, "https://example.com/items").header("Bad Name", "x"),
        ] {
            let err = courier
                .send::<Value, _>(&spec.cache_on_failure(true))
                .wait()
                .await
                .unwrap_err();
            assert!(matches!(err, CourierError::Encoding { .. }));
        }

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(courier.cache().is_empty().await);
    }

    #[test]
    fn test_rejected_request_keeps_its_category() {
        let err = categorize(CourierError::configuration("relative URL"));
        assert!(matches!(err, CourierError::Configuration { .. }));
        assert!(!err.is_cacheable());
    }

    #[tokio::test]
    async fn test_encoding_error_before_io() {
        let transport = StaticTransport::new(TransportResponse::new(200));
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport.clone(), oracle);

        let spec = RequestSpec::new(HttpMethod::Post, "https://example.com/items")
            .form_body(&json!({"nested": {"a": 1}}))
            .cache_on_failure(true);
        let err = courier.send::<(), _>(&spec).wait().await.unwrap_err();

        assert!(matches!(err, CourierError::Encoding { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(courier.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_configuration_error_surfaces_without_send() {
        let transport = StaticTransport::new(TransportResponse::new(200));
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport.clone(), oracle);

        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com/{missing}");
        let future = courier.send::<(), _>(&spec);
        assert!(future.is_done());
        assert!(matches!(future.wait().await, Err(CourierError::Configuration { .. })));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_send_with_invokes_one_callback() {
        let transport = StaticTransport::new(TransportResponse::new(204));
        let oracle = Arc::new(ManualConnectivity::offline());
        let courier = courier_with(transport.clone(), oracle);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com/status")
            .require_connectivity(RequiredConnectivity::WifiOnly);
        courier.send_with::<(), _, _, _>(
            &spec,
            |_| panic!("success callback must not run"),
            move |err| {
                let _ = tx.send(err);
            },
        );

        let err = rx.await.unwrap();
        assert!(matches!(err, CourierError::NoConnectivity { .. }));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let transport = StaticTransport::delayed(TransportResponse::new(200), Duration::from_secs(30));
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Wifi]));
        let courier = courier_with(transport.clone(), oracle);

        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com/slow").cache_on_failure(true);
        let future = courier.send::<(), _>(&spec);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(future.cancel());
        assert!(matches!(future.wait().await, Err(CourierError::Cancelled)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(courier.cache().is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_get_from_plain_thread() {
        let transport = StaticTransport::new(TransportResponse::new(200).with_body("42"));
        let oracle = Arc::new(ManualConnectivity::new([NetworkClass::Ethernet]));
        let courier = courier_with(transport, oracle);

        let spec = RequestSpec::new(HttpMethod::Get, "https://example.com/answer");
        let future = courier.send::<u32, _>(&spec);
        let value = tokio::task::spawn_blocking(move || future.get_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap()
            .into_value();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_retry_listener_lifecycle() {
        let transport = StaticTransport::new(TransportResponse::new(200));
        let oracle = Arc::new(ManualConnectivity::offline());
        let courier = courier_with(transport, oracle);

        assert!(!courier.is_listening());
        courier.start_retry_listener();
        courier.start_retry_listener();
        assert!(courier.is_listening());
        courier.stop_retry_listener();
        assert!(!courier.is_listening());
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = Courier::builder()
            .transport(FailingTransport)
            .build();
        assert!(matches!(result, Err(CourierError::Configuration { .. })));
    }
}
