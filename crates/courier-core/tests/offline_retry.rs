//! Integration tests for sending, caching and retrying requests through the
//! public `Courier` interface.
//!
//! Every test runs against in-memory collaborators: a scripted transport, a
//! manual connectivity oracle and a memory (or SQLite) store.

use async_trait::async_trait;
use chrono::Utc;
use courier_core::{
    CourierConfig, Courier, CourierError, DurableStore, HttpMethod, ManualConnectivity,
    MemoryStore, NetworkClass, ParamRole, RequestDescriptor, RequestSpec, RequiredConnectivity,
    SqliteStore, Transport, TransportRequest, TransportResponse,
};
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Semaphore};

/// Transport that records every request and replies from a script.
struct RecordingTransport {
    fallback: Mutex<TransportResponse>,
    script: Mutex<VecDeque<TransportResponse>>,
    requests: Mutex<Vec<TransportRequest>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl RecordingTransport {
    fn replying(status: u16) -> Arc<Self> {
        Arc::new(Self::new(status, None))
    }

    /// Calls block until `release` is called.
    fn gated(status: u16) -> Arc<Self> {
        Arc::new(Self::new(status, Some(Semaphore::new(0))))
    }

    fn new(status: u16, gate: Option<Semaphore>) -> Self {
        Self {
            fallback: Mutex::new(TransportResponse::new(status)),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate,
        }
    }

    fn reply_with(&self, response: TransportResponse) {
        *self.fallback.lock().unwrap() = response;
    }

    fn push_reply(&self, response: TransportResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn urls(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.url.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn execute(&self, request: TransportRequest) -> courier_core::Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        let scripted = self.script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone()))
    }
}

struct Harness {
    courier: Courier,
    transport: Arc<RecordingTransport>,
    oracle: Arc<ManualConnectivity>,
}

fn harness(
    transport: Arc<RecordingTransport>,
    active: impl IntoIterator<Item = NetworkClass>,
    store: Arc<dyn DurableStore>,
    config: CourierConfig,
) -> Harness {
    let oracle = Arc::new(ManualConnectivity::new(active));
    let courier = Courier::builder()
        .config(config)
        .shared_transport(transport.clone())
        .connectivity(oracle.clone())
        .store(store)
        .build()
        .expect("Failed to build courier");

    Harness {
        courier,
        transport,
        oracle,
    }
}

fn simple_harness(status: u16, active: impl IntoIterator<Item = NetworkClass>) -> Harness {
    harness(
        RecordingTransport::replying(status),
        active,
        Arc::new(MemoryStore::new()),
        CourierConfig::default(),
    )
}

fn create_item(name: &str) -> RequestSpec {
    RequestSpec::new(HttpMethod::Post, "https://api.example.com/items")
        .json_body(&json!({ "name": name }))
        .expect_status([201])
        .require_connectivity(RequiredConnectivity::WifiOnly)
        .cache_on_failure(true)
}

fn active(classes: &[NetworkClass]) -> HashSet<NetworkClass> {
    classes.iter().copied().collect()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Condition not reached in time");
}

// === Scenarios ===

#[tokio::test]
async fn test_no_content_status_succeeds_without_caching() {
    let h = simple_harness(204, [NetworkClass::Ethernet]);

    let spec = RequestSpec::new(HttpMethod::Get, "https://api.example.com/status").cache_on_failure(true);
    let response = h.courier.send::<(), _>(&spec).wait().await.unwrap();

    assert_eq!(response.status, 204);
    assert_eq!(h.transport.calls(), 1);
    assert!(h.courier.cache().is_empty().await);
}

#[tokio::test]
async fn test_wifi_only_request_is_cached_when_wifi_is_down() {
    let h = simple_harness(201, [NetworkClass::Cellular]);

    let err = h
        .courier
        .send::<Value, _>(&create_item("x"))
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, CourierError::NoConnectivity { .. }));
    assert_eq!(h.transport.calls(), 0);

    let cached = h.courier.cache().entries().await;
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].method(), HttpMethod::Post);
    assert_eq!(cached[0].url(), "https://api.example.com/items");
    assert_eq!(cached[0].body().unwrap().value(), &json!({"name": "x"}));
}

#[tokio::test]
async fn test_cached_request_is_delivered_when_wifi_returns() {
    let h = simple_harness(201, [NetworkClass::Cellular]);
    h.courier.start_retry_listener();

    let (tx, mut rx) = mpsc::unbounded_channel();
    h.courier.send_with::<Value, _, _, _>(
        &create_item("x"),
        |_| panic!("must not succeed while wifi is down"),
        move |err| {
            let _ = tx.send(err);
        },
    );
    let err = rx.recv().await.unwrap();
    assert!(matches!(err, CourierError::NoConnectivity { .. }));
    assert_eq!(h.courier.cache().len().await, 1);

    h.oracle.connect(NetworkClass::Wifi);

    let cache = h.courier.cache().clone();
    for _ in 0..200 {
        if cache.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cache.is_empty().await);
    assert_eq!(h.transport.calls(), 1);

    // The caller is not notified again by the retry
    assert!(rx.try_recv().is_err());
    h.courier.stop_retry_listener();
}

#[tokio::test]
async fn test_unexpected_status_is_not_cached() {
    let h = simple_harness(404, [NetworkClass::Wifi]);

    let spec = RequestSpec::new(HttpMethod::Get, "https://api.example.com/items/9")
        .expect_status([200])
        .cache_on_failure(true);
    let err = h.courier.send::<Value, _>(&spec).wait().await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(h.courier.cache().is_empty().await);
}

#[tokio::test]
async fn test_unexpected_status_carries_body() {
    let h = simple_harness(200, [NetworkClass::Wifi]);
    h.transport
        .reply_with(TransportResponse::new(409).with_body("conflict"));

    let spec = RequestSpec::new(HttpMethod::Put, "https://api.example.com/items/1");
    match h.courier.send::<Value, _>(&spec).wait().await {
        Err(CourierError::UnexpectedStatus { status, body }) => {
            assert_eq!(status, 409);
            assert_eq!(body, b"conflict".to_vec());
        }
        other => panic!("Expected unexpected status, got {:?}", other),
    }
}

// === Properties ===

#[tokio::test]
async fn test_unmet_connectivity_makes_no_transport_call() {
    let h = simple_harness(200, []);

    for required in [
        RequiredConnectivity::Any,
        RequiredConnectivity::WifiOnly,
        RequiredConnectivity::Only(NetworkClass::Vpn),
    ] {
        let spec = RequestSpec::new(HttpMethod::Get, "https://api.example.com/ping")
            .require_connectivity(required);
        let err = h.courier.send::<Value, _>(&spec).wait().await.unwrap_err();
        assert!(matches!(err, CourierError::NoConnectivity { .. }));
    }

    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_equivalent_requests_cached_once() {
    let h = simple_harness(201, []);

    let first = create_item("x").header("X-Attempt", "1");
    let second = create_item("x").header("X-Attempt", "2");
    let third = create_item("y");

    for spec in [&first, &second, &third] {
        let _ = h.courier.send::<Value, _>(spec).wait().await;
    }

    let cached = h.courier.cache().entries().await;
    assert_eq!(cached.len(), 2);
    // The first representative is kept
    assert_eq!(cached[0].headers()["X-Attempt"], "1");
}

#[tokio::test]
async fn test_ttl_boundary() {
    let config = CourierConfig::default().with_cache_ttl(Duration::from_secs(3600));
    let h = harness(
        RecordingTransport::replying(201),
        [NetworkClass::Wifi],
        Arc::new(MemoryStore::new()),
        config,
    );

    let now = Utc::now();
    let at_ttl = create_item("boundary")
        .build()
        .unwrap()
        .with_created_at(now - chrono::Duration::seconds(3600));
    let past_ttl = create_item("stale")
        .build()
        .unwrap()
        .with_created_at(now - chrono::Duration::seconds(3601));

    let cache = h.courier.cache();
    assert!(cache.insert(at_ttl).await);
    assert!(cache.insert(past_ttl).await);

    let outcome = cache.sweep_at(&active(&[NetworkClass::Wifi]), now).await;
    assert_eq!(outcome.expired, 1);
    assert_eq!(outcome.dispatched, 1);
    assert_eq!(outcome.wait().await, 1);

    assert_eq!(h.transport.calls(), 1);
    assert!(h.transport.requests.lock().unwrap()[0]
        .body
        .as_deref()
        .map(|b| String::from_utf8_lossy(b).contains("boundary"))
        .unwrap_or(false));
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_repeated_sweep_never_double_sends() {
    let h = harness(
        RecordingTransport::gated(201),
        [NetworkClass::Wifi],
        Arc::new(MemoryStore::new()),
        CourierConfig::default(),
    );
    let cache = h.courier.cache().clone();
    cache.insert(create_item("x").build().unwrap()).await;

    let wifi = active(&[NetworkClass::Wifi]);
    let first = cache.sweep(&wifi).await;
    assert_eq!(first.dispatched, 1);

    let transport = h.transport.clone();
    eventually(|| transport.calls() == 1).await;

    let second = cache.sweep(&wifi).await;
    assert_eq!(second.dispatched, 0);
    assert_eq!(second.in_flight, 1);

    // Mid-flight entries are never persisted as sending
    let entries = cache.entries().await;
    assert!(entries[0].is_sending());

    h.transport.release(1);
    assert_eq!(first.wait().await, 1);
    assert_eq!(second.wait().await, 0);

    let third = cache.sweep(&wifi).await;
    assert_eq!(third.dispatched, 0);
    assert_eq!(h.transport.calls(), 1);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_entries_wait_for_their_own_connectivity() {
    let h = simple_harness(200, [NetworkClass::Cellular]);

    let wifi_only = create_item("wifi");
    let cellular = RequestSpec::new(HttpMethod::Delete, "https://api.example.com/items/4")
        .require_connectivity(RequiredConnectivity::Only(NetworkClass::Cellular))
        .cache_on_failure(true);
    h.courier.cache().insert(wifi_only.build().unwrap()).await;
    h.courier.cache().insert(cellular.build().unwrap()).await;

    let outcome = h.courier.sweep_now().await;
    assert_eq!(outcome.dispatched, 1);
    assert_eq!(outcome.deferred, 1);
    assert_eq!(outcome.wait().await, 1);

    let remaining = h.courier.cache().entries().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].method(), HttpMethod::Post);
}

#[tokio::test]
async fn test_pre_send_hook_takes_over_delivery() {
    let h = simple_harness(201, [NetworkClass::Wifi]);
    let (tx, mut rx) = mpsc::unbounded_channel();
    h.courier.hooks().register("refresh-session", move |descriptor: RequestDescriptor| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(descriptor.correlation_tag().map(str::to_string));
        }
    });

    let spec = create_item("x")
        .correlation_tag("item-x")
        .pre_send_hook("refresh-session");
    h.courier.cache().insert(spec.build().unwrap()).await;

    let outcome = h.courier.sweep_now().await;
    assert_eq!(outcome.handed_off, 1);
    outcome.wait().await;

    assert_eq!(rx.recv().await.unwrap().as_deref(), Some("item-x"));
    assert!(h.courier.cache().is_empty().await);
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_failed_retry_is_swallowed_and_kept() {
    let h = simple_harness(201, [NetworkClass::Wifi]);
    h.transport.push_reply(TransportResponse::new(503));
    h.courier.cache().insert(create_item("x").build().unwrap()).await;

    assert_eq!(h.courier.sweep_now().await.wait().await, 0);
    assert_eq!(h.courier.cache().len().await, 1);

    assert_eq!(h.courier.sweep_now().await.wait().await, 1);
    assert!(h.courier.cache().is_empty().await);
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_cache_round_trip_through_sqlite() {
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn DurableStore> =
        Arc::new(SqliteStore::new(temp_dir.path().join("queue.sqlite")).unwrap());

    let originals: Vec<RequestDescriptor> = vec![
        RequestSpec::new(HttpMethod::Get, "https://api.example.com/a")
            .query("page", "2")
            .cache_on_failure(true)
            .build()
            .unwrap(),
        create_item("x").correlation_tag("t-1").build().unwrap(),
        RequestSpec::new(HttpMethod::Put, "https://api.example.com/items/{id}")
            .path_param("id", "7")
            .form_body(&json!({"name": "y", "token": "secret"}))
            .header_from_body("token", Some("X-Token"))
            .expect_status([200, 204])
            .require_connectivity(RequiredConnectivity::Only(NetworkClass::Ethernet))
            .pre_send_hook("refresh")
            .build()
            .unwrap(),
        RequestSpec::new(HttpMethod::Delete, "https://api.example.com/items/3")
            .header("Authorization", "Bearer abc")
            .build()
            .unwrap(),
    ];

    {
        let writer = harness(
            RecordingTransport::replying(200),
            [],
            store.clone(),
            CourierConfig::default(),
        );
        for descriptor in &originals {
            assert!(writer.courier.cache().insert(descriptor.clone()).await);
        }
    }

    let raw = store
        .get(courier_core::CacheDefaults::STORE_KEY)
        .unwrap()
        .unwrap();
    assert!(!raw.contains("sending"));

    let reader = harness(
        RecordingTransport::replying(200),
        [],
        store.clone(),
        CourierConfig::default(),
    );
    let restored = reader.courier.cache().entries().await;
    assert_eq!(restored.len(), originals.len());

    for (original, restored) in originals.iter().zip(&restored) {
        assert_eq!(
            serde_json::to_value(original).unwrap(),
            serde_json::to_value(restored).unwrap()
        );
        assert_eq!(original.created_at(), restored.created_at());
        assert_eq!(original.body(), restored.body());
        assert!(!restored.is_sending());
    }
}

#[tokio::test]
async fn test_restarted_process_retries_persisted_entries() {
    let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());

    {
        let offline = harness(
            RecordingTransport::replying(201),
            [],
            store.clone(),
            CourierConfig::default(),
        );
        let _ = offline.courier.send::<Value, _>(&create_item("x")).wait().await;
        assert_eq!(offline.courier.cache().len().await, 1);
    }

    let online = harness(
        RecordingTransport::replying(201),
        [NetworkClass::Wifi],
        store,
        CourierConfig::default(),
    );
    assert_eq!(online.courier.sweep_now().await.wait().await, 1);
    assert!(online.courier.cache().is_empty().await);
}

#[tokio::test]
async fn test_parameter_holder_changes_are_honored_per_send() {
    struct Feed {
        user: String,
        cursor: Option<String>,
    }

    let h = simple_harness(200, [NetworkClass::Wifi]);
    let mut spec = RequestSpec::with_params(
        HttpMethod::Get,
        "https://api.example.com/users/{user}/feed",
        Feed {
            user: "ada".into(),
            cursor: None,
        },
    )
    .with_path_param("user", |f: &Feed| f.user.clone())
    .bind_accessor(ParamRole::Query, "getCursor", |f: &Feed| f.cursor.clone());

    h.courier.send::<Value, _>(&spec).wait().await.unwrap();
    spec.params_mut().cursor = Some("c2".into());
    h.courier.send::<Value, _>(&spec).wait().await.unwrap();

    assert_eq!(
        h.transport.urls(),
        vec![
            "https://api.example.com/users/ada/feed".to_string(),
            "https://api.example.com/users/ada/feed?cursor=c2".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_cancelled_handle_ignores_late_result() {
    let h = harness(
        RecordingTransport::gated(200),
        [NetworkClass::Wifi],
        Arc::new(MemoryStore::new()),
        CourierConfig::default(),
    );

    let spec = RequestSpec::new(HttpMethod::Get, "https://api.example.com/slow");
    let future = h.courier.send::<Value, _>(&spec);
    let transport = h.transport.clone();
    eventually(|| transport.calls() == 1).await;

    assert!(future.cancel());
    h.transport.release(1);

    assert!(future.is_cancelled());
    assert!(matches!(future.wait().await, Err(CourierError::Cancelled)));
}
