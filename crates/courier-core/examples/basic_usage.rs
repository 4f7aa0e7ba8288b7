//! Basic usage example - send a request and queue it when offline

use courier_core::{
    Courier, HttpMethod, ManualConnectivity, NetworkClass, RequestSpec, Result, SqliteStore,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Get URL and queue path from args
    let args: Vec<String> = std::env::args().collect();
    let url = args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("https://httpbin.org/post");
    let queue = args.get(2).map(|s| s.as_str()).unwrap_or("./example-queue.sqlite");

    // Start offline so the request is queued
    let connectivity = Arc::new(ManualConnectivity::offline());
    let courier = Courier::builder()
        .connectivity(connectivity.clone())
        .store(Arc::new(SqliteStore::new(queue)?))
        .build()?;
    courier.start_retry_listener();

    let spec = RequestSpec::new(HttpMethod::Post, url)
        .json_body(&serde_json::json!({ "message": "hello" }))
        .cache_on_failure(true);

    println!("Sending to {} while offline...", url);
    if let Err(e) = courier.send::<serde_json::Value, _>(&spec).wait().await {
        println!("Failed: {}", e);
    }
    println!("Queued requests: {}", courier.cache().len().await);

    println!("Going online...");
    connectivity.connect(NetworkClass::Ethernet);

    for _ in 0..50 {
        if courier.cache().is_empty().await {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    println!("Queued requests: {}", courier.cache().len().await);

    courier.stop_retry_listener();
    Ok(())
}
