//! NATS JetStream integration tests.
//!
//! These require a running NATS server with JetStream enabled:
//!   nats-server -js
//!
//! Tests are skipped automatically if no broker is reachable.

use std::time::Duration;

use bytes::Bytes;

use nimsforest_core::{BrokerConfig, CompostAction, Humus, River, Runtime, Soil, StorageType};

/// Try to connect to a local broker with a fresh, isolated stream/bucket
/// namespace per test. Returns `None` if unavailable.
async fn try_runtime(suffix: &str) -> Option<Runtime> {
    let config = BrokerConfig {
        river_stream: format!("TEST_RIVER_{suffix}"),
        humus_stream: format!("TEST_HUMUS_{suffix}"),
        soil_bucket: format!("TEST_SOIL_{suffix}"),
        storage: StorageType::Memory,
        ..BrokerConfig::new("nats://127.0.0.1:4222")
    };

    match Runtime::connect_nats(config).await {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            eprintln!("NATS not available, skipping integration test: {e}");
            None
        }
    }
}

macro_rules! nats_runtime {
    ($suffix:expr) => {
        match try_runtime($suffix).await {
            Some(r) => r,
            None => return,
        }
    };
}

#[tokio::test]
async fn wind_publishes_and_is_caught() {
    let runtime = nats_runtime!("wind_pubsub");

    let seen = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let mut sub = runtime
        .wind
        .catch(
            "forex.rate",
            std::sync::Arc::new(move |leaf: nimsforest_core::Leaf| {
                let seen = seen2.clone();
                Box::pin(async move {
                    seen.lock().await.push(leaf);
                })
            }),
        )
        .await
        .unwrap();

    runtime
        .wind
        .drop_leaf(nimsforest_core::Leaf::with_json("forex.rate", "reuters", &serde_json::json!({"rate": 7.35})).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(seen.lock().await.len(), 1);

    sub.stop().await;
}

#[tokio::test]
async fn river_flow_persists_and_is_observed() {
    let runtime = nats_runtime!("river_flow");

    let seq = runtime.river.flow("river.widgets.created", Bytes::from_static(b"{\"id\":1}")).await.unwrap();
    assert!(seq > 0);

    let seen = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let mut consumer = runtime
        .river
        .observe_with_consumer(
            "river.widgets.>",
            "widgets-observer",
            std::sync::Arc::new(move |record: nimsforest_core::RiverRecord| {
                let seen = seen2.clone();
                Box::pin(async move {
                    seen.lock().await.push(record.stream_sequence);
                    Ok(())
                })
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(seen.lock().await.contains(&seq));

    consumer.stop().await;
}

#[tokio::test]
async fn humus_decompose_materializes_soil() {
    let runtime = nats_runtime!("humus_decompose");
    runtime.start().await.unwrap();

    runtime
        .humus
        .add("payment-nim", "task:nats-1", CompostAction::Create, Bytes::from_static(b"hello"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    let entry = runtime.soil.dig("task:nats-1").await.unwrap();
    assert_eq!(entry.data, Bytes::from_static(b"hello"));
    assert_eq!(entry.revision, 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn soil_bury_enforces_optimistic_concurrency() {
    let runtime = nats_runtime!("soil_cas");

    let rev1 = runtime.soil.bury("task:nats-2", Bytes::from_static(b"v0"), 0).await.unwrap();
    assert_eq!(rev1, 1);

    let err = runtime.soil.bury("task:nats-2", Bytes::from_static(b"stale"), 0).await.unwrap_err();
    assert!(matches!(err, nimsforest_core::CoreError::RevisionMismatch { .. }));

    let rev2 = runtime.soil.bury("task:nats-2", Bytes::from_static(b"v1"), rev1).await.unwrap();
    assert_eq!(rev2, 2);
}

#[tokio::test]
async fn river_durable_consumer_resumes_after_restart() {
    let runtime = nats_runtime!("river_resume");

    runtime.river.flow("river.resume.a", Bytes::from_static(b"1")).await.unwrap();

    let seen = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let mut consumer = runtime
        .river
        .observe_with_consumer(
            "river.resume.>",
            "resume-consumer",
            std::sync::Arc::new(move |record: nimsforest_core::RiverRecord| {
                let seen = seen2.clone();
                Box::pin(async move {
                    seen.lock().await.push(record.data.clone());
                    Ok(())
                })
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    consumer.stop().await;
    assert_eq!(seen.lock().await.len(), 1);

    runtime.river.flow("river.resume.b", Bytes::from_static(b"2")).await.unwrap();

    let seen3 = seen.clone();
    let mut consumer2 = runtime
        .river
        .observe_with_consumer(
            "river.resume.>",
            "resume-consumer",
            std::sync::Arc::new(move |record: nimsforest_core::RiverRecord| {
                let seen = seen3.clone();
                Box::pin(async move {
                    seen.lock().await.push(record.data.clone());
                    Ok(())
                })
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    consumer2.stop().await;

    // Same durable name resumes past what was already acked — only the
    // second record is redelivered, not both.
    assert_eq!(seen.lock().await.len(), 2);
}
