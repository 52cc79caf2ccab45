//! Single-flight connection tests.
//!
//! Tests cover:
//! - Concurrent callers for one address share one physical connect
//! - Fail-fast mode tells concurrent callers to retry later
//! - Different addresses connect independently

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use remotehub_core::config::ConnectionConfig;
use remotehub_core::model::{ConnectionType, Device};
use remotehub_devices::{
    ConnectionError, ConnectionManager, ConnectionState, MockAdapter, ProtocolAdapter,
};

fn tizen_adapter() -> (Arc<MockAdapter>, Arc<dyn ProtocolAdapter>) {
    let mock = Arc::new(MockAdapter::for_type("tizen", ConnectionType::Tizen).with_sessions());
    mock.set_connect_delay(Duration::from_millis(200));
    let adapter: Arc<dyn ProtocolAdapter> = mock.clone();
    (mock, adapter)
}

fn tv(id: i64, address: &str) -> Device {
    Device::new(id, "Samsung TV", ConnectionType::Tizen).with_address(address)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_connect() {
    let (mock, adapter) = tizen_adapter();
    let manager = ConnectionManager::new(ConnectionConfig::default());
    let device = tv(1, "10.0.0.30");

    let results = join_all((0..16).map(|_| {
        manager.get_connection(&adapter, &device, device.address.as_deref())
    }))
    .await;

    assert_eq!(mock.connect_count(), 1);
    let handles: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(handles.iter().all(|h| h.same_connection(&handles[0])));
    assert_eq!(manager.state("10.0.0.30"), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_a_failure() {
    let (mock, adapter) = tizen_adapter();
    mock.set_connect_failure(true);
    let manager = ConnectionManager::new(ConnectionConfig::default());
    let device = tv(1, "10.0.0.30");

    let results = join_all((0..4).map(|_| {
        manager.get_connection(&adapter, &device, device.address.as_deref())
    }))
    .await;

    assert_eq!(mock.connect_count(), 1);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(ConnectionError::Failed { .. }))));
    assert_eq!(manager.state("10.0.0.30"), ConnectionState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_mode_returns_retry_later() {
    let (mock, adapter) = tizen_adapter();
    let manager = Arc::new(ConnectionManager::new(ConnectionConfig {
        wait_for_in_flight: false,
        ..Default::default()
    }));
    let device = tv(1, "10.0.0.30");

    let first = {
        let manager = manager.clone();
        let adapter = adapter.clone();
        let device = device.clone();
        tokio::spawn(async move {
            manager
                .get_connection(&adapter, &device, device.address.as_deref())
                .await
        })
    };
    // Let the first caller start its connect.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.state("10.0.0.30"), ConnectionState::Connecting);

    let second = manager
        .get_connection(&adapter, &device, device.address.as_deref())
        .await;
    assert_eq!(
        second.unwrap_err(),
        ConnectionError::InFlight("10.0.0.30".to_string())
    );

    assert!(first.await.unwrap().is_ok());
    assert_eq!(mock.connect_count(), 1);

    // Once connected, the fail-fast caller gets the cached session.
    assert!(manager
        .get_connection(&adapter, &device, device.address.as_deref())
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_different_addresses_connect_in_parallel() {
    let (mock, adapter) = tizen_adapter();
    let manager = ConnectionManager::new(ConnectionConfig::default());
    let a = tv(1, "10.0.0.30");
    let b = tv(2, "10.0.0.31");

    let started = tokio::time::Instant::now();
    let (ra, rb) = tokio::join!(
        manager.get_connection(&adapter, &a, a.address.as_deref()),
        manager.get_connection(&adapter, &b, b.address.as_deref()),
    );
    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(mock.connect_count(), 2);
    // Both 200ms connects overlapped.
    assert!(started.elapsed() < Duration::from_millis(400));
}
