mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use common::{
    //
    client_with,
    client_with_policy,
    count,
    drain,
    eventually,
    next_event,
    queue_options,
};
use mom_client::{
    //
    ConnectionStatus,
    Error,
    EventKind,
    BrokerClient,
    ChannelObserver,
    MemoryBroker,
    ObserverPtr,
    ReconnectPolicy,
    RetryToken,
};

fn bounded(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_jitter: Duration::ZERO,
        max_attempts: Some(max_attempts),
    }
}

#[tokio::test]
async fn test_connect_declares_queue_and_reports() {
    // ---
    let broker = MemoryBroker::new();
    let (client, mut events) = client_with(&broker, queue_options("invoices"));

    client.connect(None).await.unwrap();

    assert!(client.is_connected());
    assert!(broker.has_queue("invoices"));
    assert_eq!(broker.client_products(), vec!["billing.invoices".to_string()]);

    let established = next_event(&mut events, "Connection established").await;
    assert_eq!(established.kind, EventKind::Info);
    assert_eq!(&*established.context.name, "billing.invoices");

    let asserted = next_event(&mut events, "Queue asserted").await;
    assert_eq!(asserted.context.get("queue_name"), Some("invoices"));
}

#[tokio::test]
async fn test_concurrent_connects_share_one_dial() {
    // ---
    let broker = MemoryBroker::new();
    broker.set_dial_delay(Some(Duration::from_millis(50)));
    let (client, _events) = client_with(&broker, queue_options("invoices"));

    let results = join_all((0..10).map(|_| client.connect(None))).await;

    let connections: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
    assert!(connections
        .iter()
        .all(|c| Arc::ptr_eq(c, &connections[0])));
    assert_eq!(broker.dial_count(), 1);
    assert_eq!(broker.live_connections(), 1);
}

#[tokio::test]
async fn test_channel_reuses_live_connection() {
    // ---
    let broker = MemoryBroker::new();
    let (client, _events) = client_with(&broker, queue_options("invoices"));

    assert!(matches!(client.current_channel(), Err(Error::NotConnected)));

    client.channel().await.unwrap();
    client.channel().await.unwrap();
    assert!(client.current_channel().is_ok());
    assert_eq!(broker.dial_count(), 1);
}

#[tokio::test]
async fn test_failed_dials_are_retried() {
    // ---
    let broker = MemoryBroker::new();
    broker.fail_next_dials(3);
    let (client, mut events) = client_with(&broker, queue_options("invoices"));

    client.connect(None).await.unwrap();

    assert_eq!(broker.dial_count(), 4);
    let seen = drain(&mut events);
    assert_eq!(count(&seen, "Connection failed"), 3);
    assert_eq!(count(&seen, "Connection established"), 1);
}

#[tokio::test]
async fn test_bounded_policy_gives_up() {
    // ---
    let broker = MemoryBroker::new();
    broker.fail_next_dials(10);
    let (client, _events) = client_with_policy(&broker, queue_options("invoices"), bounded(2));

    let err = client
        .connect(None)
        .await
        .err()
        .expect("bounded policy must give up");

    assert!(matches!(err, Error::ReconnectExhausted { attempts: 3 }));
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(broker.dial_count(), 3);
}

#[tokio::test]
async fn test_channel_failure_closes_half_open_connection() {
    // ---
    let broker = MemoryBroker::new();
    broker.fail_channel(true);
    let (client, mut events) = client_with_policy(&broker, queue_options("invoices"), bounded(0));

    assert!(client.connect(None).await.is_err());
    assert_eq!(broker.live_connections(), 0);

    let seen = drain(&mut events);
    assert_eq!(count(&seen, "Channel creation failed"), 1);
}

#[tokio::test]
async fn test_assertion_failure_is_reported_not_fatal() {
    // ---
    let broker = MemoryBroker::new();
    broker.fail_assert(true);
    let (client, mut events) = client_with(&broker, queue_options("invoices"));

    client.connect(None).await.unwrap();

    let failed = next_event(&mut events, "Queue assertion failed").await;
    assert_eq!(failed.kind, EventKind::Error);
    assert!(failed.context.get("error").is_some());
    next_event(&mut events, "Queue asserted").await;
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_broker_close_triggers_one_reconnect() {
    // ---
    let broker = MemoryBroker::new();
    let (client, mut events) = client_with(&broker, queue_options("invoices"));
    client.connect(None).await.unwrap();

    assert_eq!(broker.drop_connections(), 1);

    let closed = next_event(&mut events, "Connection closed").await;
    assert_eq!(closed.kind, EventKind::Error);
    next_event(&mut events, "Reconnecting to broker").await;

    eventually("client reconnected", || {
        client.is_connected() && broker.live_connections() == 1
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.dial_count(), 2);
    assert_eq!(broker.live_connections(), 1);
}

#[tokio::test]
async fn test_connection_error_triggers_reconnect() {
    // ---
    let broker = MemoryBroker::new();
    let (client, mut events) = client_with(&broker, queue_options("invoices"));
    client.connect(None).await.unwrap();

    broker.emit_error("heartbeat timeout");

    let error = next_event(&mut events, "Connection error").await;
    assert_eq!(error.context.get("error"), Some("heartbeat timeout"));

    eventually("old connection replaced", || {
        broker.dial_count() == 2 && broker.live_connections() == 1 && client.is_connected()
    })
    .await;
}

#[tokio::test]
async fn test_stop_clears_state_when_close_fails() {
    // ---
    let broker = MemoryBroker::new();
    let (client, mut events) = client_with(&broker, queue_options("invoices"));
    client.connect(None).await.unwrap();

    broker.fail_close(true);
    client.stop(None).await;

    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert!(matches!(client.current_channel(), Err(Error::NotConnected)));
    next_event(&mut events, "Connection closing error").await;

    broker.fail_close(false);
    client.connect(None).await.unwrap();
    assert_eq!(broker.dial_count(), 2);
}

#[tokio::test]
async fn test_stop_without_connection() {
    // ---
    let broker = MemoryBroker::new();
    let (client, mut events) = client_with(&broker, queue_options("invoices"));

    client.stop(None).await;

    let stopping = next_event(&mut events, "Stopping").await;
    assert_eq!(stopping.context.get("retry_token"), None);
    assert_eq!(broker.dial_count(), 0);
}

#[tokio::test]
async fn test_reconnect_carries_retry_token() {
    // ---
    let broker = MemoryBroker::new();
    let (client, mut events) = client_with(&broker, queue_options("invoices"));
    client.connect(None).await.unwrap();

    client
        .reconnect(Some(RetryToken::from_millis(42)))
        .await
        .unwrap();

    let reconnecting = next_event(&mut events, "Reconnecting to broker").await;
    assert_eq!(reconnecting.context.get("retry_token"), Some("42"));
    let stopping = next_event(&mut events, "Stopping").await;
    assert_eq!(stopping.context.get("retry_token"), Some("42"));

    assert!(client.is_connected());
    assert_eq!(broker.dial_count(), 2);
    assert_eq!(broker.live_connections(), 1);
}

#[tokio::test]
async fn test_stopped_link_does_not_reconnect() {
    // ---
    let broker = MemoryBroker::new();
    let (client, _events) = client_with(&broker, queue_options("invoices"));
    client.connect(None).await.unwrap();

    client.stop(None).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(broker.dial_count(), 1);
    assert_eq!(broker.live_connections(), 0);
}

#[tokio::test]
async fn test_abandoned_dial_does_not_keep_client_alive() {
    // ---
    let broker = MemoryBroker::new();
    broker.fail_next_dials(1000);

    let (observer, _events) = ChannelObserver::new();
    let observer: ObserverPtr = Arc::new(observer);
    let client = BrokerClient::builder()
        .driver(Arc::new(broker.clone()))
        .options(queue_options("invoices"))
        .observer_ptr(Arc::clone(&observer))
        .reconnect_policy(ReconnectPolicy {
            max_jitter: Duration::from_secs(60),
            max_attempts: None,
        })
        .build()
        .unwrap();

    let dialing = tokio::spawn({
        let client = client.clone();
        async move { client.connect(None).await.is_ok() }
    });
    eventually("first dial attempted", || broker.dial_count() >= 1).await;

    dialing.abort();
    assert!(dialing.await.is_err());
    assert_eq!(client.status(), ConnectionStatus::Connecting);

    drop(client);
    assert_eq!(Arc::strong_count(&observer), 1);
}
