#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedReceiver;

use mom_client::{
    //
    BrokerClient,
    ChannelObserver,
    ClientEvent,
    MemoryBroker,
    MqOptions,
    ReconnectPolicy,
};

pub const WAIT: Duration = Duration::from_secs(2);

pub type Events = UnboundedReceiver<ClientEvent>;

pub fn init_tracing() {
    // ---
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Client on `broker` that reconnects without delay.
pub fn client_with(broker: &MemoryBroker, options: MqOptions) -> (BrokerClient, Events) {
    // ---
    client_with_policy(broker, options, ReconnectPolicy::immediate())
}

pub fn client_with_policy(
    broker: &MemoryBroker,
    options: MqOptions,
    policy: ReconnectPolicy,
) -> (BrokerClient, Events) {
    // ---
    init_tracing();

    let (observer, events) = ChannelObserver::new();
    let client = BrokerClient::builder()
        .driver(Arc::new(broker.clone()))
        .options(options)
        .observer(observer)
        .reconnect_policy(policy)
        .build()
        .expect("valid client options");

    (client, events)
}

pub fn queue_options(queue: &str) -> MqOptions {
    MqOptions::queue("memory://", "billing", queue)
}

pub fn exchange_options(exchange: &str, kind: &str, prefix: &str) -> MqOptions {
    MqOptions::exchange("memory://", "audit", exchange, kind, prefix)
}

/// Wait for the next event with `message`, skipping others.
pub async fn next_event(events: &mut Events, message: &str) -> ClientEvent {
    // ---
    let search = async {
        loop {
            match events.recv().await {
                Some(event) if event.message == message => return event,
                Some(_) => continue,
                None => panic!("observer channel closed while waiting for '{message}'"),
            }
        }
    };

    tokio::time::timeout(WAIT, search)
        .await
        .unwrap_or_else(|_| panic!("no '{message}' event within {WAIT:?}"))
}

/// Every event already delivered, without waiting.
pub fn drain(events: &mut Events) -> Vec<ClientEvent> {
    // ---
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn count(events: &[ClientEvent], message: &str) -> usize {
    events.iter().filter(|e| e.message == message).count()
}

/// Poll `condition` until it holds or the wait limit passes.
pub async fn eventually<F>(description: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    // ---
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition not met within {WAIT:?}: {description}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
