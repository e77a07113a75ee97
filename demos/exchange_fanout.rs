//! Topic exchange publishing against the in-memory broker.
//!
//! One exchange client routes events under its prefix; two queue clients
//! bound with different patterns each see their share.
//!
//! Run with: cargo run --example exchange_fanout

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use mom_client::{
    //
    BrokerClient,
    ClientEvent,
    EventKind,
    MemoryBroker,
    MessageEnvelope,
    MqOptions,
    Result,
};

fn printing_observer(label: &'static str) -> impl Fn(ClientEvent) + Send + Sync + 'static {
    // ---
    move |event: ClientEvent| match event.kind {
        EventKind::Update => {
            if let Some(envelope) = event.payload.and_then(|b| MessageEnvelope::decode(&b).ok()) {
                println!("[{label}] {} {}", envelope.name, envelope.payload);
            }
        }
        EventKind::Error => println!("[{label}] error: {} ({})", event.message, event.context),
        _ => {}
    }
}

fn queue_client(broker: &MemoryBroker, queue: &str, label: &'static str) -> Result<BrokerClient> {
    // ---
    BrokerClient::builder()
        .driver(Arc::new(broker.clone()))
        .options(MqOptions::queue("memory://", "audit", queue))
        .observer(printing_observer(label))
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker = MemoryBroker::new();

    let publisher = BrokerClient::builder()
        .driver(Arc::new(broker.clone()))
        .options(
            MqOptions::exchange("memory://", "audit", "audit-events", "topic", "audit.")
                .with_service_name("audit"),
        )
        .observer(printing_observer("publisher"))
        .build()?;

    let users = queue_client(&broker, "audit-users", "users")?;
    let everything = queue_client(&broker, "audit-all", "all")?;

    // Declare everything, then wire the bindings out of band.
    publisher.connect(None).await?;
    users.consume().await?;
    everything.consume().await?;
    broker.bind_queue("audit-events", "audit-users", "audit.user.*")?;
    broker.bind_queue("audit-events", "audit-all", "audit.#")?;

    publisher
        .route_and_publish("userCreated", "user.created", &json!({ "id": 1 }))
        .await?;
    publisher
        .route_and_publish("orderPlaced", "order.placed", &json!({ "id": 2 }))
        .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;

    for client in [&publisher, &users, &everything] {
        client.stop(None).await;
    }
    Ok(())
}
