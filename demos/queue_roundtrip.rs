//! Queue round trip against the in-memory broker.
//!
//! Publishes a few events, consumes them back, then simulates a broker
//! restart and shows the consumer coming back on its own.
//!
//! Run with: RUST_LOG=mom_client=debug cargo run --example queue_roundtrip

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use mom_client::{
    //
    BrokerClient,
    ChannelObserver,
    EventKind,
    MemoryBroker,
    MessageEnvelope,
    MqOptions,
    ReconnectPolicy,
    Result,
};

#[derive(Serialize)]
struct InvoiceCreated {
    id: u32,
    customer: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let broker = MemoryBroker::new();
    let (observer, mut events) = ChannelObserver::new();

    let client = BrokerClient::builder()
        .driver(Arc::new(broker.clone()))
        .options(MqOptions::queue("memory://", "billing", "invoices").with_service_name("billing"))
        .observer(observer)
        .reconnect_policy(ReconnectPolicy {
            max_jitter: Duration::from_millis(200),
            max_attempts: None,
        })
        .build()?;

    // ---
    // Print every delivered envelope
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match (event.kind, event.payload) {
                (EventKind::Update, Some(body)) => match MessageEnvelope::decode(&body) {
                    Ok(envelope) => println!("received {} -> {}", envelope.name, envelope.payload),
                    Err(e) => println!("undecodable message: {e}"),
                },
                (EventKind::Error, _) => println!("error: {} ({})", event.message, event.context),
                _ => {}
            }
        }
    });

    client.consume().await?;

    for id in 1..=3 {
        client
            .publish("invoiceCreated", &InvoiceCreated { id, customer: "acme" })
            .await?;
    }

    // ---
    // Simulate a broker restart; the client reconnects and re-consumes
    tokio::time::sleep(Duration::from_millis(100)).await;
    println!("dropping {} broker connection(s)", broker.drop_connections());
    tokio::time::sleep(Duration::from_millis(500)).await;

    client
        .publish("invoiceCreated", &InvoiceCreated { id: 4, customer: "globex" })
        .await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("dials: {}, status: {:?}", broker.dial_count(), client.status());

    client.stop(None).await;
    drop(client);
    printer.abort();
    Ok(())
}
