//! AMQP driver implementation using `lapin`.
//!
//! Maps the domain driver traits onto an AMQP 0-9-1 broker connection.
//!
//! ## Connection behavior
//!
//! - The dial presents the client identity as the `product` client property,
//!   so management tooling shows which service owns the connection.
//! - Connection-level failures reported by lapin (`on_error`) are forwarded
//!   as `LifecycleEvent::Error` followed by `LifecycleEvent::Closed`; lapin
//!   only reports errors once the connection is unusable.
//! - A close initiated through [`BrokerConnection::close`] raises
//!   `LifecycleEvent::Closed` as well.
//!
//! ## Consumption
//!
//! Each `consume()` call registers a fresh consumer with a unique tag. A
//! background task forwards the lapin delivery stream into the handle's
//! inbox and ends when the stream ends (channel or connection closed).
//!
//! ## Scope and limitations
//!
//! - Publisher confirms are not awaited; a publish succeeds once the frame is
//!   handed to the connection.
//! - Channel-level errors (e.g. publishing to a missing exchange) close the
//!   channel on the broker side. The next operation on it fails and is
//!   reported by the client like any other operational error.

use lapin::{
    //
    options::{
        //
        BasicAckOptions,
        BasicConsumeOptions,
        BasicPublishOptions,
        ExchangeDeclareOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties,
    Channel,
    Connection,
    ConnectionProperties,
};

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::sync::lock_ignore_poison;
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    BrokerChannel,
    BrokerConnection,
    BrokerDriver,
    ChannelPtr,
    ClientProperties,
    ConnectionPtr,
    ConsumerHandle,
    DeclareOptions,
    Delivery,
    Error,
    ExchangeKind,
    LifecycleEvent,
    LifecycleHandle,
    Result,
};

type Watchers = Arc<Mutex<Vec<mpsc::UnboundedSender<LifecycleEvent>>>>;

fn notify(watchers: &Watchers, event: LifecycleEvent) {
    // ---
    let watchers = lock_ignore_poison(watchers);
    for watcher in watchers.iter() {
        let _ = watcher.send(event.clone());
    }
}

/// Driver dialing AMQP 0-9-1 brokers through lapin.
#[derive(Debug, Clone, Default)]
pub struct LapinDriver;

impl LapinDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl BrokerDriver for LapinDriver {
    // ---
    async fn connect(&self, url: &str, properties: &ClientProperties) -> Result<ConnectionPtr> {
        // ---
        let mut options = ConnectionProperties::default();
        options.client_properties.insert(
            "product".into(),
            AMQPValue::LongString(properties.product.to_string().into()),
        );

        log_info!(properties.product; "connecting to AMQP broker");

        let connection = Connection::connect(url, options).await.map_err(|e| {
            let msg = format!("amqp: connection failed: {e}");
            log_error!(properties.product; "{msg}");
            Error::Driver(msg)
        })?;

        let watchers: Watchers = Arc::new(Mutex::new(Vec::new()));
        {
            let watchers = Arc::clone(&watchers);
            let product = Arc::clone(&properties.product);
            connection.on_error(move |err| {
                log_error!(product; "amqp: connection error: {err}");
                notify(&watchers, LifecycleEvent::Error(err.to_string()));
                notify(&watchers, LifecycleEvent::Closed);
            });
        }

        Ok(Arc::new(LapinConnection {
            product: Arc::clone(&properties.product),
            connection,
            watchers,
        }))
    }
}

struct LapinConnection {
    product: Arc<str>,
    connection: Connection,
    watchers: Watchers,
}

#[async_trait::async_trait]
impl BrokerConnection for LapinConnection {
    // ---
    async fn create_channel(&self) -> Result<ChannelPtr> {
        // ---
        let channel = self.connection.create_channel().await.map_err(|e| {
            Error::Driver(format!("amqp: channel creation failed: {e}"))
        })?;

        log_debug!(self.product; "created AMQP channel {}", channel.id());

        Ok(Arc::new(LapinChannel {
            product: Arc::clone(&self.product),
            channel,
        }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.connection
            .close(200, "Normal shutdown".into())
            .await
            .map_err(|e| Error::Driver(format!("amqp: close failed: {e}")))?;

        notify(&self.watchers, LifecycleEvent::Closed);
        Ok(())
    }

    fn lifecycle(&self) -> LifecycleHandle {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        lock_ignore_poison(&self.watchers).push(tx);
        LifecycleHandle { events: rx }
    }
}

struct LapinChannel {
    product: Arc<str>,
    channel: Channel,
}

fn lapin_kind(kind: &ExchangeKind) -> lapin::ExchangeKind {
    // ---
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        ExchangeKind::Custom(other) => lapin::ExchangeKind::Custom(other.clone()),
    }
}

#[async_trait::async_trait]
impl BrokerChannel for LapinChannel {
    // ---
    async fn assert_queue(&self, name: &str, options: DeclareOptions) -> Result<()> {
        // ---
        let queue_opts = QueueDeclareOptions {
            durable: options.durable,
            ..QueueDeclareOptions::default()
        };

        self.channel
            .queue_declare(name.into(), queue_opts, FieldTable::default())
            .await
            .map_err(|e| Error::Driver(format!("amqp: queue declare failed: {e}")))?;

        log_debug!(self.product; "declared queue: {name}");
        Ok(())
    }

    async fn assert_exchange(
        &self,
        name: &str,
        kind: &ExchangeKind,
        options: DeclareOptions,
    ) -> Result<()> {
        // ---
        let exchange_opts = ExchangeDeclareOptions {
            durable: options.durable,
            ..ExchangeDeclareOptions::default()
        };

        self.channel
            .exchange_declare(
                name.into(),
                lapin_kind(kind),
                exchange_opts,
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Driver(format!("amqp: exchange declare failed: {e}")))?;

        log_debug!(self.product; "declared {kind} exchange: {name}");
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<()> {
        // ---
        self.channel
            .basic_publish(
                "".into(),    // default exchange
                queue.into(), // routing key = queue name
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| Error::Driver(format!("amqp: publish failed: {e}")))?;

        Ok(())
    }

    async fn publish(&self, exchange: &str, routing_key: &str, payload: Bytes) -> Result<()> {
        // ---
        self.channel
            .basic_publish(
                exchange.into(),
                routing_key.into(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| Error::Driver(format!("amqp: publish failed: {e}")))?;

        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<ConsumerHandle> {
        // ---
        let consumer_tag = format!("{}-{}", self.product, uuid::Uuid::new_v4());

        let consumer = self
            .channel
            .basic_consume(
                queue.into(),
                consumer_tag.as_str().into(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::Driver(format!("amqp: consume failed: {e}")))?;

        log_info!(self.product; "started consuming queue: {queue}");

        let (tx, rx) = mpsc::unbounded_channel();
        let product = Arc::clone(&self.product);
        let queue_name = queue.to_string();

        tokio::spawn(async move {
            use futures_lite::stream::StreamExt;

            let mut consumer = consumer;
            while let Some(delivery_result) = consumer.next().await {
                match delivery_result {
                    Ok(delivery) => {
                        let forwarded = Delivery {
                            delivery_tag: delivery.delivery_tag,
                            routing_key: Arc::from(delivery.routing_key.as_str()),
                            redelivered: delivery.redelivered,
                            payload: Bytes::from(delivery.data),
                        };
                        if tx.send(forwarded).is_err() {
                            log_debug!(product; "consumer inbox dropped for queue: {queue_name}");
                            break;
                        }
                    }
                    Err(e) => {
                        log_error!(product; "consumer error on {queue_name}: {e}");
                        break;
                    }
                }
            }

            log_debug!(product; "consumer task ended for queue: {queue_name}");
        });

        Ok(ConsumerHandle {
            consumer_tag: Arc::from(consumer_tag),
            inbox: rx,
        })
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        // ---
        self.channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| Error::Driver(format!("amqp: ack failed: {e}")))
    }
}
