//! Publish, route and consume.
//!
//! Wrong-mode calls and unserializable payloads are returned as errors.
//! Everything that can go wrong on the wire is reported to the observer and
//! the call still succeeds: the message is dropped, not retried.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use super::Inner;
use crate::observer::Notifier;
use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    ChannelPtr,
    ConsumerHandle,
    Error,
    MessageEnvelope,
    Result,
    Topology,
};

impl Inner {
    // ---

    pub(crate) async fn publish<T>(self: &Arc<Self>, event_name: &str, payload: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        // ---
        let Topology::Queue { name: queue, .. } = &self.config.topology else {
            return Err(Error::InvalidMode(
                "publish() requires a queue client; use route_and_publish()".into(),
            ));
        };

        let link = self.connect(None).await?;
        let body = self.encode(event_name, payload)?;

        let context = self
            .notifier
            .context()
            .with("queue_name", queue)
            .with("event", event_name);

        match link.channel.send_to_queue(queue, body).await {
            Ok(()) => self.notifier.debug("Message sent to queue", context),
            Err(e) => self.notifier.error("Publish error", context.with("error", &e)),
        }
        Ok(())
    }

    pub(crate) async fn route_and_publish<T>(
        self: &Arc<Self>,
        event_name: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        // ---
        let Topology::Exchange {
            name: exchange,
            routing_prefix,
            ..
        } = &self.config.topology
        else {
            return Err(Error::InvalidMode(
                "route_and_publish() requires an exchange client; use publish()".into(),
            ));
        };

        let link = self.connect(None).await?;
        let body = self.encode(event_name, payload)?;
        let routing_key = format!("{routing_prefix}{routing_key}");

        let context = self
            .notifier
            .context()
            .with("exchange_name", exchange)
            .with("routing_key", &routing_key)
            .with("event", event_name);

        match link.channel.publish(exchange, &routing_key, body).await {
            Ok(()) => self.notifier.debug("Message routed to exchange", context),
            Err(e) => self
                .notifier
                .error("Exchange publish error", context.with("error", &e)),
        }
        Ok(())
    }

    /// Register (or re-register after a reconnect) the queue consumer.
    ///
    /// Idempotent per link: a second call on the same connection is a no-op.
    pub(crate) async fn consume(self: &Arc<Self>) -> Result<()> {
        // ---
        let Some(queue) = self.config.topology.queue_name() else {
            return Err(Error::InvalidMode(
                "consume() requires a queue client".into(),
            ));
        };

        lock_ignore_poison(&self.consumer).active = true;
        let link = self.connect(None).await?;

        {
            let mut registration = lock_ignore_poison(&self.consumer);
            if registration.link_id == Some(link.id) {
                return Ok(());
            }
            registration.link_id = Some(link.id);
        }

        let context = self.notifier.context().with("queue_name", queue);
        self.notifier.info("Consuming messages", context.clone());

        let handle = match link.channel.consume(queue).await {
            Ok(handle) => handle,
            Err(e) => {
                self.notifier.error("Consume error", context.with("error", &e));
                let mut registration = lock_ignore_poison(&self.consumer);
                if registration.link_id == Some(link.id) {
                    registration.link_id = None;
                }
                return Ok(());
            }
        };

        let task = tokio::spawn(run_consumer(
            Arc::clone(&link.channel),
            self.notifier.clone(),
            queue.to_string(),
            handle,
        ));

        // A reconnect may have registered a newer link while this one was
        // subscribing; the newer consumer wins.
        let mut registration = lock_ignore_poison(&self.consumer);
        if registration.link_id != Some(link.id) {
            task.abort();
            return Ok(());
        }
        if let Some(previous) = registration.task.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn encode<T>(&self, event_name: &str, payload: &T) -> Result<Bytes>
    where
        T: Serialize + ?Sized,
    {
        MessageEnvelope::from_serialize(&self.config.message, event_name, payload)?.encode()
    }
}

/// Deliver each message to the observer, then acknowledge it.
async fn run_consumer(
    channel: ChannelPtr,
    notifier: Notifier,
    queue: String,
    mut handle: ConsumerHandle,
) {
    // ---
    while let Some(delivery) = handle.inbox.recv().await {
        let context = notifier
            .context()
            .with("queue_name", &queue)
            .with("delivery_tag", delivery.delivery_tag);

        notifier.update(delivery.payload.clone(), context.clone());

        if let Err(e) = channel.ack(&delivery).await {
            notifier.error("Ack error", context.with("error", &e));
        }
    }

    notifier.debug(
        "Consumer stopped",
        notifier
            .context()
            .with("queue_name", &queue)
            .with("consumer_tag", &handle.consumer_tag),
    );
}
