use super::Inner;
use crate::{
    // ---
    ChannelPtr,
    DeclareOptions,
    Topology,
};

impl Inner {
    // ---

    /// Idempotently declare the configured queue or exchange.
    ///
    /// Failures are reported as error events; the completion event is
    /// emitted either way so owners can follow the sequence.
    pub(crate) async fn assert_topology(&self, channel: &ChannelPtr) {
        // ---
        let context = self.notifier.context();

        match &self.config.topology {
            Topology::Queue { name, durable } => {
                let context = context.with("queue_name", name);
                let options = DeclareOptions { durable: *durable };

                if let Err(e) = channel.assert_queue(name, options).await {
                    self.notifier
                        .error("Queue assertion failed", context.clone().with("error", &e));
                }
                self.notifier.info("Queue asserted", context);
            }
            Topology::Exchange {
                name,
                kind,
                durable,
                ..
            } => {
                let context = context
                    .with("exchange_name", name)
                    .with("exchange_type", kind);
                let options = DeclareOptions { durable: *durable };

                if let Err(e) = channel.assert_exchange(name, kind, options).await {
                    self.notifier.error(
                        "Exchange assertion failed",
                        context.clone().with("error", &e),
                    );
                }
                self.notifier.info("Exchange asserted", context);
            }
        }
    }
}
