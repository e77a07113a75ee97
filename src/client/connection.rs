//! Connection lifecycle.
//!
//! ```text
//! Disconnected --connect--> Connecting --dial ok--> Connected
//!                              |  ^                     |
//!                    dial failed  |                     | close / error event
//!                              v  |                     v
//!                        jittered delay        reconnect: stop, delay, connect
//! ```
//!
//! The `Connecting` state holds a shared future. Every caller arriving while
//! a dial is in flight awaits that same future, including across failed
//! attempts and their backoff, so a client never has two dials outstanding.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::{ConnectionState, DialOutcome, Inner, Link};
use crate::sync::lock_ignore_poison;
use crate::{
    // ---
    log_debug,
    log_warn,
    ChannelPtr,
    ClientProperties,
    ConnectionPtr,
    Error,
    LifecycleEvent,
    LifecycleHandle,
    Result,
    RetryToken,
};

/// A freshly dialed connection, not yet installed.
struct Dialed {
    connection: ConnectionPtr,
    channel: ChannelPtr,
    lifecycle: LifecycleHandle,
}

impl Inner {
    // ---

    /// Return the live link, joining or starting a dial as needed.
    pub(crate) async fn connect(self: &Arc<Self>, token: Option<RetryToken>) -> Result<Link> {
        // ---
        let pending = {
            let mut state = lock_ignore_poison(&self.state);
            match &*state {
                ConnectionState::Connected(link) => return Ok(link.clone()),
                ConnectionState::Connecting { pending, .. } => pending.clone(),
                ConnectionState::Disconnected => {
                    let id = self.next_id();
                    let token = token.unwrap_or_else(RetryToken::now);
                    let pending = self.establish(id, token).shared();
                    *state = ConnectionState::Connecting {
                        id,
                        pending: pending.clone(),
                    };
                    pending
                }
            }
        };

        pending
            .await
            .map_err(|attempts| Error::ReconnectExhausted { attempts })
    }

    /// Dial until a link is up or the policy gives up.
    ///
    /// The future holds only a weak reference between attempts, since it is
    /// parked in `self.state` for its whole lifetime.
    fn establish(self: &Arc<Self>, id: u64, token: RetryToken) -> BoxFuture<'static, DialOutcome> {
        // ---
        let weak = Arc::downgrade(self);

        Box::pin(async move {
            let mut failures: u32 = 0;

            loop {
                let Some(inner) = weak.upgrade() else {
                    return Err(failures);
                };

                let e = match inner.dial().await {
                    Ok(dialed) => {
                        let link = inner.install(id, dialed).await;
                        if failures > 0 && inner.consumer_active() {
                            inner.rearm_consumer().await;
                        }
                        return Ok(link);
                    }
                    Err(e) => e,
                };

                failures += 1;
                inner.notifier.error(
                    "Connection failed",
                    inner
                        .notifier
                        .context()
                        .with("error", &e)
                        .with("attempt", failures),
                );

                if !inner.config.reconnect.allows_retry(failures) {
                    inner.abandon(id);
                    return Err(failures);
                }

                // Same sequence as `reconnect`, minus the state reset: the
                // `Connecting` slot must stay occupied across the delay.
                let context = inner.notifier.context().with("retry_token", token);
                inner
                    .notifier
                    .info("Reconnecting to broker", context.clone());
                inner.notifier.info("Stopping", context);

                let delay = inner.config.reconnect.next_delay();
                drop(inner);
                tokio::time::sleep(delay).await;
            }
        })
    }

    /// Re-register the consumer on a link reached after failed dials.
    async fn rearm_consumer(self: &Arc<Self>) {
        // ---
        if let Err(e) = self.consume().await {
            self.notifier.error(
                "Consume error",
                self.notifier.context().with("error", &e),
            );
        }
    }

    /// One dial: connection, lifecycle subscription, channel, topology.
    async fn dial(&self) -> Result<Dialed> {
        // ---
        let properties = ClientProperties::new(self.config.identity.shared());
        let connection = self
            .driver
            .connect(&self.config.url, &properties)
            .await?;

        // Subscribe before anything else so an early drop is not missed.
        let lifecycle = connection.lifecycle();
        self.notifier
            .info("Connection established", self.notifier.context());

        match self.create_channel(&connection).await {
            Ok(channel) => Ok(Dialed {
                connection,
                channel,
                lifecycle,
            }),
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    log_warn!(
                        self.config.identity;
                        "closing half-open connection failed: {close_err}"
                    );
                }
                Err(e)
            }
        }
    }

    /// Open the channel on a fresh connection and declare the topology on it.
    async fn create_channel(&self, connection: &ConnectionPtr) -> Result<ChannelPtr> {
        // ---
        let channel = connection.create_channel().await.map_err(|e| {
            self.notifier.error(
                "Channel creation failed",
                self.notifier.context().with("error", &e),
            );
            e
        })?;

        self.assert_topology(&channel).await;
        Ok(channel)
    }

    /// Make a dialed link current, unless another one won the race.
    async fn install(self: &Arc<Self>, id: u64, dialed: Dialed) -> Link {
        // ---
        let link = Link {
            id,
            connection: dialed.connection,
            channel: dialed.channel,
        };

        let existing = {
            let mut state = lock_ignore_poison(&self.state);
            match &*state {
                ConnectionState::Connected(existing) => Some(existing.clone()),
                _ => {
                    *state = ConnectionState::Connected(link.clone());
                    None
                }
            }
        };

        match existing {
            Some(existing) => {
                log_debug!(self.config.identity; "discarding surplus connection {id}");
                if let Err(e) = link.connection.close().await {
                    self.notifier.error(
                        "Connection closing error",
                        self.notifier.context().with("error", &e),
                    );
                }
                existing
            }
            None => {
                self.watch(id, dialed.lifecycle);
                link
            }
        }
    }

    /// React to the first lifecycle event of link `link_id`.
    fn watch(self: &Arc<Self>, link_id: u64, mut lifecycle: LifecycleHandle) {
        // ---
        let weak = Arc::downgrade(self);

        tokio::spawn(async move {
            let Some(event) = lifecycle.events.recv().await else {
                return;
            };
            let Some(inner) = weak.upgrade() else {
                return;
            };

            if !inner.is_current(link_id) {
                log_debug!(inner.config.identity; "ignoring {event:?} from retired link {link_id}");
                return;
            }

            let context = inner.notifier.context();
            match event {
                LifecycleEvent::Closed => inner.notifier.error("Connection closed", context),
                LifecycleEvent::Error(reason) => inner
                    .notifier
                    .error("Connection error", context.with("error", reason)),
            }

            if let Err(e) = Arc::clone(&inner).reconnect(None).await {
                inner.notifier.error(
                    "Reconnect abandoned",
                    inner.notifier.context().with("error", &e),
                );
            }
        });
    }

    fn is_current(&self, link_id: u64) -> bool {
        matches!(
            &*lock_ignore_poison(&self.state),
            ConnectionState::Connected(link) if link.id == link_id
        )
    }

    /// Drop the `Connecting` slot of dial `id` after it gave up.
    fn abandon(&self, id: u64) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        if matches!(&*state, ConnectionState::Connecting { id: current, .. } if *current == id) {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Stop, wait the jittered delay, connect, and re-arm the consumer.
    pub(crate) fn reconnect(
        self: Arc<Self>,
        token: Option<RetryToken>,
    ) -> BoxFuture<'static, Result<()>> {
        // ---
        Box::pin(async move {
            let token = token.unwrap_or_else(RetryToken::now);
            self.notifier.info(
                "Reconnecting to broker",
                self.notifier.context().with("retry_token", token),
            );

            self.stop(Some(token)).await;
            tokio::time::sleep(self.config.reconnect.next_delay()).await;
            self.connect(Some(token)).await?;

            if self.consumer_active() {
                self.consume().await?;
            }
            Ok(())
        })
    }

    /// Close the current connection and reset to `Disconnected`.
    ///
    /// The state is cleared whether or not the close succeeds.
    pub(crate) async fn stop(&self, token: Option<RetryToken>) {
        // ---
        let mut context = self.notifier.context();
        if let Some(token) = token {
            context = context.with("retry_token", token);
        }
        self.notifier.info("Stopping", context);

        let previous = std::mem::replace(
            &mut *lock_ignore_poison(&self.state),
            ConnectionState::Disconnected,
        );

        if let ConnectionState::Connected(link) = previous {
            if let Err(e) = link.connection.close().await {
                self.notifier.error(
                    "Connection closing error",
                    self.notifier.context().with("error", &e),
                );
            }
        }
    }

    pub(crate) fn consumer_active(&self) -> bool {
        lock_ignore_poison(&self.consumer).active
    }
}
