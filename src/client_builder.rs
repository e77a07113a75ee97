//! Broker client builder.
//!
//! Collects the driver, options and observer, validates them and produces a
//! ready-to-use [`BrokerClient`]. Nothing touches the network until the
//! client's first operation.

use std::sync::Arc;

use crate::{
    // ---
    BrokerClient,
    ClientConfig,
    ClientObserver,
    DriverPtr,
    Error,
    MqOptions,
    ObserverPtr,
    ReconnectPolicy,
    Result,
};

/// Builder for [`BrokerClient`].
///
/// # Examples
///
/// ## Queue client
/// ```
/// use mom_client::{BrokerClientBuilder, ChannelObserver, MemoryBroker, MqOptions};
/// use std::sync::Arc;
///
/// let (observer, _events) = ChannelObserver::new();
/// let client = BrokerClientBuilder::new()
///     .driver(Arc::new(MemoryBroker::new()))
///     .options(MqOptions::queue("memory://", "billing", "invoices"))
///     .observer(observer)
///     .build()
///     .unwrap();
///
/// assert_eq!(client.identity().as_str(), "billing.invoices");
/// ```
///
/// ## Exchange client with a bounded reconnect policy
/// ```
/// use mom_client::{BrokerClientBuilder, ClientEvent, MemoryBroker, MqOptions, ReconnectPolicy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let client = BrokerClientBuilder::new()
///     .driver(Arc::new(MemoryBroker::new()))
///     .options(MqOptions::exchange("memory://", "audit", "events", "topic", "audit."))
///     .observer(|event: ClientEvent| println!("{:?}: {}", event.kind, event.message))
///     .reconnect_policy(ReconnectPolicy {
///         max_jitter: Duration::from_millis(500),
///         max_attempts: Some(10),
///     })
///     .build()
///     .unwrap();
///
/// assert_eq!(client.identity().as_str(), "audit.events");
/// ```
#[derive(Default)]
pub struct BrokerClientBuilder {
    // ---
    driver: Option<DriverPtr>,
    options: Option<MqOptions>,
    observer: Option<ObserverPtr>,
    reconnect: Option<ReconnectPolicy>,
}

impl BrokerClientBuilder {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker driver used to dial connections.
    pub fn driver(mut self, driver: DriverPtr) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Construction options.
    pub fn options(mut self, options: MqOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Event observer (required).
    pub fn observer(mut self, observer: impl ClientObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Share an observer between several clients.
    pub fn observer_ptr(mut self, observer: ObserverPtr) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Override the reconnect policy.
    ///
    /// Default: up to 3s of jitter, unlimited attempts.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }

    /// Validate and build the client.
    ///
    /// # Errors
    ///
    /// The first violated rule, in this order: missing driver, missing
    /// options, missing url, missing name, missing or unknown type, missing
    /// queue or exchange fields, missing observer.
    pub fn build(self) -> Result<BrokerClient> {
        // ---
        let mut config = ClientConfig::validate(self.driver.as_ref(), self.options.as_ref())?;
        let observer = self.observer.ok_or(Error::MissingConfig("observer"))?;

        if let Some(policy) = self.reconnect {
            config.reconnect = policy;
        }

        // Validation guarantees the driver is present.
        let driver = self.driver.ok_or(Error::MissingConfig("broker driver"))?;

        Ok(BrokerClient::new(driver, config, observer))
    }
}
