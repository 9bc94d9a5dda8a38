//! Send transport builder.
//!
//! Provides a fluent builder API for configuring a [`SendTransport`] over a
//! context source, with retry, stop grace, logging and observer settings.

use std::sync::Arc;
use std::time::Duration;

use crate::send_transport::Inner;
use crate::supervisor::SendSupervisor;
use crate::{
    // ---
    BrokerMessageBuilder,
    ContextSourcePtr,
    ObserverRegistry,
    Result,
    RetryConfig,
    SendConfig,
    SendError,
    SendLog,
    SendLogPtr,
    SendTransport,
    TracingSendLog,
};

/// Builder for creating send transports.
///
/// Settings are given either one by one or as a complete [`SendConfig`];
/// mixing both is rejected by [`build`](Self::build).
///
/// # Examples
///
/// ## Memory broker with retry
/// ```
/// use mom_send::{MemoryBroker, SendTransportBuilder};
/// use std::time::Duration;
///
/// # fn example() -> mom_send::Result<()> {
/// let broker = MemoryBroker::new("orders");
///
/// let transport = SendTransportBuilder::new(broker.context_source(4)?)
///     .retry_max_attempts(5)
///     .retry_initial_delay(Duration::from_millis(50))
///     .stop_grace(Duration::from_secs(10))
///     .build()?;
///
/// assert_eq!(transport.entity_path(), "orders");
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
///
/// ## Complete configuration
/// ```
/// use mom_send::{MemoryBroker, SendConfig, SendTransportBuilder};
///
/// # fn example() -> mom_send::Result<()> {
/// let broker = MemoryBroker::new("orders");
/// let config = SendConfig::default().with_content_type("application/vnd.orders+json");
///
/// let transport = SendTransportBuilder::new(broker.context_source(1)?)
///     .config(config)
///     .build()?;
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub struct SendTransportBuilder {
    // ---
    source: ContextSourcePtr,
    config: Option<SendConfig>,

    content_type: Option<String>,
    stop_grace: Option<Duration>,

    // Retry configuration (all optional)
    retry_max_attempts: Option<u32>,
    retry_multiplier: Option<f32>,
    retry_initial_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,

    builder: BrokerMessageBuilder,
    observers: Option<ObserverRegistry>,
    log: Option<SendLogPtr>,
}

impl SendTransportBuilder {
    /// Create a builder sending through `source`.
    pub fn new(source: ContextSourcePtr) -> Self {
        // ---
        Self {
            source,
            config: None,
            content_type: None,
            stop_grace: None,
            retry_max_attempts: None,
            retry_multiplier: None,
            retry_initial_delay: None,
            retry_max_delay: None,
            builder: BrokerMessageBuilder::new(),
            observers: None,
            log: None,
        }
    }

    /// Use a complete configuration.
    ///
    /// Cannot be combined with the individual setters below.
    pub fn config(mut self, config: SendConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the default content type.
    ///
    /// Default: `application/json`.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Bound the wait for in-flight sends during stop.
    ///
    /// Default: wait until they finish.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = Some(grace);
        self
    }

    /// Set maximum retry attempts.
    ///
    /// Default: no retries (single attempt).
    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    /// Set retry backoff multiplier.
    ///
    /// Default: 2.0. Must be finite and non-negative.
    pub fn retry_multiplier(mut self, multiplier: f32) -> Self {
        self.retry_multiplier = Some(multiplier);
        self
    }

    /// Set initial delay before first retry.
    ///
    /// Default: 100ms.
    pub fn retry_initial_delay(mut self, delay: Duration) -> Self {
        self.retry_initial_delay = Some(delay);
        self
    }

    /// Set maximum delay between retry attempts.
    ///
    /// Default: 5s.
    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    /// Replace the conversion applied to non-string header values.
    pub fn header_converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(&str, &serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.builder = self.builder.with_header_converter(convert);
        self
    }

    /// Share an existing observer registry instead of starting empty.
    pub fn observers(mut self, observers: ObserverRegistry) -> Self {
        self.observers = Some(observers);
        self
    }

    /// Report transport events to `log`.
    ///
    /// Default: [`TracingSendLog`].
    pub fn log<L: SendLog + 'static>(mut self, log: L) -> Self {
        self.log = Some(Arc::new(log));
        self
    }

    /// Build the send transport (consumes self).
    ///
    /// # Errors
    ///
    /// - [`SendError::ConfigConflict`] if `config()` was combined with
    ///   individual settings
    /// - [`SendError::ConfigConflict`] if the retry multiplier is NaN,
    ///   infinite or negative
    /// - [`SendError::MissingConfig`] if the content type is blank
    pub fn build(self) -> Result<SendTransport> {
        // ---
        let has_individual = self.content_type.is_some()
            || self.stop_grace.is_some()
            || self.retry_max_attempts.is_some()
            || self.retry_multiplier.is_some()
            || self.retry_initial_delay.is_some()
            || self.retry_max_delay.is_some();

        let config = match self.config {
            Some(_) if has_individual => {
                return Err(SendError::ConfigConflict(
                    "Cannot use both config() and individual settings".into(),
                ));
            }
            Some(config) => config,
            None => {
                let defaults = RetryConfig::default();

                // Build retry config only if at least one retry parameter was set
                let retry_config = if self.retry_max_attempts.is_some()
                    || self.retry_multiplier.is_some()
                    || self.retry_initial_delay.is_some()
                    || self.retry_max_delay.is_some()
                {
                    Some(RetryConfig {
                        max_attempts: self.retry_max_attempts.unwrap_or(defaults.max_attempts),
                        multiplier: self.retry_multiplier.unwrap_or(defaults.multiplier),
                        initial_delay: self.retry_initial_delay.unwrap_or(defaults.initial_delay),
                        max_delay: self.retry_max_delay.unwrap_or(defaults.max_delay),
                    })
                } else {
                    None
                };

                let mut config = SendConfig {
                    retry_config,
                    stop_grace: self.stop_grace,
                    ..SendConfig::default()
                };
                if let Some(content_type) = self.content_type {
                    config.content_type = content_type;
                }
                config
            }
        };

        if config.content_type.trim().is_empty() {
            return Err(SendError::MissingConfig("content_type".into()));
        }

        if let Some(retry_config) = &config.retry_config {
            retry_config.validate()?;
        }

        let log = self.log.unwrap_or_else(|| Arc::new(TracingSendLog));

        log_debug!(
            entity = self.source.entity_path(),
            retry = config.retry_config.is_some(),
            "send transport built"
        );

        Ok(SendTransport::from_inner(Inner {
            supervisor: SendSupervisor::new(config.stop_grace),
            source: self.source,
            config,
            builder: self.builder,
            observers: self.observers.unwrap_or_default(),
            tokens: Default::default(),
            log,
        }))
    }
}
