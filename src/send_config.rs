//! Send transport configuration.
//!
//! Broker-independent settings only; the entity being sent to is owned by
//! the [`ContextSource`](crate::ContextSource).

use std::time::Duration;

use crate::RetryConfig;

/// Content type stamped on every send unless the pipe overrides it.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Send transport configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SendConfig {
    // ---
    /// Content type set on each new [`SendContext`](crate::SendContext).
    ///
    /// Default: `application/json`, matching the JSON body encoding.
    pub content_type: String,

    /// Optional retry of immediate sends on retryable broker faults.
    ///
    /// Scheduled sends and cancellations are never retried.
    pub retry_config: Option<RetryConfig>,

    /// Upper bound on how long [`stop`](crate::SendTransport::stop) waits for
    /// in-flight sends. `None` waits until they all finish.
    pub stop_grace: Option<Duration>,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            content_type: DEFAULT_CONTENT_TYPE.to_owned(),
            retry_config: None,
            stop_grace: None,
        }
    }
}

impl SendConfig {
    /// Set the default content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Configure retry behavior with exponential backoff.
    ///
    /// ```
    /// use mom_send::{RetryConfig, SendConfig};
    ///
    /// let config = SendConfig::default().with_retry(RetryConfig::default());
    /// assert!(config.retry_config.is_some());
    /// ```
    pub fn with_retry(mut self, config: RetryConfig) -> Self {
        self.retry_config = Some(config);
        self
    }

    /// Bound the wait for in-flight sends during stop.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = Some(grace);
        self
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_defaults() {
        // ---
        let config = SendConfig::default();

        assert_eq!(config.content_type, "application/json");
        assert!(config.retry_config.is_none());
        assert!(config.stop_grace.is_none());
    }

    #[test]
    fn test_chaining() {
        // ---
        let config = SendConfig::default()
            .with_content_type("application/xml")
            .with_stop_grace(Duration::from_secs(2));

        assert_eq!(config.content_type, "application/xml");
        assert_eq!(config.stop_grace, Some(Duration::from_secs(2)));
    }
}
