use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while sending through a [`SendTransport`](crate::SendTransport).
///
/// Two broker conditions are deliberately *not* errors: a schedule time the
/// broker refuses ([`ScheduleOutcome::OutOfRange`](crate::ScheduleOutcome)) and
/// cancelling a scheduled message that no longer exists
/// ([`CancelOutcome::NotFound`](crate::CancelOutcome)). Both are recovered by
/// the transport and never reach the caller as a `SendError`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SendError {
    /// Non-retryable broker or connection fault.
    #[error("transport error: {0}")]
    Transport(String),

    /// Transient broker fault; retried when a retry policy is configured.
    #[error("transport error (retryable): {0}")]
    TransportRetryable(String),

    /// Payload could not be encoded into a broker message body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The caller's customization pipe rejected the send.
    #[error("send pipe failed: {0}")]
    Pipe(String),

    /// A send observer failed during `pre_send` or `post_send`.
    #[error("observer '{observer}' failed: {message}")]
    Observer {
        /// Name reported by the failing observer.
        observer: &'static str,
        /// Failure reported by the observer.
        message: String,
    },

    /// The operation observed its cancellation token.
    #[error("send cancelled")]
    Cancelled,

    /// A send was submitted after the transport began stopping.
    #[error("transport stopped")]
    TransportStopped,

    /// The context source has been closed and hands out no more clients.
    #[error("context source closed")]
    SourceClosed,

    /// A bounded stop gave up waiting for in-flight sends.
    #[error("stop grace {grace:?} exceeded with {in_flight} send(s) still in flight")]
    GraceExceeded {
        /// The configured grace period.
        grace: Duration,
        /// Operations still running when the grace period ended.
        in_flight: usize,
    },

    /// Required configuration parameter missing.
    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    /// Configuration parameters conflict with each other.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),
}

impl SendError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// ```
    /// use mom_send::SendError;
    ///
    /// assert_eq!(SendError::TransportStopped.as_label(), "transport_stopped");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SendError::Transport(_) => "transport",
            SendError::TransportRetryable(_) => "transport_retryable",
            SendError::Serialization(_) => "serialization",
            SendError::Pipe(_) => "pipe",
            SendError::Observer { .. } => "observer",
            SendError::Cancelled => "cancelled",
            SendError::TransportStopped => "transport_stopped",
            SendError::SourceClosed => "source_closed",
            SendError::GraceExceeded { .. } => "grace_exceeded",
            SendError::MissingConfig(_) => "missing_config",
            SendError::ConfigConflict(_) => "config_conflict",
        }
    }

    /// True for faults a retry policy may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SendError::TransportRetryable(_))
    }
}

/// Result type alias for send operations.
pub type Result<T> = std::result::Result<T, SendError>;
