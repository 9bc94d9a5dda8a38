//! Injected logging capability.
//!
//! The send transport reports its domain events (sent, scheduled, fallback,
//! cancellation, stop) through a [`SendLog`] passed in at construction time
//! instead of a process-wide logger. The default [`TracingSendLog`] forwards
//! to the crate's logging macros (`tracing` when the `logging` feature is
//! enabled). Tests and embedders can supply their own implementation to
//! capture or reroute these events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{SendEnvelope, SendError};

/// Receiver of send transport log events.
///
/// Every method defaults to doing nothing.
pub trait SendLog: Send + Sync {
    /// A message was handed to the broker for immediate delivery.
    fn sent(&self, _envelope: &SendEnvelope) {}

    /// A message was scheduled and the broker returned `sequence_number`.
    fn scheduled(&self, _envelope: &SendEnvelope, _enqueue_at: DateTime<Utc>, _sequence_number: i64) {}

    /// The broker refused `enqueue_at`; the message is delivered immediately.
    fn schedule_fallback(&self, _envelope: &SendEnvelope, _enqueue_at: DateTime<Utc>) {}

    /// A scheduled message was cancelled.
    fn cancelled_scheduled(&self, _entity_path: &str, _sequence_number: i64) {}

    /// A scheduled message to cancel no longer exists.
    fn cancel_not_found(&self, _entity_path: &str, _sequence_number: i64) {}

    /// A cancel-by-token named a token with no recorded schedule.
    fn unknown_schedule_token(&self, _entity_path: &str, _token_id: Uuid) {}

    /// A send faulted; the fault is about to be returned to the caller.
    fn faulted(&self, _envelope: &SendEnvelope, _error: &SendError) {}

    /// A `send_fault` observer failed.
    fn observer_faulted(&self, _observer: &str, _message: &str) {}

    /// The transport began stopping with `in_flight` sends still running.
    fn stopping(&self, _entity_path: &str, _in_flight: usize) {}

    /// The transport stopped; no sends remain in flight.
    fn stopped(&self, _entity_path: &str) {}

    /// The stop grace period ran out with `in_flight` sends still running.
    /// The context source has been closed regardless.
    fn stop_grace_exceeded(&self, _entity_path: &str, _grace: Duration, _in_flight: usize) {}
}

/// Shared log pointer.
pub type SendLogPtr = Arc<dyn SendLog>;

/// [`SendLog`] backed by the crate's logging macros.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSendLog;

#[cfg_attr(not(feature = "logging"), allow(unused_variables))]
impl SendLog for TracingSendLog {
    fn sent(&self, envelope: &SendEnvelope) {
        log_debug!(
            entity = envelope.destination(),
            message_id = ?envelope.message_id,
            "message sent"
        );
    }

    fn scheduled(&self, envelope: &SendEnvelope, enqueue_at: DateTime<Utc>, sequence_number: i64) {
        log_debug!(
            entity = envelope.destination(),
            message_id = ?envelope.message_id,
            sequence_number,
            %enqueue_at,
            "message scheduled"
        );
    }

    fn schedule_fallback(&self, envelope: &SendEnvelope, enqueue_at: DateTime<Utc>) {
        log_warn!(
            entity = envelope.destination(),
            message_id = ?envelope.message_id,
            %enqueue_at,
            "enqueue time refused by broker, sending immediately"
        );
    }

    fn cancelled_scheduled(&self, entity_path: &str, sequence_number: i64) {
        log_debug!(entity = entity_path, sequence_number, "scheduled message cancelled");
    }

    fn cancel_not_found(&self, entity_path: &str, sequence_number: i64) {
        log_debug!(
            entity = entity_path,
            sequence_number,
            "scheduled message not found, nothing to cancel"
        );
    }

    fn unknown_schedule_token(&self, entity_path: &str, token_id: Uuid) {
        log_debug!(entity = entity_path, %token_id, "no scheduled message recorded for token");
    }

    fn faulted(&self, envelope: &SendEnvelope, error: &SendError) {
        log_error!(
            "send to {} faulted ({}): {}",
            envelope.destination(),
            error.as_label(),
            error
        );
    }

    fn observer_faulted(&self, observer: &str, message: &str) {
        log_warn!(observer, error = message, "send fault observer failed");
    }

    fn stopping(&self, entity_path: &str, in_flight: usize) {
        log_info!(entity = entity_path, in_flight, "stopping send transport");
    }

    fn stopped(&self, entity_path: &str) {
        log_info!(entity = entity_path, "send transport stopped");
    }

    fn stop_grace_exceeded(&self, entity_path: &str, grace: Duration, in_flight: usize) {
        log_warn!(
            entity = entity_path,
            ?grace,
            in_flight,
            "stop grace exceeded, send transport stopped with sends in flight"
        );
    }
}
