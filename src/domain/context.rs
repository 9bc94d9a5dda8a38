// src/domain/context.rs

//! Per-send context.
//!
//! A [`SendContext`] is created fresh for every call to
//! [`SendTransport::send`](crate::SendTransport::send) and is owned
//! exclusively by that call. It carries the application payload together with
//! a [`SendEnvelope`]: every piece of metadata the caller's pipe may adjust
//! before the broker message is built.
//!
//! The envelope is kept separate from the payload so that observers, logging
//! and the message builder can work on one non-generic type regardless of the
//! payload type. `SendContext<T>` dereferences to its envelope, so pipes write
//! `ctx.session_id = Some(..)` directly.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::InboundAffinity;

/// Application headers carried by a send.
///
/// Values are JSON values so that callers can attach numbers, booleans or
/// structured data; the message builder decides how non-string values reach
/// the wire.
pub type Headers = HashMap<String, serde_json::Value>;

/// Send metadata, independent of the payload type.
#[derive(Clone, Debug)]
pub struct SendEnvelope {
    // ---
    destination: String,

    /// Payload format (e.g. "application/json").
    pub content_type: Option<String>,

    /// Application headers, copied to the wire message's properties.
    pub headers: Headers,

    /// Time after which the broker may discard the message.
    pub time_to_live: Option<Duration>,

    /// Message identifier. A fresh v4 id is assigned on construction.
    pub message_id: Option<Uuid>,

    /// Correlation identifier linking this message to another one.
    pub correlation_id: Option<Uuid>,

    /// Conversation the message belongs to; the default session id.
    pub conversation_id: Option<Uuid>,

    /// Explicit partition key.
    pub partition_key: Option<String>,

    /// Explicit session id.
    pub session_id: Option<String>,

    /// Explicit reply-to session id.
    pub reply_to_session_id: Option<String>,

    /// Requested enqueue time. Only a time strictly in the future makes the
    /// transport schedule the message.
    pub scheduled_enqueue_time_utc: Option<DateTime<Utc>>,

    /// Caller-chosen token for a scheduled send. When set and the send is
    /// scheduled, the transport remembers the broker sequence number under
    /// this token so the send can later be cancelled by token.
    pub schedule_token_id: Option<Uuid>,

    scheduled_message_id: Option<i64>,
    consume_context: Option<Weak<dyn InboundAffinity>>,
    cancellation: CancellationToken,
}

impl SendEnvelope {
    /// Create an envelope addressed to `destination`.
    pub fn new(destination: impl Into<String>, cancellation: CancellationToken) -> Self {
        // ---
        Self {
            destination: destination.into(),
            content_type: None,
            headers: Headers::new(),
            time_to_live: None,
            message_id: Some(Uuid::new_v4()),
            correlation_id: None,
            conversation_id: None,
            partition_key: None,
            session_id: None,
            reply_to_session_id: None,
            scheduled_enqueue_time_utc: None,
            schedule_token_id: None,
            scheduled_message_id: None,
            consume_context: None,
            cancellation,
        }
    }

    /// Entity path the message is being sent to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Broker sequence number of the scheduled message.
    ///
    /// `Some(n)` with `n > 0` only after the broker accepted a scheduled
    /// send; `Some(0)` when a schedule request fell back to immediate
    /// delivery; `None` otherwise.
    pub fn scheduled_message_id(&self) -> Option<i64> {
        self.scheduled_message_id
    }

    pub(crate) fn set_scheduled_message_id(&mut self, sequence_number: i64) {
        self.scheduled_message_id = Some(sequence_number);
    }

    /// Attach the received message this send answers.
    ///
    /// Only a weak reference is kept; if the received context is dropped
    /// before the message is built, no affinity is inherited.
    pub fn attach_consume_context(&mut self, consume: &Arc<dyn InboundAffinity>) {
        self.consume_context = Some(Arc::downgrade(consume));
    }

    /// The attached received message, if it is still alive.
    pub fn consume_context(&self) -> Option<Arc<dyn InboundAffinity>> {
        self.consume_context.as_ref().and_then(Weak::upgrade)
    }

    /// Cancellation signal of the send call.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Set a header value.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.headers.insert(key.into(), value.into());
    }
}

/// Mutable per-message context of a single send.
#[derive(Debug)]
pub struct SendContext<T> {
    // ---
    payload: T,
    envelope: SendEnvelope,
}

impl<T> SendContext<T> {
    /// Create a context for `payload` addressed to `destination`.
    pub fn new(payload: T, destination: impl Into<String>, cancellation: CancellationToken) -> Self {
        // ---
        Self {
            payload,
            envelope: SendEnvelope::new(destination, cancellation),
        }
    }

    /// The application message. Immutable for the lifetime of the send.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Payload-independent metadata of this send.
    pub fn envelope(&self) -> &SendEnvelope {
        &self.envelope
    }

    /// Consume the context, keeping only its metadata.
    pub fn into_envelope(self) -> SendEnvelope {
        self.envelope
    }
}

impl<T> Deref for SendContext<T> {
    type Target = SendEnvelope;

    fn deref(&self) -> &SendEnvelope {
        &self.envelope
    }
}

impl<T> DerefMut for SendContext<T> {
    fn deref_mut(&mut self) -> &mut SendEnvelope {
        &mut self.envelope
    }
}
