// src/domain/client.rs

//! Client context and context source abstractions.
//!
//! This module defines the domain-level broker interface used by the send
//! transport. It intentionally avoids any reference to concrete brokers,
//! SDKs or connection pools.
//!
//! - A [`ClientContext`] is one usable handle on a broker entity (queue or
//!   topic). It sends, schedules and cancels scheduled messages.
//! - A [`ContextSource`] hands out client contexts as [`ClientLease`]s. A
//!   lease returns its context to the source when dropped, so release happens
//!   on every exit path of a send, including faults and cancellation.
//!
//! The two broker conditions the transport recovers from locally are
//! expressed as outcome variants ([`ScheduleOutcome::OutOfRange`],
//! [`CancelOutcome::NotFound`]) rather than errors; everything else is a
//! [`SendError`](crate::SendError).
//!
//! Concrete implementations live under `src/client/`.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::BrokerMessage;
use crate::Result;

/// Result of asking the broker to schedule a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The broker accepted the message and assigned this sequence number.
    Scheduled(i64),

    /// The broker refused the requested enqueue time. Nothing was scheduled.
    OutOfRange,
}

/// Result of asking the broker to cancel a scheduled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The scheduled message was removed.
    Cancelled,

    /// No scheduled message with that sequence number exists (it already
    /// fired, was cancelled before, or never existed).
    NotFound,
}

/// One usable broker entity handle.
///
/// Implementations must be safe to call concurrently when their source
/// shares them between sends; a pooled source checks them out exclusively.
/// All operations should observe the supplied cancellation token and fail
/// with [`SendError::Cancelled`](crate::SendError::Cancelled) when it fires
/// before the broker accepted the request.
#[async_trait::async_trait]
pub trait ClientContext: Send + Sync {
    // ---
    /// Path of the entity this context sends to.
    fn entity_path(&self) -> &str;

    /// Hand `message` to the broker for immediate delivery.
    async fn send(&self, message: BrokerMessage, cancel: &CancellationToken) -> Result<()>;

    /// Ask the broker to enqueue `message` at `enqueue_at`.
    async fn schedule_send(
        &self,
        message: BrokerMessage,
        enqueue_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome>;

    /// Cancel a previously scheduled message.
    async fn cancel_scheduled_send(
        &self,
        sequence_number: i64,
        cancel: &CancellationToken,
    ) -> Result<CancelOutcome>;
}

/// Shared client context pointer.
pub type ClientContextPtr = Arc<dyn ClientContext>;

type Release = Box<dyn FnOnce(ClientContextPtr) + Send + Sync>;

/// A client context borrowed from a [`ContextSource`].
///
/// Dereferences to the [`ClientContext`]. Dropping the lease gives the
/// context back to its source.
pub struct ClientLease {
    // ---
    client: ClientContextPtr,
    release: Option<Release>,
}

impl ClientLease {
    /// A lease with nothing to give back (the context is shared).
    pub fn shared(client: ClientContextPtr) -> Self {
        Self {
            client,
            release: None,
        }
    }

    /// A lease that runs `release` with the context when dropped.
    pub fn with_release<F>(client: ClientContextPtr, release: F) -> Self
    where
        F: FnOnce(ClientContextPtr) + Send + Sync + 'static,
    {
        Self {
            client,
            release: Some(Box::new(release)),
        }
    }
}

impl Deref for ClientLease {
    type Target = dyn ClientContext;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for ClientLease {
    fn drop(&mut self) {
        // ---
        if let Some(release) = self.release.take() {
            release(self.client.clone());
        }
    }
}

impl fmt::Debug for ClientLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientLease")
            .field("entity_path", &self.client.entity_path())
            .field("pooled", &self.release.is_some())
            .finish()
    }
}

/// Provider of client contexts.
///
/// A source may pool, share or lazily connect its contexts; the send
/// transport only relies on scoped acquisition through [`ClientLease`].
#[async_trait::async_trait]
pub trait ContextSource: Send + Sync {
    // ---
    /// Path of the entity served by this source.
    fn entity_path(&self) -> &str;

    /// Borrow a client context, waiting for one to become available.
    ///
    /// Fails with [`SendError::Cancelled`](crate::SendError::Cancelled) if
    /// `cancel` fires while waiting and with
    /// [`SendError::SourceClosed`](crate::SendError::SourceClosed) after
    /// [`close`](Self::close).
    async fn acquire(&self, cancel: &CancellationToken) -> Result<ClientLease>;

    /// Stop handing out contexts. Outstanding leases stay valid.
    async fn close(&self) -> Result<()>;
}

/// Shared context source pointer.
pub type ContextSourcePtr = Arc<dyn ContextSource>;
