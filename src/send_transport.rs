//! The send transport.
//!
//! [`SendTransport`] turns an application message into a broker message and
//! delivers it through a [`ClientContext`] borrowed from a
//! [`ContextSource`](crate::ContextSource).
//!
//! ## Send flow
//!
//! ```text
//! send(message, pipe, cancel)
//!   ├─► admit                       Err(TransportStopped) once stopping
//!   ├─► acquire client lease        released on every exit path
//!   ├─► SendContext::new
//!   ├─► pipe
//!   ├─► pre_send observers
//!   ├─► encode body
//!   ├─► enqueue time in the future?
//!   │     ├─► yes: schedule_send
//!   │     │     ├─► Scheduled(seq)  record seq (and token), done
//!   │     │     └─► OutOfRange      immediate send, scheduled id = 0
//!   │     └─► no:  immediate send (retried when configured)
//!   │              └─► post_send observers
//!   └─► on fault: send_fault observers, fault returned unchanged
//! ```
//!
//! Cancelling a scheduled message is a separate operation
//! ([`SendTransport::cancel_scheduled_send`],
//! [`SendTransport::cancel_scheduled_sequence`]). It goes through admission
//! and the context source like a send but touches no observers.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::observer::ObserverHandle;
use crate::retry::retry_with_backoff;
use crate::schedule_tokens::ScheduleTokenCache;
use crate::supervisor::SendSupervisor;
use crate::{
    // ---
    BrokerMessageBuilder,
    CancelOutcome,
    ClientContext,
    ContextSourcePtr,
    ObserverRegistry,
    Result,
    ScheduleOutcome,
    SendConfig,
    SendContext,
    SendEnvelope,
    SendError,
    SendLogPtr,
    SendObserver,
    SendPipe,
};

/// How a successful send reached the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent for immediate delivery.
    Immediate,

    /// Scheduled; the broker assigned this sequence number.
    Scheduled(i64),

    /// A schedule was requested but the broker refused the enqueue time, so
    /// the message was sent immediately instead.
    ScheduleFallback,
}

/// Outcome of a successful [`SendTransport::send`].
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// How the message was delivered.
    pub delivery: Delivery,

    /// Final metadata of the send, as the broker message was built from it.
    pub envelope: SendEnvelope,
}

impl SendReceipt {
    /// Broker sequence number when the message was scheduled.
    pub fn sequence_number(&self) -> Option<i64> {
        match self.delivery {
            Delivery::Scheduled(sequence_number) => Some(sequence_number),
            _ => None,
        }
    }
}

pub(crate) struct Inner {
    pub source: ContextSourcePtr,
    pub config: SendConfig,
    pub builder: BrokerMessageBuilder,
    pub observers: ObserverRegistry,
    pub supervisor: SendSupervisor,
    pub tokens: ScheduleTokenCache,
    pub log: SendLogPtr,
}

/// Supervised send transport for one broker entity.
///
/// Cheap to clone; clones share observers, the schedule token cache and the
/// stop state. Created with [`SendTransportBuilder`](crate::SendTransportBuilder).
#[derive(Clone)]
pub struct SendTransport {
    inner: Arc<Inner>,
}

impl SendTransport {
    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Path of the entity this transport sends to.
    pub fn entity_path(&self) -> &str {
        self.inner.source.entity_path()
    }

    /// Observers notified by this transport.
    pub fn observers(&self) -> &ObserverRegistry {
        &self.inner.observers
    }

    /// Connect a send observer. Dropping the handle disconnects it.
    #[must_use = "dropping the handle disconnects the observer"]
    pub fn connect_send_observer(&self, observer: Arc<dyn SendObserver>) -> ObserverHandle {
        self.inner.observers.connect(observer)
    }

    /// Number of sends and cancellations currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.supervisor.in_flight()
    }

    /// A token that fires once [`stop`](Self::stop) has been called.
    pub fn stopping(&self) -> CancellationToken {
        self.inner.supervisor.stopping()
    }

    /// Sequence number recorded for a schedule token, while the scheduled
    /// message is still pending: not cancelled through this transport and
    /// its enqueue time not yet reached.
    pub fn scheduled_sequence(&self, token_id: &Uuid) -> Option<i64> {
        self.inner.tokens.get(token_id, Utc::now())
    }

    /// Send `message`, customized by `pipe`.
    ///
    /// Returns once the broker accepted the message (or the schedule), or
    /// with the first fault. Every fault raised after the send context
    /// exists is reported to `send_fault` observers before it is returned.
    ///
    /// A [`SendError::Observer`](crate::SendError::Observer) raised by a
    /// `post_send` observer is reported after the broker accepted the
    /// message: the message was delivered even though the call failed.
    pub async fn send<T, P>(
        &self,
        message: T,
        pipe: P,
        cancel: CancellationToken,
    ) -> Result<SendReceipt>
    where
        T: Serialize + Send + Sync,
        P: SendPipe<T>,
    {
        // ---
        let _in_flight = self.inner.supervisor.admit()?;
        let client = self.inner.source.acquire(&cancel).await?;

        let mut context = SendContext::new(message, client.entity_path(), cancel);
        context.content_type = Some(self.inner.config.content_type.clone());

        match self.deliver(&*client, &mut context, pipe).await {
            Ok(delivery) => Ok(SendReceipt {
                delivery,
                envelope: context.into_envelope(),
            }),
            Err(err) => {
                self.inner.log.faulted(context.envelope(), &err);
                self.inner
                    .observers
                    .notify_send_fault(context.envelope(), &err, self.inner.log.as_ref())
                    .await;
                Err(err)
            }
        }
    }

    async fn deliver<T, P>(
        &self,
        client: &dyn ClientContext,
        context: &mut SendContext<T>,
        pipe: P,
    ) -> Result<Delivery>
    where
        T: Serialize + Send + Sync,
        P: SendPipe<T>,
    {
        // ---
        pipe.send(context).await?;

        self.inner.observers.notify_pre_send(context.envelope()).await?;

        let body = self.inner.builder.encode_body(context.payload())?;

        let now = Utc::now();
        if let Some(enqueue_at) = context.scheduled_enqueue_time_utc.filter(|at| *at > now) {
            return self.schedule(client, context, body, enqueue_at).await;
        }

        self.send_now(client, context.envelope(), body).await?;
        self.inner.log.sent(context.envelope());

        self.inner.observers.notify_post_send(context.envelope()).await?;

        Ok(Delivery::Immediate)
    }

    async fn schedule<T>(
        &self,
        client: &dyn ClientContext,
        context: &mut SendContext<T>,
        body: Bytes,
        enqueue_at: DateTime<Utc>,
    ) -> Result<Delivery>
    where
        T: Send + Sync,
    {
        // ---
        let message = self.inner.builder.build(context.envelope(), body.clone());
        let outcome = client
            .schedule_send(message, enqueue_at, context.cancellation())
            .await?;

        match outcome {
            ScheduleOutcome::Scheduled(sequence_number) => {
                context.set_scheduled_message_id(sequence_number);
                if let Some(token_id) = context.schedule_token_id {
                    self.inner
                        .tokens
                        .record(token_id, sequence_number, enqueue_at);
                }
                self.inner
                    .log
                    .scheduled(context.envelope(), enqueue_at, sequence_number);

                Ok(Delivery::Scheduled(sequence_number))
            }
            ScheduleOutcome::OutOfRange => {
                self.inner.log.schedule_fallback(context.envelope(), enqueue_at);

                self.send_now(client, context.envelope(), body).await?;
                context.set_scheduled_message_id(0);
                self.inner.log.sent(context.envelope());

                Ok(Delivery::ScheduleFallback)
            }
        }
    }

    /// Immediate delivery. A fresh message is built for every attempt.
    async fn send_now(
        &self,
        client: &dyn ClientContext,
        envelope: &SendEnvelope,
        body: Bytes,
    ) -> Result<()> {
        // ---
        let builder = &self.inner.builder;
        let cancel = envelope.cancellation();

        retry_with_backoff(self.inner.config.retry_config.as_ref(), cancel, move || {
            let message = builder.build(envelope, body.clone());
            client.send(message, cancel)
        })
        .await
    }

    /// Cancel the scheduled message recorded under `token_id`.
    ///
    /// A token with no recorded schedule is a no-op reported as
    /// [`CancelOutcome::NotFound`]. After the broker answered, the token is
    /// forgotten, so cancelling the same token twice is harmless.
    pub async fn cancel_scheduled_send(
        &self,
        token_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<CancelOutcome> {
        // ---
        let _in_flight = self.inner.supervisor.admit()?;

        let Some(sequence_number) = self.inner.tokens.get(&token_id, Utc::now()) else {
            self.inner
                .log
                .unknown_schedule_token(self.entity_path(), token_id);
            return Ok(CancelOutcome::NotFound);
        };

        let outcome = self.cancel_sequence(sequence_number, &cancel).await?;
        self.inner.tokens.remove_if(&token_id, sequence_number);

        Ok(outcome)
    }

    /// Cancel the scheduled message with broker sequence number
    /// `sequence_number`.
    ///
    /// A message that already fired or was cancelled is reported as
    /// [`CancelOutcome::NotFound`], not as an error.
    pub async fn cancel_scheduled_sequence(
        &self,
        sequence_number: i64,
        cancel: CancellationToken,
    ) -> Result<CancelOutcome> {
        // ---
        let _in_flight = self.inner.supervisor.admit()?;
        self.cancel_sequence(sequence_number, &cancel).await
    }

    async fn cancel_sequence(
        &self,
        sequence_number: i64,
        cancel: &CancellationToken,
    ) -> Result<CancelOutcome> {
        // ---
        // Sequence numbers are positive; 0 marks a schedule that fell back
        // to immediate delivery.
        if sequence_number <= 0 {
            self.inner
                .log
                .cancel_not_found(self.entity_path(), sequence_number);
            return Ok(CancelOutcome::NotFound);
        }

        let client = self.inner.source.acquire(cancel).await?;
        let outcome = client.cancel_scheduled_send(sequence_number, cancel).await?;

        match outcome {
            CancelOutcome::Cancelled => self
                .inner
                .log
                .cancelled_scheduled(client.entity_path(), sequence_number),
            CancelOutcome::NotFound => self
                .inner
                .log
                .cancel_not_found(client.entity_path(), sequence_number),
        }

        Ok(outcome)
    }

    /// Stop the transport.
    ///
    /// New sends and cancellations are rejected with
    /// [`SendError::TransportStopped`](crate::SendError::TransportStopped)
    /// from the moment this is called. In-flight operations are allowed to
    /// finish (bounded by [`SendConfig::stop_grace`] when set); then the
    /// context source is closed. Calling `stop` again is harmless.
    ///
    /// The source is closed even when the grace period runs out; the
    /// [`SendError::GraceExceeded`](crate::SendError::GraceExceeded) is
    /// returned afterwards.
    pub async fn stop(&self) -> Result<()> {
        // ---
        let entity_path = self.entity_path();
        self.inner
            .log
            .stopping(entity_path, self.inner.supervisor.in_flight());

        let waited = self.inner.supervisor.stop().await;
        let closed = self.inner.source.close().await;

        match &waited {
            Ok(()) => self.inner.log.stopped(entity_path),
            Err(SendError::GraceExceeded { grace, in_flight }) => {
                self.inner
                    .log
                    .stop_grace_exceeded(entity_path, *grace, *in_flight)
            }
            Err(_) => {}
        }

        waited.and(closed)
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopping(&self) -> bool {
        self.inner.supervisor.is_stopping()
    }
}

impl std::fmt::Debug for SendTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendTransport")
            .field("entity_path", &self.entity_path())
            .field("observers", &self.inner.observers.len())
            .field("in_flight", &self.in_flight())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}
