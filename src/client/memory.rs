// src/client/memory.rs

//! In-memory broker.
//!
//! [`MemoryBroker`] simulates a single broker entity entirely within the
//! process. It is the **reference implementation** of the broker semantics
//! the send transport relies on, and is what the crate's own tests run
//! against.
//!
//! ## Semantics
//!
//! - Immediate sends are recorded in arrival order.
//! - Scheduled sends receive increasing sequence numbers starting at 1 and
//!   are held until cancelled or released by [`MemoryBroker::release_due`].
//! - With a maximum schedule horizon set, enqueue times further ahead are
//!   refused with [`ScheduleOutcome::OutOfRange`].
//! - Cancelling an unknown (or already released) sequence number reports
//!   [`CancelOutcome::NotFound`].
//! - Every operation fails with [`SendError::Cancelled`] when its token has
//!   already fired.
//!
//! ## Non-Goals
//!
//! - Persistence or durability
//! - Network behavior or timing variability
//! - Exact emulation of any particular broker product

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::{PooledContextSource, SharedContextSource};
use crate::sync_util::lock_ignore_poison;
use crate::{
    // ---
    BrokerMessage,
    CancelOutcome,
    ClientContext,
    ClientContextPtr,
    ContextSourcePtr,
    Result,
    ScheduleOutcome,
    SendError,
};

/// One operation a client performed against the broker, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerOp {
    /// Immediate send attempt (recorded whether or not it succeeded).
    Send(BrokerMessage),

    /// Schedule request (recorded whether or not it was accepted).
    Schedule(BrokerMessage, DateTime<Utc>),

    /// Cancel request for a sequence number.
    CancelScheduled(i64),
}

/// A message held by the broker for later delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMessage {
    /// Broker-assigned sequence number.
    pub sequence_number: i64,

    /// Time at which the message becomes deliverable.
    pub enqueue_at: DateTime<Utc>,

    /// The held message.
    pub message: BrokerMessage,
}

#[derive(Debug, Clone, Copy)]
enum InjectedFault {
    Fatal,
    Retryable,
}

#[derive(Default)]
struct BrokerState {
    sent: Vec<BrokerMessage>,
    scheduled: BTreeMap<i64, ScheduledMessage>,
    operations: Vec<BrokerOp>,
    last_sequence: i64,
    max_schedule_ahead: Option<Duration>,
    send_faults: Vec<(InjectedFault, String)>,
}

struct BrokerInner {
    entity_path: String,
    state: Mutex<BrokerState>,
}

/// In-process broker entity.
///
/// Cheap to clone; clones share the same entity.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// Create an empty entity named `entity_path`.
    pub fn new(entity_path: impl Into<String>) -> Self {
        // ---
        Self {
            inner: Arc::new(BrokerInner {
                entity_path: entity_path.into(),
                state: Mutex::new(BrokerState::default()),
            }),
        }
    }

    /// Path of the simulated entity.
    pub fn entity_path(&self) -> &str {
        &self.inner.entity_path
    }

    /// Refuse enqueue times more than `horizon` ahead of now.
    ///
    /// `None` (the default) accepts any future time.
    pub fn set_max_schedule_ahead(&self, horizon: Option<Duration>) {
        lock_ignore_poison(&self.inner.state).max_schedule_ahead = horizon;
    }

    /// Make the next immediate send fail with [`SendError::Transport`].
    pub fn fail_next_send(&self, reason: impl Into<String>) {
        lock_ignore_poison(&self.inner.state)
            .send_faults
            .push((InjectedFault::Fatal, reason.into()));
    }

    /// Make the next immediate send fail with
    /// [`SendError::TransportRetryable`].
    ///
    /// Faults queue up: calling this twice fails the next two sends.
    pub fn fail_next_send_retryable(&self, reason: impl Into<String>) {
        lock_ignore_poison(&self.inner.state)
            .send_faults
            .push((InjectedFault::Retryable, reason.into()));
    }

    /// A client context for this entity.
    pub fn client(&self) -> ClientContextPtr {
        Arc::new(MemoryClient {
            broker: self.clone(),
        })
    }

    /// A source sharing one client context between all sends.
    pub fn client_source(&self) -> ContextSourcePtr {
        Arc::new(SharedContextSource::new(self.client()))
    }

    /// A pooled source of `pool_size` client contexts.
    ///
    /// # Errors
    ///
    /// [`SendError::MissingConfig`] if `pool_size` is zero.
    pub fn context_source(&self, pool_size: usize) -> Result<ContextSourcePtr> {
        // ---
        let clients = (0..pool_size).map(|_| self.client()).collect();
        Ok(Arc::new(PooledContextSource::new(clients)?))
    }

    /// Messages delivered so far, in delivery order.
    pub fn sent(&self) -> Vec<BrokerMessage> {
        lock_ignore_poison(&self.inner.state).sent.clone()
    }

    /// Messages currently held for later delivery, by sequence number.
    pub fn scheduled(&self) -> Vec<ScheduledMessage> {
        lock_ignore_poison(&self.inner.state)
            .scheduled
            .values()
            .cloned()
            .collect()
    }

    /// Every operation performed so far, in call order.
    pub fn operations(&self) -> Vec<BrokerOp> {
        lock_ignore_poison(&self.inner.state).operations.clone()
    }

    /// Deliver every held message whose enqueue time is at or before `now`.
    ///
    /// Released messages are appended to [`sent`](Self::sent) in sequence
    /// order and returned.
    pub fn release_due(&self, now: DateTime<Utc>) -> Vec<BrokerMessage> {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);

        let due: Vec<i64> = state
            .scheduled
            .values()
            .filter(|held| held.enqueue_at <= now)
            .map(|held| held.sequence_number)
            .collect();

        let mut released = Vec::with_capacity(due.len());
        for sequence_number in due {
            if let Some(held) = state.scheduled.remove(&sequence_number) {
                state.sent.push(held.message.clone());
                released.push(held.message);
            }
        }
        released
    }
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock_ignore_poison(&self.inner.state);
        f.debug_struct("MemoryBroker")
            .field("entity_path", &self.inner.entity_path)
            .field("sent", &state.sent.len())
            .field("scheduled", &state.scheduled.len())
            .finish()
    }
}

struct MemoryClient {
    broker: MemoryBroker,
}

impl MemoryClient {
    fn state(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        lock_ignore_poison(&self.broker.inner.state)
    }
}

#[async_trait::async_trait]
impl ClientContext for MemoryClient {
    // ---
    fn entity_path(&self) -> &str {
        self.broker.entity_path()
    }

    async fn send(&self, message: BrokerMessage, cancel: &CancellationToken) -> Result<()> {
        // ---
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }

        let mut state = self.state();
        state.operations.push(BrokerOp::Send(message.clone()));

        if !state.send_faults.is_empty() {
            let (fault, reason) = state.send_faults.remove(0);
            return Err(match fault {
                InjectedFault::Fatal => SendError::Transport(reason),
                InjectedFault::Retryable => SendError::TransportRetryable(reason),
            });
        }

        state.sent.push(message);
        Ok(())
    }

    async fn schedule_send(
        &self,
        message: BrokerMessage,
        enqueue_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ScheduleOutcome> {
        // ---
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }

        let mut state = self.state();
        state
            .operations
            .push(BrokerOp::Schedule(message.clone(), enqueue_at));

        if let Some(horizon) = state.max_schedule_ahead {
            let too_far = (enqueue_at - Utc::now())
                .to_std()
                .map(|ahead| ahead > horizon)
                .unwrap_or(false);
            if too_far {
                return Ok(ScheduleOutcome::OutOfRange);
            }
        }

        state.last_sequence += 1;
        let sequence_number = state.last_sequence;
        state.scheduled.insert(
            sequence_number,
            ScheduledMessage {
                sequence_number,
                enqueue_at,
                message,
            },
        );

        Ok(ScheduleOutcome::Scheduled(sequence_number))
    }

    async fn cancel_scheduled_send(
        &self,
        sequence_number: i64,
        cancel: &CancellationToken,
    ) -> Result<CancelOutcome> {
        // ---
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }

        let mut state = self.state();
        state
            .operations
            .push(BrokerOp::CancelScheduled(sequence_number));

        match state.scheduled.remove(&sequence_number) {
            Some(_) => Ok(CancelOutcome::Cancelled),
            None => Ok(CancelOutcome::NotFound),
        }
    }
}
