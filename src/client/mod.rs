// src/client/mod.rs

//! Context source implementations.
//!
//! - [`SharedContextSource`] hands the same client context to every send.
//!   Suitable when the underlying client is safe for concurrent use.
//! - [`PooledContextSource`] checks contexts out exclusively from a fixed
//!   pool, waiting (cancellably) when all of them are in use.
//! - [`MemoryBroker`] is the in-process reference broker used by tests and
//!   examples; it provides client contexts for both sources.

mod memory;
mod pool;

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;

use crate::{
    // ---
    ClientContextPtr,
    ClientLease,
    ContextSource,
    Result,
    SendError,
};

pub use memory::{BrokerOp, MemoryBroker, ScheduledMessage};
pub use pool::PooledContextSource;

/// Context source sharing one client context between all sends.
pub struct SharedContextSource {
    // ---
    client: ClientContextPtr,
    closed: AtomicBool,
}

impl SharedContextSource {
    /// Share `client` between all sends.
    pub fn new(client: ClientContextPtr) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait::async_trait]
impl ContextSource for SharedContextSource {
    // ---
    fn entity_path(&self) -> &str {
        self.client.entity_path()
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<ClientLease> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::SourceClosed);
        }
        if cancel.is_cancelled() {
            return Err(SendError::Cancelled);
        }
        Ok(ClientLease::shared(self.client.clone()))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
