// src/client/pool.rs

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::sync_util::lock_ignore_poison;
use crate::{
    // ---
    ClientContextPtr,
    ClientLease,
    ContextSource,
    Result,
    SendError,
};

/// Context source with exclusive checkout from a fixed pool.
///
/// At most one send holds a given client context at a time. `acquire` waits
/// for a free context, observing the caller's cancellation token. A context
/// goes back to the pool when its lease is dropped, whatever the outcome of
/// the send.
pub struct PooledContextSource {
    // ---
    entity_path: String,
    idle: Arc<Mutex<Vec<ClientContextPtr>>>,
    permits: Arc<Semaphore>,
}

impl PooledContextSource {
    /// Pool `clients`, which must all serve the same entity.
    ///
    /// # Errors
    ///
    /// - [`SendError::MissingConfig`] if `clients` is empty
    /// - [`SendError::ConfigConflict`] if the clients serve different entities
    pub fn new(clients: Vec<ClientContextPtr>) -> Result<Self> {
        // ---
        let entity_path = clients
            .first()
            .map(|client| client.entity_path().to_owned())
            .ok_or_else(|| SendError::MissingConfig("at least one client context".into()))?;

        if let Some(other) = clients.iter().find(|c| c.entity_path() != entity_path) {
            return Err(SendError::ConfigConflict(format!(
                "pooled clients serve different entities: {} and {}",
                entity_path,
                other.entity_path()
            )));
        }

        Ok(Self {
            entity_path,
            permits: Arc::new(Semaphore::new(clients.len())),
            idle: Arc::new(Mutex::new(clients)),
        })
    }

    /// Contexts currently available for checkout.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait::async_trait]
impl ContextSource for PooledContextSource {
    // ---
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<ClientLease> {
        // ---
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(SendError::Cancelled),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|_| SendError::SourceClosed)?
            }
        };

        // One permit per idle client, so a permit guarantees a client.
        let client = lock_ignore_poison(&self.idle)
            .pop()
            .ok_or_else(|| SendError::Transport("client pool exhausted".into()))?;

        let idle = self.idle.clone();
        Ok(ClientLease::with_release(client, move |client| {
            lock_ignore_poison(&idle).push(client);
            drop(permit);
        }))
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.permits.close();
        log_debug!(entity = %self.entity_path, "client pool closed");
        Ok(())
    }
}
