//! Send observers.
//!
//! Observers are notified at three points of a send:
//!
//! ```text
//! send(message, pipe)
//!   ├─► pipe
//!   ├─► pre_send(envelope)          every observer, connection order
//!   ├─► broker send / schedule
//!   ├─► post_send(envelope)         immediate delivery only
//!   └─► send_fault(envelope, err)   on any fault, terminal
//! ```
//!
//! ## Failure policy
//!
//! - A failing `pre_send` or `post_send` stops that notification pass and
//!   surfaces as [`SendError::Observer`], naming the observer. It is handled
//!   like any other fault of the send (so `send_fault` observers see it).
//! - A failing `send_fault` is logged and ignored: the original fault is what
//!   the caller receives, and every fault observer still runs.
//!
//! ## Concurrency
//!
//! Each notification pass iterates a snapshot of the registry taken when the
//! pass starts. Observers connected or disconnected meanwhile take effect
//! from the next pass; an in-progress pass is never disturbed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;

use crate::sync_util::{read_ignore_poison, write_ignore_poison};
use crate::{
    // ---
    Result,
    SendError,
    SendEnvelope,
    SendLog,
};

/// Result returned by observer callbacks.
pub type ObserverResult = std::result::Result<(), String>;

/// Listener for send lifecycle events.
///
/// All callbacks default to no-ops; implement the ones you need.
///
/// ```
/// use async_trait::async_trait;
/// use mom_send::{ObserverResult, SendEnvelope, SendObserver};
///
/// struct Audit;
///
/// #[async_trait]
/// impl SendObserver for Audit {
///     async fn post_send(&self, envelope: &SendEnvelope) -> ObserverResult {
///         println!("sent {:?} to {}", envelope.message_id, envelope.destination());
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "audit"
///     }
/// }
/// ```
#[async_trait]
pub trait SendObserver: Send + Sync + 'static {
    /// Called after the pipe ran and before the broker message is built.
    async fn pre_send(&self, _envelope: &SendEnvelope) -> ObserverResult {
        Ok(())
    }

    /// Called after the broker confirmed an immediate delivery.
    async fn post_send(&self, _envelope: &SendEnvelope) -> ObserverResult {
        Ok(())
    }

    /// Called once when the send faulted, before the fault is returned.
    async fn send_fault(&self, _envelope: &SendEnvelope, _error: &SendError) -> ObserverResult {
        Ok(())
    }

    /// Name used in logs and in [`SendError::Observer`].
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

type Entry = (u64, Arc<dyn SendObserver>);

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    observers: RwLock<Vec<Entry>>,
}

impl RegistryInner {
    fn remove(&self, id: u64) {
        write_ignore_poison(&self.observers).retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Ordered set of send observers.
///
/// Cheap to clone; clones share the same set.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<RegistryInner>,
}

impl ObserverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect an observer. It stays connected until the returned handle is
    /// dropped or [`ObserverHandle::disconnect`] is called.
    #[must_use = "dropping the handle disconnects the observer"]
    pub fn connect(&self, observer: Arc<dyn SendObserver>) -> ObserverHandle {
        // ---
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        write_ignore_poison(&self.inner.observers).push((id, observer));

        ObserverHandle {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of connected observers.
    pub fn len(&self) -> usize {
        read_ignore_poison(&self.inner.observers).len()
    }

    /// True if no observer is connected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn SendObserver>> {
        read_ignore_poison(&self.inner.observers)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }

    /// Notify `pre_send` in connection order; stops at the first failure.
    pub async fn notify_pre_send(&self, envelope: &SendEnvelope) -> Result<()> {
        // ---
        for observer in self.snapshot() {
            observer
                .pre_send(envelope)
                .await
                .map_err(|message| observer_error(observer.as_ref(), message))?;
        }
        Ok(())
    }

    /// Notify `post_send` in connection order; stops at the first failure.
    pub async fn notify_post_send(&self, envelope: &SendEnvelope) -> Result<()> {
        // ---
        for observer in self.snapshot() {
            observer
                .post_send(envelope)
                .await
                .map_err(|message| observer_error(observer.as_ref(), message))?;
        }
        Ok(())
    }

    /// Notify `send_fault` in connection order. Observer failures are logged
    /// through `log` and never interrupt the pass.
    pub async fn notify_send_fault(
        &self,
        envelope: &SendEnvelope,
        error: &SendError,
        log: &dyn SendLog,
    ) {
        // ---
        for observer in self.snapshot() {
            if let Err(message) = observer.send_fault(envelope, error).await {
                log.observer_faulted(observer.name(), &message);
            }
        }
    }
}

fn observer_error(observer: &dyn SendObserver, message: String) -> SendError {
    SendError::Observer {
        observer: observer.name(),
        message,
    }
}

/// Connection of one observer to an [`ObserverRegistry`].
///
/// Dropping the handle disconnects the observer.
#[derive(Debug)]
pub struct ObserverHandle {
    id: u64,
    registry: Weak<RegistryInner>,
}

impl ObserverHandle {
    /// Disconnect the observer now.
    pub fn disconnect(self) {
        // Drop does the work.
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::TracingSendLog;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Recorder {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl SendObserver for Recorder {
        async fn pre_send(&self, _envelope: &SendEnvelope) -> ObserverResult {
            self.calls.lock().unwrap().push(format!("{}:pre", self.name));
            if self.fail {
                return Err("rejected".into());
            }
            Ok(())
        }

        async fn send_fault(&self, _envelope: &SendEnvelope, _error: &SendError) -> ObserverResult {
            self.calls.lock().unwrap().push(format!("{}:fault", self.name));
            if self.fail {
                return Err("also broken".into());
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    fn recorder(name: &'static str, calls: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            calls: calls.clone(),
            fail,
        })
    }

    fn envelope() -> SendEnvelope {
        SendEnvelope::new("orders", CancellationToken::new())
    }

    #[tokio::test]
    async fn test_notifies_in_connection_order() {
        // ---
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let _a = registry.connect(recorder("a", &calls, false));
        let _b = registry.connect(recorder("b", &calls, false));

        registry.notify_pre_send(&envelope()).await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a:pre", "b:pre"]);
    }

    /// Disconnects every handle it was given and connects `late`, from
    /// inside its own `pre_send`.
    struct Churner {
        registry: ObserverRegistry,
        calls: Arc<Mutex<Vec<String>>>,
        handles: Mutex<Vec<ObserverHandle>>,
        late: Arc<Recorder>,
        late_handle: Mutex<Option<ObserverHandle>>,
    }

    #[async_trait]
    impl SendObserver for Churner {
        async fn pre_send(&self, _envelope: &SendEnvelope) -> ObserverResult {
            self.calls.lock().unwrap().push("churn:pre".into());
            self.handles.lock().unwrap().clear();

            let handle = self.registry.connect(self.late.clone());
            *self.late_handle.lock().unwrap() = Some(handle);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_changes_during_pass_apply_to_next_pass() {
        // ---
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();

        let churner = Arc::new(Churner {
            registry: registry.clone(),
            calls: calls.clone(),
            handles: Mutex::new(Vec::new()),
            late: recorder("late", &calls, false),
            late_handle: Mutex::new(None),
        });
        let churn_handle = registry.connect(churner.clone());
        let b_handle = registry.connect(recorder("b", &calls, false));
        churner.handles.lock().unwrap().extend([churn_handle, b_handle]);

        // The pass started with churner and b; both run, late does not
        registry.notify_pre_send(&envelope()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["churn:pre", "b:pre"]);
        assert_eq!(registry.len(), 1);

        calls.lock().unwrap().clear();
        registry.notify_pre_send(&envelope()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["late:pre"]);

        // The late observer holds the only remaining connection
        churner.late_handle.lock().unwrap().take();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_handle_disconnects() {
        // ---
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let a = registry.connect(recorder("a", &calls, false));
        let _b = registry.connect(recorder("b", &calls, false));
        assert_eq!(registry.len(), 2);

        a.disconnect();
        assert_eq!(registry.len(), 1);

        registry.notify_pre_send(&envelope()).await.unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["b:pre"]);
    }

    #[tokio::test]
    async fn test_pre_send_failure_names_observer_and_stops_pass() {
        // ---
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let _a = registry.connect(recorder("gate", &calls, true));
        let _b = registry.connect(recorder("b", &calls, false));

        let err = registry.notify_pre_send(&envelope()).await.unwrap_err();

        assert!(matches!(err, SendError::Observer { observer: "gate", .. }));
        assert_eq!(*calls.lock().unwrap(), vec!["gate:pre"]);
    }

    #[tokio::test]
    async fn test_fault_observer_failures_do_not_stop_pass() {
        // ---
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let _a = registry.connect(recorder("a", &calls, true));
        let _b = registry.connect(recorder("b", &calls, false));

        let err = SendError::Transport("boom".into());
        registry
            .notify_send_fault(&envelope(), &err, &TracingSendLog)
            .await;

        assert_eq!(*calls.lock().unwrap(), vec!["a:fault", "b:fault"]);
    }

    #[tokio::test]
    async fn test_handle_outliving_registry_is_harmless() {
        // ---
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let handle = registry.connect(recorder("a", &calls, false));

        drop(registry);
        drop(handle);
    }
}
