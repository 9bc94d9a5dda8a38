//! Send admission and graceful stop.
//!
//! Every send or cancel passes through [`SendSupervisor::admit`] and holds the
//! returned [`InFlight`] guard until it finishes:
//!
//! ```text
//! admit()
//!   ├─► stop signalled?  → Err(TransportStopped)
//!   └─► InFlight guard   → dropped when the operation returns
//!
//! stop()
//!   ├─► signal stop        (new admissions rejected from here on)
//!   ├─► close the tracker
//!   └─► wait for every InFlight guard
//!         └─► bounded by `grace` when configured → Err(GraceExceeded)
//! ```
//!
//! In-flight operations are never aborted; a grace timeout only stops the
//! waiting.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;

use crate::{Result, SendError};

/// Marks one admitted operation as in flight until dropped.
#[derive(Debug)]
pub(crate) struct InFlight {
    _token: TaskTrackerToken,
}

#[derive(Debug)]
pub(crate) struct SendSupervisor {
    stopping: CancellationToken,
    tracker: TaskTracker,
    grace: Option<Duration>,
}

impl SendSupervisor {
    pub fn new(grace: Option<Duration>) -> Self {
        // ---
        Self {
            stopping: CancellationToken::new(),
            tracker: TaskTracker::new(),
            grace,
        }
    }

    /// Admit one operation, or reject it once stop has been signalled.
    pub fn admit(&self) -> Result<InFlight> {
        // ---
        // Tracked before checking the signal: stop() cancels before it waits,
        // so an operation that sees no signal here is always waited for.
        let token = self.tracker.token();

        if self.stopping.is_cancelled() {
            return Err(SendError::TransportStopped);
        }

        Ok(InFlight { _token: token })
    }

    /// Number of admitted operations that have not finished.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.is_cancelled()
    }

    /// A token that fires once stop has been signalled.
    pub fn stopping(&self) -> CancellationToken {
        self.stopping.child_token()
    }

    /// Signal stop and wait for in-flight operations. Safe to call again.
    pub async fn stop(&self) -> Result<()> {
        // ---
        self.stopping.cancel();
        self.tracker.close();

        let Some(grace) = self.grace else {
            self.tracker.wait().await;
            return Ok(());
        };

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(SendError::GraceExceeded {
                grace,
                in_flight: self.tracker.len(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_admission_rejected_after_stop() {
        // ---
        let supervisor = SendSupervisor::new(None);
        supervisor.stop().await.unwrap();

        assert!(supervisor.is_stopping());
        assert!(matches!(supervisor.admit(), Err(SendError::TransportStopped)));
        assert_eq!(supervisor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight() {
        // ---
        let supervisor = Arc::new(SendSupervisor::new(None));
        let guard = supervisor.admit().unwrap();
        assert_eq!(supervisor.in_flight(), 1);

        let (done_tx, mut done_rx) = oneshot::channel();
        let stopper = supervisor.clone();
        tokio::spawn(async move {
            stopper.stop().await.unwrap();
            let _ = done_tx.send(());
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(done_rx.try_recv().is_err(), "stop returned while a send was in flight");

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), done_rx)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_grace_exceeded_reports_in_flight() {
        // ---
        let supervisor = SendSupervisor::new(Some(Duration::from_millis(20)));
        let _guard = supervisor.admit().unwrap();

        let err = supervisor.stop().await.unwrap_err();

        match err {
            SendError::GraceExceeded { grace, in_flight } => {
                assert_eq!(grace, Duration::from_millis(20));
                assert_eq!(in_flight, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        // ---
        let supervisor = SendSupervisor::new(None);
        let stopping = supervisor.stopping();

        supervisor.stop().await.unwrap();
        supervisor.stop().await.unwrap();

        assert!(stopping.is_cancelled());
    }
}
