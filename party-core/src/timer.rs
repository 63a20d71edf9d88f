//! Cancellable background timers
//!
//! Heartbeat, host watchdog and grace-period timers are tokio tasks owned by
//! the room they serve. Dropping the handle cancels the task.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

/// Owning handle of a spawned timer task
#[derive(Debug)]
pub(crate) struct TimerHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl TimerHandle {
    /// Run `task` on `runtime` until it completes or the handle goes away
    pub(crate) fn spawn<F>(runtime: &Handle, name: &'static str, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        runtime.spawn(async move {
            tokio::select! {
                // Fires on explicit cancel and when the sender is dropped
                _ = cancel_rx => debug!("{} timer cancelled", name),
                _ = task => debug!("{} timer finished", name),
            }
        });
        Self {
            cancel: Some(cancel_tx),
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// The timers a room may be running
#[derive(Debug, Default)]
pub(crate) struct RoomTimers {
    /// Periodic sync broadcast while live
    pub heartbeat: Option<TimerHandle>,
    /// Host liveness check while live
    pub watchdog: Option<TimerHandle>,
    /// Auto-end of a live room nobody is in
    pub grace: Option<TimerHandle>,
}

impl RoomTimers {
    pub fn cancel_all(&mut self) {
        self.heartbeat = None;
        self.watchdog = None;
        self.grace = None;
    }
}
