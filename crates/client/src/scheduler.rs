//! Delay scheduling
//!
//! Retries are never slept on inline: the coordinator hands a callback to a
//! [`Scheduler`] and awaits its completion, so tests can inject a scheduler
//! that fires immediately and records the requested delays.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Callback run when a scheduled delay expires
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// "Run this callback after a delay" capability
pub trait Scheduler: Send + Sync {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask);
}

/// Wait for `delay` through `scheduler`
///
/// Returns false if the scheduler dropped the callback without running it.
pub async fn sleep(scheduler: &dyn Scheduler, delay: Duration) -> bool {
    let (tx, rx) = oneshot::channel();
    scheduler.schedule_after(
        delay,
        Box::new(move || {
            let _ = tx.send(());
        }),
    );
    rx.await.is_ok()
}

/// Scheduler backed by the tokio timer
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime of the calling task; `None` outside a runtime
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_after(&self, delay: Duration, task: ScheduledTask) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}
