use std::future::Future;
use std::sync::Arc;

use rocket::tokio::{
    self,
    sync::Notify,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};

/// A task run repeatedly at a fixed period, starting immediately.
/// A run can be triggered early; the task can be cancelled.
pub struct PeriodicTask {
    handle: JoinHandle<()>,
    signal: Arc<Notify>,
}

impl PeriodicTask {
    /// Run `task` every `period`. Runs never overlap: if one overruns the
    /// period, the next starts as soon as it finishes.
    pub fn spawn<F, Fut>(period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let signal = Arc::new(Notify::new());
        let task_signal = signal.clone();
        let handle = tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {}
                    _ = task_signal.notified() => {}
                }
                task().await;
            }
        });

        Self { handle, signal }
    }

    /// Run the task now instead of waiting for the next period.
    pub fn trigger_now(&self) {
        self.signal.notify_one();
    }

    /// Stop the task. An in-progress run is abandoned at its next await.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}
