//! A recurring background action that can be started and stopped any
//! number of times.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type TaskFn = Arc<dyn Fn() + Send + Sync>;

pub struct PeriodicTask {
    period: Duration,
    task: TaskFn,
    /// Present while the task is running.
    cancel: Mutex<Option<CancellationToken>>,
}

impl PeriodicTask {
    pub fn new(period: Duration, task: TaskFn) -> Self {
        Self {
            period,
            task,
            cancel: Mutex::new(None),
        }
    }

    /// Run the task every `period`, starting one period from now. Does
    /// nothing if already running.
    pub fn start(&self) {
        let mut cancel = self.cancel.lock();
        if cancel.is_some() {
            return;
        }
        let token = CancellationToken::new();
        *cancel = Some(token.clone());

        let task = Arc::clone(&self.task);
        let period = self.period;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => task(),
                }
            }
        });
    }

    /// Stop running the task. Does nothing if not running.
    pub fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}
