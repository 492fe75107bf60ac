use crate::sweep::{PeriodicTask, SweepReport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

struct ScheduledTask {
    task: Arc<dyn PeriodicTask>,
    every: Duration,
}

/// Fires each registered task on its own fixed interval.
///
/// Sweeps run on the blocking pool and are not awaited by the timer loop. A
/// tick that lands while the previous sweep of the same task is still going
/// reaches that task's running flag and does nothing.
#[derive(Default)]
pub struct SchedulingDriver {
    tasks: Vec<ScheduledTask>,
}

impl SchedulingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: Arc<dyn PeriodicTask>, every: Duration) -> Self {
        self.tasks.push(ScheduledTask { task, every });
        self
    }

    /// Runs until `shutdown` resolves. Sweeps already handed to the blocking
    /// pool are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, _) = watch::channel(false);
        let mut loops = Vec::with_capacity(self.tasks.len());

        for scheduled in self.tasks {
            log::info!(
                "event=task_scheduled task={} every_secs={}",
                scheduled.task.name(),
                scheduled.every.as_secs_f64()
            );
            loops.push(tokio::spawn(tick_loop(scheduled, stop_tx.subscribe())));
        }

        shutdown.await;
        log::info!("event=driver_stopping tasks={}", loops.len());
        let _ = stop_tx.send(true);

        for handle in loops {
            if let Err(err) = handle.await {
                log::error!("event=tick_loop_failed error=\"{err}\"");
            }
        }
    }
}

async fn tick_loop(scheduled: ScheduledTask, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(scheduled.every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let task = Arc::clone(&scheduled.task);
                tokio::task::spawn_blocking(move || run_and_log(task.as_ref()));
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
}

fn run_and_log(task: &dyn PeriodicTask) {
    match task.run_sweep_once() {
        Ok(SweepReport::Completed(_)) => {}
        Ok(SweepReport::AlreadyRunning) => {
            log::debug!("event=tick_skipped task={} reason=sweep_in_flight", task.name());
        }
        Err(err) => {
            log::error!("event=tick_failed task={} error=\"{err}\"", task.name());
        }
    }
}
