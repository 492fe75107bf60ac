use crate::delivery::DeliveryChannel;
use crate::error::AppError;
use crate::message::{access_link, reminder_message};
use crate::reminder::next_due_stage;
use crate::storage::{CapsulePatch, CapsuleQuery, CapsuleStore, CapsuleUpdate, UpdateFilter};
use crate::sweep::{
    PeriodicTask, SweepGuard, SweepReport, SweepSettings, SweepSummary, apply_updates,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use time::OffsetDateTime;

const TASK_NAME: &str = "reminders";

/// Sends at most one staged reminder per capsule per sweep while the unlock
/// time is still ahead.
///
/// Stages are recorded with an add-to-set patch filtered on the `unlock_at`
/// the sweep saw, so a capsule rescheduled mid-sweep does not inherit a
/// stage from its previous unlock time.
pub struct ReminderScheduler {
    store: Arc<dyn CapsuleStore>,
    channel: Arc<dyn DeliveryChannel>,
    settings: SweepSettings,
    running: AtomicBool,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn CapsuleStore>,
        channel: Arc<dyn DeliveryChannel>,
        settings: SweepSettings,
    ) -> Self {
        Self {
            store,
            channel,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn run_sweep_once(&self) -> Result<SweepReport, AppError> {
        self.run_sweep_at(OffsetDateTime::now_utc())
    }

    pub fn run_sweep_at(&self, now: OffsetDateTime) -> Result<SweepReport, AppError> {
        let Some(_guard) = SweepGuard::try_acquire(&self.running) else {
            log::debug!("event=sweep_skipped task={TASK_NAME} reason=already_running");
            return Ok(SweepReport::AlreadyRunning);
        };

        match self.sweep(now) {
            Ok(summary) => {
                log::info!(
                    "event=reminder_sweep scanned={} sent={} skipped={} failed={}",
                    summary.scanned,
                    summary.sent,
                    summary.skipped,
                    summary.failed
                );
                Ok(SweepReport::Completed(summary))
            }
            Err(err) => {
                log::error!("event=sweep_aborted task={TASK_NAME} error=\"{err}\"");
                Err(err)
            }
        }
    }

    fn sweep(&self, now: OffsetDateTime) -> Result<SweepSummary, AppError> {
        let candidates = self.store.find(&CapsuleQuery::ReminderCandidates { now })?;
        let mut summary = SweepSummary {
            scanned: candidates.len(),
            ..SweepSummary::default()
        };
        let mut updates = Vec::new();

        for capsule in &candidates {
            let (Some(to), Some(unlock_at)) = (capsule.recipient_address(), capsule.unlock_time())
            else {
                summary.skipped += 1;
                continue;
            };
            let Some(stage) = next_due_stage(unlock_at, now, &capsule.reminders_sent) else {
                summary.skipped += 1;
                continue;
            };

            let link = access_link(&self.settings.frontend_url, capsule);
            let message = reminder_message(
                to,
                capsule,
                &link,
                stage,
                unlock_at,
                now,
                self.settings.offset,
            );

            match self.channel.send(&message) {
                Ok(delivery) => {
                    summary.sent += 1;
                    log::debug!(
                        "event=reminder_sent capsule={} stage={} delivery={}",
                        capsule.id,
                        stage,
                        delivery.0
                    );
                    updates.push(CapsuleUpdate {
                        id: capsule.id.clone(),
                        filter: UpdateFilter {
                            require_not_notified: false,
                            unlock_at: Some(capsule.unlock_at.clone()),
                        },
                        patch: CapsulePatch::AddReminderStage(stage),
                    });
                }
                Err(err) => {
                    summary.failed += 1;
                    log::warn!(
                        "event=reminder_delivery_failed capsule={} stage={} to={} error=\"{err}\"",
                        capsule.id,
                        stage,
                        to
                    );
                }
            }
        }

        apply_updates(self.store.as_ref(), &updates, TASK_NAME)?;
        Ok(summary)
    }
}

impl PeriodicTask for ReminderScheduler {
    fn name(&self) -> &'static str {
        TASK_NAME
    }

    fn run_sweep_once(&self) -> Result<SweepReport, AppError> {
        ReminderScheduler::run_sweep_once(self)
    }
}
