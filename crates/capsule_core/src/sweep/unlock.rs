use crate::delivery::DeliveryChannel;
use crate::error::AppError;
use crate::message::{access_link, unlock_message};
use crate::storage::{CapsulePatch, CapsuleQuery, CapsuleStore, CapsuleUpdate, UpdateFilter};
use crate::sweep::{
    PeriodicTask, SweepGuard, SweepReport, SweepSettings, SweepSummary, apply_updates,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const TASK_NAME: &str = "unlock";
const NOTIFY_NOTE: &str = "sent";

/// Sends the "it's open" message once a capsule's unlock time has passed and
/// marks it notified.
///
/// A failed send leaves the capsule untouched, so the next sweep picks it up
/// again. Capsules without a recipient are skipped and stay unmarked until
/// one is attached.
pub struct UnlockNotifier {
    store: Arc<dyn CapsuleStore>,
    channel: Arc<dyn DeliveryChannel>,
    settings: SweepSettings,
    running: AtomicBool,
}

impl UnlockNotifier {
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
                    "event=unlock_sweep scanned={} sent={} skipped={} failed={}",
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
        let candidates = self.store.find(&CapsuleQuery::DueForUnlock { now })?;
        let mut summary = SweepSummary {
            scanned: candidates.len(),
            ..SweepSummary::default()
        };
        if candidates.is_empty() {
            return Ok(summary);
        }

        let notified_at = now
            .format(&Rfc3339)
            .map_err(|err| AppError::invalid_data(err.to_string()))?;
        let mut updates = Vec::new();

        for capsule in &candidates {
            let Some(to) = capsule.recipient_address() else {
                summary.skipped += 1;
                log::debug!("event=unlock_skipped capsule={} reason=no_recipient", capsule.id);
                continue;
            };

            let link = access_link(&self.settings.frontend_url, capsule);
            let message = unlock_message(to, capsule, &link, self.settings.preview_chars);

            match self.channel.send(&message) {
                Ok(delivery) => {
                    summary.sent += 1;
                    log::debug!(
                        "event=unlock_sent capsule={} delivery={}",
                        capsule.id,
                        delivery.0
                    );
                    updates.push(CapsuleUpdate {
                        id: capsule.id.clone(),
                        filter: UpdateFilter {
                            require_not_notified: true,
                            unlock_at: Some(capsule.unlock_at.clone()),
                        },
                        patch: CapsulePatch::MarkNotified {
                            at: notified_at.clone(),
                            note: NOTIFY_NOTE.to_string(),
                        },
                    });
                }
                Err(err) => {
                    summary.failed += 1;
                    log::warn!(
                        "event=unlock_delivery_failed capsule={} to={} error=\"{err}\"",
                        capsule.id,
                        to
                    );
                }
            }
        }

        apply_updates(self.store.as_ref(), &updates, TASK_NAME)?;
        Ok(summary)
    }
}

impl PeriodicTask for UnlockNotifier {
    fn name(&self) -> &'static str {
        TASK_NAME
    }

    fn run_sweep_once(&self) -> Result<SweepReport, AppError> {
        UnlockNotifier::run_sweep_once(self)
    }
}

#[cfg(test)]
mod tests {
    use super::UnlockNotifier;
    use crate::model::Capsule;
    use crate::storage::json_store::{JsonCapsuleStore, load_capsules, save_capsules};
    use crate::sweep::test_support::{
        BrokenStore, GatedChannel, RecordingChannel, capsule, rfc3339, temp_path,
    };
    use crate::sweep::{SweepReport, SweepSettings, SweepSummary};
    use std::path::Path;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use time::{Duration, OffsetDateTime, UtcOffset};

    fn settings() -> SweepSettings {
        SweepSettings {
            frontend_url: "https://caps.example".to_string(),
            preview_chars: 120,
            offset: UtcOffset::UTC,
        }
    }

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_800_000_000).unwrap()
    }

    fn notifier_for(
        path: &Path,
        capsules: &[Capsule],
        channel: Arc<RecordingChannel>,
    ) -> UnlockNotifier {
        save_capsules(path, capsules).unwrap();
        UnlockNotifier::new(Arc::new(JsonCapsuleStore::new(path)), channel, settings())
    }

    #[test]
    fn due_capsule_is_sent_once_and_marked() {
        let path = temp_path("unlock-due.json");
        let channel = Arc::new(RecordingChannel::default());
        let notifier = notifier_for(
            &path,
            &[capsule("cap-1", now() - Duration::seconds(1), Some("a@b.com"))],
            Arc::clone(&channel),
        );

        let report = notifier.run_sweep_at(now()).unwrap();
        let stored = load_capsules(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(
            report,
            SweepReport::Completed(SweepSummary {
                scanned: 1,
                sent: 1,
                skipped: 0,
                failed: 0,
            })
        );
        let messages = channel.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].to, "a@b.com");
        assert!(messages[0].text.contains("https://caps.example/capsule/share/tok-cap-1"));
        assert!(stored[0].notified);
        assert_eq!(stored[0].notified_at, Some(rfc3339(now())));
        assert_eq!(stored[0].notify_note.as_deref(), Some("sent"));
    }

    #[test]
    fn repeated_sweeps_deliver_at_most_once() {
        let path = temp_path("unlock-repeat.json");
        let channel = Arc::new(RecordingChannel::default());
        let notifier = notifier_for(
            &path,
            &[capsule("cap-1", now() - Duration::minutes(5), Some("a@b.com"))],
            Arc::clone(&channel),
        );

        for offset in 0..5 {
            notifier
                .run_sweep_at(now() + Duration::minutes(offset))
                .unwrap();
        }
        std::fs::remove_file(&path).ok();

        assert_eq!(channel.messages().len(), 1);
    }

    #[test]
    fn future_capsule_is_never_attempted() {
        let path = temp_path("unlock-future.json");
        let channel = Arc::new(RecordingChannel::default());
        let unlock_at = now() + Duration::hours(2);
        let notifier = notifier_for(
            &path,
            &[capsule("cap-1", unlock_at, Some("a@b.com"))],
            Arc::clone(&channel),
        );

        let mut at = now();
        while at < unlock_at {
            notifier.run_sweep_at(at).unwrap();
            at += Duration::minutes(7);
        }
        let stored = load_capsules(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(channel.messages().is_empty());
        assert!(!stored[0].notified);
    }

    #[test]
    fn missing_or_blank_recipient_is_skipped_not_marked() {
        let path = temp_path("unlock-skip.json");
        let channel = Arc::new(RecordingChannel::default());
        let notifier = notifier_for(
            &path,
            &[
                capsule("none", now() - Duration::hours(1), None),
                capsule("blank", now() - Duration::hours(1), Some("   ")),
            ],
            Arc::clone(&channel),
        );

        let first = notifier.run_sweep_at(now()).unwrap();
        let second = notifier.run_sweep_at(now() + Duration::minutes(1)).unwrap();
        let stored = load_capsules(&path).unwrap();
        std::fs::remove_file(&path).ok();

        for report in [first, second] {
            let summary = report.summary().unwrap();
            assert_eq!(summary.skipped, 2);
            assert_eq!(summary.sent, 0);
        }
        assert!(channel.messages().is_empty());
        assert!(stored.iter().all(|capsule| !capsule.notified));
    }

    #[test]
    fn skipped_capsule_heals_once_recipient_is_attached() {
        let path = temp_path("unlock-heal.json");
        let channel = Arc::new(RecordingChannel::default());
        let notifier = notifier_for(
            &path,
            &[capsule("cap-1", now() - Duration::hours(1), None)],
            Arc::clone(&channel),
        );
        notifier.run_sweep_at(now()).unwrap();

        let mut stored = load_capsules(&path).unwrap();
        stored[0].recipient = Some("late@b.com".to_string());
        save_capsules(&path, &stored).unwrap();

        let report = notifier.run_sweep_at(now()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(report.summary().unwrap().sent, 1);
        assert_eq!(channel.messages()[0].to, "late@b.com");
    }

    #[test]
    fn failed_delivery_is_retried_on_next_sweep() {
        let path = temp_path("unlock-retry.json");
        let channel = Arc::new(RecordingChannel::failing());
        let notifier = notifier_for(
            &path,
            &[capsule("cap-1", now() - Duration::seconds(30), Some("a@b.com"))],
            Arc::clone(&channel),
        );

        let first = notifier.run_sweep_at(now()).unwrap().summary().unwrap();
        let after_failure = load_capsules(&path).unwrap();

        channel.set_failing(false);
        let second = notifier
            .run_sweep_at(now() + Duration::minutes(1))
            .unwrap()
            .summary()
            .unwrap();
        let after_retry = load_capsules(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(first.failed, 1);
        assert_eq!(first.sent, 0);
        assert!(!after_failure[0].notified);
        assert_eq!(second.scanned, 1);
        assert_eq!(second.sent, 1);
        assert!(after_retry[0].notified);
    }

    #[test]
    fn rescheduled_capsule_notifies_again_at_new_time() {
        let path = temp_path("unlock-reschedule.json");
        let channel = Arc::new(RecordingChannel::default());
        let notifier = notifier_for(
            &path,
            &[capsule("cap-1", now() - Duration::seconds(1), Some("a@b.com"))],
            Arc::clone(&channel),
        );
        notifier.run_sweep_at(now()).unwrap();

        let new_unlock = now() + Duration::days(2);
        let mut stored = load_capsules(&path).unwrap();
        assert!(stored[0].reschedule(rfc3339(new_unlock)));
        save_capsules(&path, &stored).unwrap();

        let early = notifier.run_sweep_at(now() + Duration::days(1)).unwrap();
        let late = notifier
            .run_sweep_at(new_unlock + Duration::seconds(1))
            .unwrap();
        let stored = load_capsules(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(early.summary().unwrap().scanned, 0);
        assert_eq!(late.summary().unwrap().sent, 1);
        assert_eq!(channel.messages().len(), 2);
        assert!(stored[0].notified);
    }

    #[test]
    fn concurrent_call_is_a_no_op_while_sweep_in_flight() {
        let path = temp_path("unlock-overlap.json");
        save_capsules(
            &path,
            &[capsule("cap-1", now() - Duration::seconds(1), Some("a@b.com"))],
        )
        .unwrap();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let channel = Arc::new(GatedChannel {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
            inner: RecordingChannel::default(),
        });
        let notifier = Arc::new(UnlockNotifier::new(
            Arc::new(JsonCapsuleStore::new(&path)),
            channel.clone(),
            settings(),
        ));

        let background = {
            let notifier = Arc::clone(&notifier);
            std::thread::spawn(move || notifier.run_sweep_at(now()))
        };
        entered_rx.recv().unwrap();

        let overlapping = notifier.run_sweep_at(now()).unwrap();
        release_tx.send(()).unwrap();
        let finished = background.join().unwrap().unwrap();
        let after = notifier.run_sweep_at(now()).unwrap();
        let stored = load_capsules(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(overlapping, SweepReport::AlreadyRunning);
        assert_eq!(finished.summary().unwrap().sent, 1);
        assert_eq!(after.summary().unwrap().scanned, 0);
        assert_eq!(channel.inner.messages().len(), 1);
        assert!(stored[0].notified);
    }

    #[test]
    fn store_query_failure_aborts_and_releases_guard() {
        let channel = Arc::new(RecordingChannel::default());
        let notifier = UnlockNotifier::new(
            Arc::new(BrokenStore {
                fail_find: true,
                candidates: Vec::new(),
            }),
            channel,
            settings(),
        );

        let first = notifier.run_sweep_at(now()).unwrap_err();
        let second = notifier.run_sweep_at(now()).unwrap_err();

        assert_eq!(first.code(), "io_error");
        assert_eq!(second.code(), "io_error");
    }

    #[test]
    fn batch_write_failure_aborts_sweep() {
        let channel = Arc::new(RecordingChannel::default());
        let notifier = UnlockNotifier::new(
            Arc::new(BrokenStore {
                fail_find: false,
                candidates: vec![capsule("cap-1", now() - Duration::seconds(1), Some("a@b.com"))],
            }),
            channel.clone(),
            settings(),
        );

        let err = notifier.run_sweep_at(now()).unwrap_err();

        assert_eq!(err.message(), "write refused");
        assert_eq!(channel.messages().len(), 1);
    }
}
