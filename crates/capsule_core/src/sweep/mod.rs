//! Periodic sweeps over the capsule store.
//!
//! Each sweep instance owns a "running" flag. A call that finds the flag set
//! returns [`SweepReport::AlreadyRunning`] without touching the store, so at
//! most one sweep per instance is in flight. The flag is released by a drop
//! guard on every exit path, including store failures.

pub mod driver;
pub mod reminders;
pub mod unlock;

#[cfg(test)]
pub(crate) mod test_support;

use crate::config::Config;
use crate::error::AppError;
use crate::message::local_offset;
use crate::storage::{CapsuleStore, CapsuleUpdate, UpdateOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use time::UtcOffset;

pub use driver::SchedulingDriver;
pub use reminders::ReminderScheduler;
pub use unlock::UnlockNotifier;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub scanned: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepReport {
    Completed(SweepSummary),
    AlreadyRunning,
}

impl SweepReport {
    pub fn summary(&self) -> Option<SweepSummary> {
        match self {
            Self::Completed(summary) => Some(*summary),
            Self::AlreadyRunning => None,
        }
    }
}

/// A sweep the driver can fire on a timer.
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn run_sweep_once(&self) -> Result<SweepReport, AppError>;
}

/// Message rendering inputs shared by both sweeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSettings {
    pub frontend_url: String,
    pub preview_chars: usize,
    pub offset: UtcOffset,
}

impl SweepSettings {
    /// Reads the host offset, so call this before any worker threads exist.
    pub fn from_config(config: &Config) -> Self {
        Self {
            frontend_url: config.frontend_url(),
            preview_chars: config.preview_chars(),
            offset: local_offset(),
        }
    }
}

pub(crate) struct SweepGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SweepGuard<'a> {
    pub(crate) fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Writes the staged updates as one batch. Items whose filter no longer
/// holds are logged, not treated as a failed sweep.
pub(crate) fn apply_updates(
    store: &dyn CapsuleStore,
    updates: &[CapsuleUpdate],
    task: &str,
) -> Result<usize, AppError> {
    if updates.is_empty() {
        return Ok(0);
    }

    let outcomes = store.conditional_update_many(updates)?;
    let mut applied = 0;
    for (update, outcome) in updates.iter().zip(outcomes) {
        match outcome {
            UpdateOutcome::Applied => applied += 1,
            UpdateOutcome::FilterMismatch => log::warn!(
                "event=update_skipped task={task} capsule={} reason=filter_mismatch",
                update.id
            ),
            UpdateOutcome::NotFound => log::warn!(
                "event=update_skipped task={task} capsule={} reason=not_found",
                update.id
            ),
        }
    }
    Ok(applied)
}
