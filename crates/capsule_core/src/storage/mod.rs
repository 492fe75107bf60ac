pub mod json_store;

use crate::error::AppError;
use crate::model::{Capsule, CapsuleProjection};
use crate::reminder::ReminderStage;
use time::OffsetDateTime;

pub use json_store::JsonCapsuleStore;

/// Candidate selection for the two sweeps.
///
/// A capsule whose `unlock_at` does not parse never matches either query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapsuleQuery {
    /// `notified != true AND unlock_at <= now`. Recipient filtering is left
    /// to the caller so blank and missing addresses can be told apart.
    DueForUnlock { now: OffsetDateTime },
    /// `recipient is non-blank AND unlock_at > now`.
    ReminderCandidates { now: OffsetDateTime },
}

impl CapsuleQuery {
    pub fn matches(&self, capsule: &Capsule) -> bool {
        let Some(unlock_at) = capsule.unlock_time() else {
            return false;
        };

        match *self {
            Self::DueForUnlock { now } => !capsule.notified && unlock_at <= now,
            Self::ReminderCandidates { now } => {
                capsule.recipient_address().is_some() && unlock_at > now
            }
        }
    }
}

/// Conditions checked against the stored record at write time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateFilter {
    pub require_not_notified: bool,
    /// The `unlock_at` the sweep observed. A mismatch means the capsule was
    /// rescheduled in the meantime.
    pub unlock_at: Option<String>,
}

impl UpdateFilter {
    pub fn matches(&self, capsule: &Capsule) -> bool {
        if self.require_not_notified && capsule.notified {
            return false;
        }
        match self.unlock_at.as_deref() {
            Some(expected) => capsule.unlock_at == expected,
            None => true,
        }
    }
}

/// Targeted field changes. Nothing else on the record is touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapsulePatch {
    MarkNotified { at: String, note: String },
    AddReminderStage(ReminderStage),
}

impl CapsulePatch {
    pub fn apply(&self, capsule: &mut Capsule) {
        match self {
            Self::MarkNotified { at, note } => {
                capsule.notified = true;
                capsule.notified_at = Some(at.clone());
                capsule.notify_note = Some(note.clone());
            }
            Self::AddReminderStage(stage) => {
                if !capsule.reminders_sent.contains(stage) {
                    capsule.reminders_sent.push(*stage);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleUpdate {
    pub id: String,
    pub filter: UpdateFilter,
    pub patch: CapsulePatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    FilterMismatch,
    NotFound,
}

/// Durable capsule records shared by the sweeps and the rest of the app.
pub trait CapsuleStore: Send + Sync {
    fn find(&self, query: &CapsuleQuery) -> Result<Vec<CapsuleProjection>, AppError>;

    /// Applies each update only if its filter still holds. An `Err` means the
    /// batch as a whole could not be written; per-item outcomes are otherwise
    /// returned in input order.
    fn conditional_update_many(
        &self,
        updates: &[CapsuleUpdate],
    ) -> Result<Vec<UpdateOutcome>, AppError>;
}
