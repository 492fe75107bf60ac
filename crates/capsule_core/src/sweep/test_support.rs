use crate::delivery::{DeliveryChannel, DeliveryId};
use crate::error::{AppError, DeliveryError};
use crate::message::OutgoingMessage;
use crate::model::{Capsule, CapsuleProjection};
use crate::storage::{CapsuleQuery, CapsuleStore, CapsuleUpdate, UpdateOutcome};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::time::{SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn temp_path(file_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("capsule-{nanos}-{file_name}"))
}

pub fn rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap()
}

pub fn capsule(id: &str, unlock_at: OffsetDateTime, recipient: Option<&str>) -> Capsule {
    Capsule {
        id: id.to_string(),
        title: Some(format!("title {id}")),
        message: "remember this".to_string(),
        attachments: Vec::new(),
        unlock_at: rfc3339(unlock_at),
        recipient: recipient.map(str::to_string),
        sender: Some("owner@example.com".to_string()),
        share_token: Some(format!("tok-{id}")),
        created_at: "2025-12-20T00:00:00Z".to_string(),
        notified: false,
        notified_at: None,
        notify_note: None,
        reminders_sent: Vec::new(),
    }
}

/// Records every message; fails while `failing` is set.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub failing: AtomicBool,
}

impl RecordingChannel {
    pub fn failing() -> Self {
        let channel = Self::default();
        channel.failing.store(true, Ordering::SeqCst);
        channel
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl DeliveryChannel for RecordingChannel {
    fn send(&self, message: &OutgoingMessage) -> Result<DeliveryId, DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::transient("connection reset"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(DeliveryId(format!("msg-{}", sent.len())))
    }
}

/// Signals when a send starts and holds it until released.
pub struct GatedChannel {
    pub entered: Mutex<Sender<()>>,
    pub release: Mutex<Receiver<()>>,
    pub inner: RecordingChannel,
}

impl DeliveryChannel for GatedChannel {
    fn send(&self, message: &OutgoingMessage) -> Result<DeliveryId, DeliveryError> {
        self.entered.lock().unwrap().send(()).ok();
        self.release.lock().unwrap().recv().ok();
        self.inner.send(message)
    }
}

/// Store whose query or batch write always fails.
pub struct BrokenStore {
    pub fail_find: bool,
    pub candidates: Vec<Capsule>,
}

impl CapsuleStore for BrokenStore {
    fn find(&self, query: &CapsuleQuery) -> Result<Vec<CapsuleProjection>, AppError> {
        if self.fail_find {
            return Err(AppError::io("disk on fire"));
        }
        Ok(self
            .candidates
            .iter()
            .filter(|capsule| query.matches(capsule))
            .map(Capsule::projection)
            .collect())
    }

    fn conditional_update_many(
        &self,
        _updates: &[CapsuleUpdate],
    ) -> Result<Vec<UpdateOutcome>, AppError> {
        Err(AppError::io("write refused"))
    }
}
