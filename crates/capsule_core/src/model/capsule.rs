use crate::reminder::ReminderStage;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Video,
    Audio,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub file_url: String,
    pub kind: AttachmentKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capsule {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// RFC 3339. Kept as text so a malformed value can sit in the store
    /// without poisoning every load.
    pub unlock_at: String,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub share_token: Option<String>,
    pub created_at: String,
    #[serde(default)]
    pub notified: bool,
    #[serde(default)]
    pub notified_at: Option<String>,
    #[serde(default)]
    pub notify_note: Option<String>,
    #[serde(default)]
    pub reminders_sent: Vec<ReminderStage>,
}

impl Capsule {
    /// Trimmed recipient address, or `None` when missing or blank.
    pub fn recipient_address(&self) -> Option<&str> {
        self.recipient
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn unlock_time(&self) -> Option<OffsetDateTime> {
        parse_timestamp(&self.unlock_at)
    }

    /// Moves the capsule to a new unlock time. Changing the time starts a new
    /// notification epoch, so delivery state from the old one is dropped.
    ///
    /// Times are compared as instants; the same moment written with another
    /// offset is not a change and keeps the stored text.
    pub fn reschedule(&mut self, unlock_at: String) -> bool {
        let unchanged = match (self.unlock_time(), parse_timestamp(&unlock_at)) {
            (Some(current), Some(next)) => current == next,
            _ => self.unlock_at == unlock_at,
        };
        if unchanged {
            return false;
        }
        self.unlock_at = unlock_at;
        self.notified = false;
        self.notified_at = None;
        self.notify_note = None;
        self.reminders_sent.clear();
        true
    }

    pub fn projection(&self) -> CapsuleProjection {
        CapsuleProjection {
            id: self.id.clone(),
            title: self.title.clone(),
            message: self.message.clone(),
            recipient: self.recipient.clone(),
            sender: self.sender.clone(),
            unlock_at: self.unlock_at.clone(),
            reminders_sent: self.reminders_sent.clone(),
            share_token: self.share_token.clone(),
            notified: self.notified,
        }
    }
}

/// The slice of a capsule the sweeps read. Attachments never leave the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapsuleProjection {
    pub id: String,
    pub title: Option<String>,
    pub message: String,
    pub recipient: Option<String>,
    pub sender: Option<String>,
    pub unlock_at: String,
    pub reminders_sent: Vec<ReminderStage>,
    pub share_token: Option<String>,
    pub notified: bool,
}

impl CapsuleProjection {
    pub fn recipient_address(&self) -> Option<&str> {
        self.recipient
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn unlock_time(&self) -> Option<OffsetDateTime> {
        parse_timestamp(&self.unlock_at)
    }

    /// Token used in the public link; falls back to the id.
    pub fn access_token(&self) -> &str {
        self.share_token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    Locked,
    Due,
    Notified,
}

pub fn parse_timestamp(value: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(value.trim(), &Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::{Capsule, parse_timestamp};
    use crate::reminder::ReminderStage;

    fn capsule() -> Capsule {
        Capsule {
            id: "cap-1".to_string(),
            title: Some("hello".to_string()),
            message: "see you later".to_string(),
            attachments: Vec::new(),
            unlock_at: "2026-01-01T00:00:00Z".to_string(),
            recipient: Some("  a@b.com ".to_string()),
            sender: None,
            share_token: None,
            created_at: "2025-12-20T00:00:00Z".to_string(),
            notified: true,
            notified_at: Some("2026-01-01T00:01:00Z".to_string()),
            notify_note: Some("sent".to_string()),
            reminders_sent: vec![ReminderStage::Day, ReminderStage::Hour],
        }
    }

    #[test]
    fn recipient_address_trims_and_rejects_blank() {
        let mut capsule = capsule();
        assert_eq!(capsule.recipient_address(), Some("a@b.com"));

        capsule.recipient = Some("   ".to_string());
        assert_eq!(capsule.recipient_address(), None);

        capsule.recipient = None;
        assert_eq!(capsule.recipient_address(), None);
    }

    #[test]
    fn reschedule_to_new_time_resets_delivery_state() {
        let mut capsule = capsule();
        let changed = capsule.reschedule("2027-01-01T00:00:00Z".to_string());

        assert!(changed);
        assert!(!capsule.notified);
        assert_eq!(capsule.notified_at, None);
        assert_eq!(capsule.notify_note, None);
        assert!(capsule.reminders_sent.is_empty());
    }

    #[test]
    fn reschedule_to_same_time_keeps_delivery_state() {
        let mut capsule = capsule();
        let changed = capsule.reschedule("2026-01-01T00:00:00Z".to_string());

        assert!(!changed);
        assert!(capsule.notified);
        assert_eq!(capsule.reminders_sent.len(), 2);
    }

    #[test]
    fn reschedule_to_same_instant_in_other_offset_keeps_delivery_state() {
        let mut capsule = capsule();
        let changed = capsule.reschedule("2026-01-01T02:00:00+02:00".to_string());

        assert!(!changed);
        assert!(capsule.notified);
        assert_eq!(capsule.unlock_at, "2026-01-01T00:00:00Z");
        assert_eq!(capsule.reminders_sent.len(), 2);
    }

    #[test]
    fn reschedule_away_from_unparseable_time_resets() {
        let mut capsule = capsule();
        capsule.unlock_at = "someday".to_string();

        assert!(capsule.reschedule("2026-01-01T00:00:00Z".to_string()));
        assert!(!capsule.notified);
        assert!(!capsule.reschedule("2026-01-01T00:00:00Z".to_string()));
    }

    #[test]
    fn access_token_falls_back_to_id() {
        let mut projection = capsule().projection();
        assert_eq!(projection.access_token(), "cap-1");

        projection.share_token = Some("tok-9".to_string());
        assert_eq!(projection.access_token(), "tok-9");
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("not-a-date").is_none());
        assert!(parse_timestamp("2026-01-01T00:00:00Z").is_some());
    }
}
