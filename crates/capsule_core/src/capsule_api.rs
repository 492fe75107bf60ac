use crate::delivery::{DeliveryChannel, DeliveryId};
use crate::error::AppError;
use crate::message::{access_link, received_message};
use crate::model::{Attachment, AttachmentKind, Capsule, CapsuleStatus};
use crate::reminder::{ReminderStage, next_due_stage};
use crate::storage::JsonCapsuleStore;
use crate::sweep::SweepSettings;
use time::{OffsetDateTime, UtcOffset};
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone, Default)]
pub struct NewCapsule {
    pub title: Option<String>,
    pub message: String,
    pub unlock_at: String,
    pub recipient: Option<String>,
    pub sender: Option<String>,
    pub attachment_urls: Vec<String>,
}

/// Fields left as `None` are kept. An empty recipient clears it.
#[derive(Debug, Clone, Default)]
pub struct CapsuleEdit {
    pub title: Option<String>,
    pub message: Option<String>,
    pub unlock_at: Option<String>,
    pub recipient: Option<String>,
    pub sender: Option<String>,
}

impl CapsuleEdit {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.message.is_none()
            && self.unlock_at.is_none()
            && self.recipient.is_none()
            && self.sender.is_none()
    }
}

pub fn add_capsule(new: &NewCapsule) -> Result<Capsule, AppError> {
    add_capsule_with_store(&JsonCapsuleStore::from_env()?, new)
}

pub fn edit_capsule(id: &str, edit: &CapsuleEdit) -> Result<Capsule, AppError> {
    edit_capsule_with_store(&JsonCapsuleStore::from_env()?, id, edit)
}

pub fn delete_capsule(id: &str) -> Result<Capsule, AppError> {
    delete_capsule_with_store(&JsonCapsuleStore::from_env()?, id)
}

pub fn get_capsule(id: &str) -> Result<Capsule, AppError> {
    get_capsule_with_store(&JsonCapsuleStore::from_env()?, id)
}

pub fn list_capsules() -> Result<Vec<Capsule>, AppError> {
    list_capsules_with_store(&JsonCapsuleStore::from_env()?)
}

pub fn capsule_status(capsule: &Capsule, now: OffsetDateTime) -> Option<CapsuleStatus> {
    let unlock_at = capsule.unlock_time()?;
    if capsule.notified {
        Some(CapsuleStatus::Notified)
    } else if unlock_at <= now {
        Some(CapsuleStatus::Due)
    } else {
        Some(CapsuleStatus::Locked)
    }
}

pub fn next_stage(capsule: &Capsule, now: OffsetDateTime) -> Option<ReminderStage> {
    capsule.recipient_address()?;
    let unlock_at = capsule.unlock_time()?;
    next_due_stage(unlock_at, now, &capsule.reminders_sent)
}

/// Tells the recipient a capsule is on its way. Does not touch any
/// scheduling state.
pub fn announce_capsule(
    capsule: &Capsule,
    channel: &dyn DeliveryChannel,
    settings: &SweepSettings,
) -> Result<DeliveryId, AppError> {
    let projection = capsule.projection();
    let to = projection
        .recipient_address()
        .ok_or_else(|| AppError::invalid_input("capsule has no recipient"))?;
    let link = access_link(&settings.frontend_url, &projection);
    let message = received_message(
        to,
        &projection,
        &link,
        OffsetDateTime::now_utc(),
        settings.offset,
    );
    Ok(channel.send(&message)?)
}

fn normalize_unlock_at(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("unlock_at is required"));
    }
    let parsed = OffsetDateTime::parse(trimmed, &Rfc3339)
        .map_err(|_| AppError::invalid_input("unlock_at must be RFC3339"))?;
    parsed
        .to_offset(UtcOffset::UTC)
        .format(&Rfc3339)
        .map_err(|err| AppError::invalid_data(err.to_string()))
}

fn optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn attachment_from_url(raw: &str) -> Result<Attachment, AppError> {
    let url = raw.trim();
    if url.is_empty() {
        return Err(AppError::invalid_input("attachment url is required"));
    }

    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(url)
        .to_string();
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let kind = match extension.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "heic" => AttachmentKind::Image,
        "mp4" | "mov" | "webm" | "mkv" => AttachmentKind::Video,
        "mp3" | "wav" | "ogg" | "m4a" | "flac" => AttachmentKind::Audio,
        _ => AttachmentKind::Link,
    };

    Ok(Attachment {
        file_name,
        file_url: url.to_string(),
        kind,
    })
}

fn require_id(id: &str) -> Result<&str, AppError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input("id is required"));
    }
    Ok(trimmed)
}

fn add_capsule_with_store(store: &JsonCapsuleStore, new: &NewCapsule) -> Result<Capsule, AppError> {
    let message = new.message.trim();
    if message.is_empty() {
        return Err(AppError::invalid_input("message is required"));
    }
    let unlock_at = normalize_unlock_at(&new.unlock_at)?;
    let attachments = new
        .attachment_urls
        .iter()
        .map(|url| attachment_from_url(url))
        .collect::<Result<Vec<_>, _>>()?;

    let now = OffsetDateTime::now_utc();
    let created_at = now
        .format(&Rfc3339)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;

    let capsule = Capsule {
        id: format!("cap-{}", now.unix_timestamp_nanos()),
        title: optional_text(new.title.as_deref()),
        message: message.to_string(),
        attachments,
        unlock_at,
        recipient: optional_text(new.recipient.as_deref()),
        sender: optional_text(new.sender.as_deref()),
        share_token: Some(uuid::Uuid::new_v4().simple().to_string()),
        created_at,
        notified: false,
        notified_at: None,
        notify_note: None,
        reminders_sent: Vec::new(),
    };

    store.modify(|capsules| {
        capsules.push(capsule.clone());
        Ok(())
    })?;
    log::info!("event=capsule_created capsule={} unlock_at={}", capsule.id, capsule.unlock_at);

    Ok(capsule)
}

fn edit_capsule_with_store(
    store: &JsonCapsuleStore,
    id: &str,
    edit: &CapsuleEdit,
) -> Result<Capsule, AppError> {
    let id = require_id(id)?;
    if edit.is_empty() {
        return Err(AppError::invalid_input("provide at least one field to update"));
    }
    let unlock_at = edit
        .unlock_at
        .as_deref()
        .map(normalize_unlock_at)
        .transpose()?;
    let message = match edit.message.as_deref().map(str::trim) {
        Some("") => return Err(AppError::invalid_input("message cannot be blank")),
        other => other.map(str::to_string),
    };

    store.modify(|capsules| {
        let capsule = capsules
            .iter_mut()
            .find(|capsule| capsule.id == id)
            .ok_or_else(|| AppError::invalid_input("capsule not found"))?;

        if let Some(title) = edit.title.as_deref() {
            capsule.title = optional_text(Some(title));
        }
        if let Some(message) = message.as_ref() {
            capsule.message = message.clone();
        }
        if let Some(recipient) = edit.recipient.as_deref() {
            capsule.recipient = optional_text(Some(recipient));
        }
        if let Some(sender) = edit.sender.as_deref() {
            capsule.sender = optional_text(Some(sender));
        }
        if let Some(unlock_at) = unlock_at.as_ref()
            && capsule.reschedule(unlock_at.clone())
        {
            log::info!(
                "event=capsule_rescheduled capsule={} unlock_at={}",
                capsule.id,
                capsule.unlock_at
            );
        }

        Ok(capsule.clone())
    })
}

fn delete_capsule_with_store(store: &JsonCapsuleStore, id: &str) -> Result<Capsule, AppError> {
    let id = require_id(id)?;
    store.modify(|capsules| {
        let index = capsules
            .iter()
            .position(|capsule| capsule.id == id)
            .ok_or_else(|| AppError::invalid_input("capsule not found"))?;
        Ok(capsules.remove(index))
    })
}

fn get_capsule_with_store(store: &JsonCapsuleStore, id: &str) -> Result<Capsule, AppError> {
    let id = require_id(id)?;
    store
        .load()?
        .into_iter()
        .find(|capsule| capsule.id == id)
        .ok_or_else(|| AppError::invalid_input("capsule not found"))
}

fn list_capsules_with_store(store: &JsonCapsuleStore) -> Result<Vec<Capsule>, AppError> {
    let mut capsules = store.load()?;
    capsules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(capsules)
}
