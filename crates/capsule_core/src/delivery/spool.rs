use crate::delivery::{DeliveryChannel, DeliveryId};
use crate::error::DeliveryError;
use crate::message::OutgoingMessage;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Serialize)]
struct SpoolEntry<'a> {
    id: &'a str,
    queued_at: String,
    #[serde(flatten)]
    message: &'a OutgoingMessage,
}

/// Appends each message as one JSON line to a local outbox file.
pub struct SpoolChannel {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SpoolChannel {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeliveryChannel for SpoolChannel {
    fn send(&self, message: &OutgoingMessage) -> Result<DeliveryId, DeliveryError> {
        if message.to.trim().is_empty() {
            return Err(DeliveryError::rejected("recipient is required"));
        }

        let now = OffsetDateTime::now_utc();
        let id = format!("spool-{}", now.unix_timestamp_nanos());
        let entry = SpoolEntry {
            id: &id,
            queued_at: now
                .format(&Rfc3339)
                .map_err(|err| DeliveryError::rejected(err.to_string()))?,
            message,
        };
        let line =
            serde_json::to_string(&entry).map_err(|err| DeliveryError::rejected(err.to_string()))?;

        let _guard = self
            .lock
            .lock()
            .map_err(|_| DeliveryError::transient("spool lock poisoned"))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| DeliveryError::transient(err.to_string()))?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| DeliveryError::transient(err.to_string()))?;
        writeln!(file, "{line}").map_err(|err| DeliveryError::transient(err.to_string()))?;

        Ok(DeliveryId(id))
    }
}
