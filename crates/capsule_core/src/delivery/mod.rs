use crate::config::{Config, DeliveryKind};
use crate::error::{AppError, DeliveryError};
use crate::message::OutgoingMessage;
use std::sync::Arc;

mod resend;
mod spool;

pub use resend::ResendChannel;
pub use spool::SpoolChannel;

const DISABLE_ENV_VAR: &str = "CAPSULE_DISABLE_DELIVERY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryId(pub String);

/// Sends a message to a recipient. Expected failures come back as
/// `DeliveryError`; implementations must not panic on them.
pub trait DeliveryChannel: Send + Sync {
    fn send(&self, message: &OutgoingMessage) -> Result<DeliveryId, DeliveryError>;
}

pub struct NoopChannel;

impl DeliveryChannel for NoopChannel {
    fn send(&self, message: &OutgoingMessage) -> Result<DeliveryId, DeliveryError> {
        log::debug!("event=delivery_skipped channel=noop to={}", message.to);
        Ok(DeliveryId("noop".to_string()))
    }
}

pub fn channel_from_config(config: &Config) -> Result<Arc<dyn DeliveryChannel>, AppError> {
    if std::env::var(DISABLE_ENV_VAR).is_ok() {
        return Ok(Arc::new(NoopChannel));
    }

    match config.delivery_kind()? {
        DeliveryKind::Noop => Ok(Arc::new(NoopChannel)),
        DeliveryKind::Spool => Ok(Arc::new(SpoolChannel::new(config.spool_path()?))),
        DeliveryKind::Resend => {
            let api_key = config
                .resend_api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .ok_or_else(|| AppError::config("resend delivery requires RESEND_API_KEY"))?;
            Ok(Arc::new(ResendChannel::new(api_key, &config.mail_from())?))
        }
    }
}
