use crate::delivery::{DeliveryChannel, DeliveryId};
use crate::error::{AppError, DeliveryError};
use crate::message::OutgoingMessage;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.resend.com/emails";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

/// Email delivery through the Resend HTTP API.
///
/// Uses the blocking client, so `send` must run off the async executor
/// (the scheduling driver calls sweeps through `spawn_blocking`).
pub struct ResendChannel {
    client: Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl ResendChannel {
    pub fn new(api_key: &str, from: &str) -> Result<Self, AppError> {
        Self::with_endpoint(api_key, from, DEFAULT_ENDPOINT)
    }

    pub fn with_endpoint(api_key: &str, from: &str, endpoint: &str) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| AppError::delivery(err.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            from: from.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

fn classify_failure(status: StatusCode, detail: &str) -> DeliveryError {
    let message = format!("{status}: {}", detail.trim());
    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        DeliveryError::rejected(message)
    } else {
        DeliveryError::transient(message)
    }
}

impl DeliveryChannel for ResendChannel {
    fn send(&self, message: &OutgoingMessage) -> Result<DeliveryId, DeliveryError> {
        let request = SendRequest {
            from: &self.from,
            to: [message.to.as_str()],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|err| DeliveryError::transient(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(classify_failure(status, &detail));
        }

        let parsed: SendResponse = response
            .json()
            .map_err(|err| DeliveryError::transient(format!("unreadable response: {err}")))?;
        log::info!("event=delivery_sent channel=resend to={} id={}", message.to, parsed.id);
        Ok(DeliveryId(parsed.id))
    }
}
