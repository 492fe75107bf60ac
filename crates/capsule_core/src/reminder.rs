//! Reminder stages and the calculator that picks the next one to send.
//!
//! Stages are checked from the farthest threshold to the nearest. A capsule
//! first seen with five minutes left gets the `10m` reminder on that pass and
//! the `1m` reminder on a later one, so stages always go out in order.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReminderStage {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "10m")]
    TenMinutes,
    #[serde(rename = "1m")]
    Minute,
}

impl ReminderStage {
    /// Far to near.
    pub const ALL: [ReminderStage; 4] = [
        ReminderStage::Day,
        ReminderStage::Hour,
        ReminderStage::TenMinutes,
        ReminderStage::Minute,
    ];

    pub fn threshold(self) -> Duration {
        match self {
            Self::Day => Duration::seconds(86_400),
            Self::Hour => Duration::seconds(3_600),
            Self::TenMinutes => Duration::seconds(600),
            Self::Minute => Duration::seconds(60),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "24h",
            Self::Hour => "1h",
            Self::TenMinutes => "10m",
            Self::Minute => "1m",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for ReminderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the farthest stage whose threshold has been reached and that is
/// not in `sent`, or `None` once the unlock time has passed.
pub fn next_due_stage(
    unlock_at: OffsetDateTime,
    now: OffsetDateTime,
    sent: &[ReminderStage],
) -> Option<ReminderStage> {
    let remaining = unlock_at - now;
    if remaining <= Duration::ZERO {
        return None;
    }

    ReminderStage::ALL
        .into_iter()
        .find(|stage| stage.threshold() >= remaining && !sent.contains(stage))
}
