//! Delivery intent: one tracked notification for one recipient.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AlertId, SessionId};

/// Delivery status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryStatus {
    /// Created, no attempt finished yet
    #[default]
    Pending,
    /// Transport accepted the push
    Sent,
    /// Last attempt failed; another attempt is due
    Failed,
    /// Attempts used up
    Exhausted,
}

impl DeliveryStatus {
    /// `Sent` and `Exhausted` never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Exhausted)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Tracked unit of "notify this recipient about this alert"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryIntent {
    #[serde(rename = "alertId")]
    pub alert_id: AlertId,

    #[serde(rename = "recipientSessionId")]
    pub recipient_session_id: SessionId,

    /// Attempts made so far
    pub attempt: u32,

    pub status: DeliveryStatus,

    /// Recipient's distance from the incident when the intent was created
    #[serde(rename = "distanceMeters")]
    pub distance_m: f64,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none", rename = "lastError")]
    pub last_error: Option<String>,
}

impl DeliveryIntent {
    #[must_use]
    pub fn new(alert_id: AlertId, recipient_session_id: SessionId, distance_m: f64) -> Self {
        Self {
            alert_id,
            recipient_session_id,
            attempt: 0,
            status: DeliveryStatus::Pending,
            distance_m,
            created_at: Utc::now(),
            last_error: None,
        }
    }
}
