//! Session entity and verification phase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AlertError;

/// Session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SessionId {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| AlertError::InvalidArgument {
                field: "session_id",
                reason: e.to_string(),
            })
    }
}

/// Identity-verification stage of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPhase {
    #[default]
    Anonymous,
    PendingVerification,
    Verified,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::PendingVerification => write!(f, "pending-verification"),
            Self::Verified => write!(f, "verified"),
        }
    }
}

/// Outstanding verification code for a session.
///
/// Only hashes are kept; the raw code and phone number never leave the
/// request that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingVerification {
    #[serde(rename = "codeHash")]
    pub code_hash: String,

    #[serde(rename = "phoneNumberHash")]
    pub phone_number_hash: String,

    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,

    /// Failed confirmation attempts so far
    #[serde(default)]
    pub attempts: u32,
}

/// A device's current identity session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,

    #[serde(default)]
    pub phase: SessionPhase,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "phoneNumberHash"
    )]
    pub phone_number_hash: Option<String>,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingVerification>,
}

impl Session {
    /// Fresh anonymous session.
    #[must_use]
    pub fn anonymous(created_at: DateTime<Utc>) -> Self {
        Self {
            session_id: SessionId::generate(),
            phase: SessionPhase::Anonymous,
            phone_number_hash: None,
            created_at,
            pending: None,
        }
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        self.phase == SessionPhase::Verified
    }

    /// Drop any verification in progress and return to anonymous.
    pub fn reset_to_anonymous(&mut self) {
        self.phase = SessionPhase::Anonymous;
        self.pending = None;
    }
}
