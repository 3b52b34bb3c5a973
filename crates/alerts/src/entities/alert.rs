//! Alert entity and related types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{GeoPoint, SessionId};
use crate::errors::AlertError;

/// Alert identifier.
///
/// Backed by a UUIDv7, so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Generate a fresh, time-ordered id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for AlertId {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| AlertError::InvalidArgument {
                field: "alert_id",
                reason: e.to_string(),
            })
    }
}

/// Incident classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    #[default]
    General,
    Robbery,
    Assault,
    Suspicious,
    Other,
}

impl Classification {
    /// Violent or property crime gets a high-urgency push.
    #[must_use]
    pub const fn urgency(&self) -> push::Urgency {
        match self {
            Self::Robbery | Self::Assault => push::Urgency::High,
            Self::General | Self::Suspicious | Self::Other => push::Urgency::Normal,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Robbery => write!(f, "robbery"),
            Self::Assault => write!(f, "assault"),
            Self::Suspicious => write!(f, "suspicious"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "general" => Ok(Self::General),
            "robbery" | "theft" => Ok(Self::Robbery),
            "assault" => Ok(Self::Assault),
            "suspicious" => Ok(Self::Suspicious),
            "other" => Ok(Self::Other),
            _ => Err(AlertError::InvalidArgument {
                field: "classification",
                reason: format!("unknown classification '{s}'"),
            }),
        }
    }
}

/// Kind of attached media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// Reference to media uploaded elsewhere; the core never stores the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub uri: String,
}

/// A stored incident report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,

    #[serde(rename = "reporterSessionId")]
    pub reporter_session_id: SessionId,

    pub location: GeoPoint,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub classification: Classification,

    #[serde(default)]
    pub details: String,

    #[serde(default, rename = "mediaRefs", skip_serializing_if = "Vec::is_empty")]
    pub media_refs: Vec<MediaRef>,
}

impl Alert {
    /// Build the push payload for one recipient.
    #[must_use]
    pub fn summary(&self, distance_m: Option<f64>) -> push::AlertSummary {
        push::AlertSummary {
            alert_id: self.id.to_string(),
            classification: self.classification.to_string(),
            details: self.details.clone(),
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            created_at: self.created_at,
            urgency: self.classification.urgency(),
            distance_m,
        }
    }
}

/// An alert before the store has accepted it.
///
/// `id` and `created_at` are assigned by the store when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub id: Option<AlertId>,
    pub reporter_session_id: SessionId,
    pub location: GeoPoint,
    pub created_at: Option<DateTime<Utc>>,
    pub classification: Classification,
    pub details: String,
    pub media_refs: Vec<MediaRef>,
}

impl NewAlert {
    /// Create a draft with server-assigned id and timestamp.
    pub fn new(
        reporter_session_id: SessionId,
        location: GeoPoint,
        classification: Classification,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            reporter_session_id,
            location,
            created_at: None,
            classification,
            details: details.into(),
            media_refs: Vec::new(),
        }
    }

    /// Pin the creation time (imports, replays, tests).
    #[must_use]
    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Attach media references.
    #[must_use]
    pub fn with_media(mut self, media_refs: Vec<MediaRef>) -> Self {
        self.media_refs = media_refs;
        self
    }
}

/// Fields the original reporter may change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertAmendment {
    pub classification: Option<Classification>,
    pub details: Option<String>,
}

impl AlertAmendment {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classification.is_none() && self.details.is_none()
    }

    /// Apply the amendment in place.
    pub fn apply(&self, alert: &mut Alert) {
        if let Some(classification) = self.classification {
            alert.classification = classification;
        }
        if let Some(details) = &self.details {
            alert.details.clone_from(details);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_parse() {
        assert_eq!(
            "Robbery".parse::<Classification>().unwrap(),
            Classification::Robbery
        );
        assert_eq!(
            "suspicious".parse::<Classification>().unwrap(),
            Classification::Suspicious
        );
        assert!("riot".parse::<Classification>().is_err());
    }

    #[test]
    fn test_alert_ids_sort_by_creation() {
        let first = AlertId::generate();
        let second = AlertId::generate();
        assert!(first < second);
    }

    #[test]
    fn test_amendment_only_touches_given_fields() {
        let mut alert = Alert {
            id: AlertId::generate(),
            reporter_session_id: SessionId::generate(),
            location: GeoPoint::new(40.7128, -74.006),
            created_at: Utc::now(),
            classification: Classification::General,
            details: "Reporte de emergencia".to_string(),
            media_refs: vec![],
        };

        AlertAmendment {
            classification: Some(Classification::Robbery),
            details: None,
        }
        .apply(&mut alert);

        assert_eq!(alert.classification, Classification::Robbery);
        assert_eq!(alert.details, "Reporte de emergencia");
    }

    #[test]
    fn test_summary_carries_urgency() {
        let alert = Alert {
            id: AlertId::generate(),
            reporter_session_id: SessionId::generate(),
            location: GeoPoint::new(40.7128, -74.006),
            created_at: Utc::now(),
            classification: Classification::Assault,
            details: String::new(),
            media_refs: vec![],
        };
        let summary = alert.summary(Some(42.0));
        assert_eq!(summary.classification, "assault");
        assert_eq!(summary.urgency, push::Urgency::High);
        assert_eq!(summary.distance_m, Some(42.0));
    }
}
