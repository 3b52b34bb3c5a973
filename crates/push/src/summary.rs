//! Notification payload handed to push transports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How urgently a recipient should be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Informational - suspicious activity, general reports
    Normal,
    /// Critical - violent or property crime in progress
    High,
}

impl Urgency {
    /// Get display name for this urgency.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Everything a push transport needs to render one incident notification.
///
/// This is deliberately flat and string-typed so transports do not depend on
/// the core crate's entity types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub alert_id: String,
    /// Lowercase classification label, e.g. `robbery`.
    pub classification: String,
    pub details: String,
    pub latitude: f64,
    pub longitude: f64,
    pub created_at: DateTime<Utc>,
    pub urgency: Urgency,
    /// Great-circle distance from the recipient's last known location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
}

impl AlertSummary {
    /// Short headline for the notification.
    #[must_use]
    pub fn title(&self) -> String {
        let mut label = self.classification.clone();
        if let Some(first) = label.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        match self.distance_m {
            Some(d) => format!("{label} reported {} away", format_distance(d)),
            None => format!("{label} reported nearby"),
        }
    }

    /// Notification body text.
    #[must_use]
    pub fn body(&self) -> String {
        if self.details.trim().is_empty() {
            format!("Reported at {}", self.created_at.format("%H:%M UTC"))
        } else {
            self.details.clone()
        }
    }
}

/// Format meters for display: `85 m`, `1.2 km`.
fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{} m", meters.round())
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(distance_m: Option<f64>) -> AlertSummary {
        AlertSummary {
            alert_id: "a1".to_string(),
            classification: "robbery".to_string(),
            details: String::new(),
            latitude: 40.7128,
            longitude: -74.006,
            created_at: DateTime::parse_from_rfc3339("2026-01-15T12:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            urgency: Urgency::High,
            distance_m,
        }
    }

    #[test]
    fn test_title_with_distance() {
        assert_eq!(summary(Some(14.2)).title(), "Robbery reported 14 m away");
        assert_eq!(summary(Some(1320.0)).title(), "Robbery reported 1.3 km away");
        assert_eq!(summary(None).title(), "Robbery reported nearby");
    }

    #[test]
    fn test_body_falls_back_to_time() {
        assert_eq!(summary(None).body(), "Reported at 12:30 UTC");
    }
}
