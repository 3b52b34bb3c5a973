//! Core data structures for the alerting engine.

mod alert;
mod delivery;
mod location;
mod session;

pub use alert::{Alert, AlertAmendment, AlertId, Classification, MediaKind, MediaRef, NewAlert};
pub use delivery::{DeliveryIntent, DeliveryStatus};
pub use location::GeoPoint;
pub use session::{PendingVerification, Session, SessionId, SessionPhase};

/// A live location the geo index tracks for fanout: where to notify, not
/// what happened.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SubscriberRecord {
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,

    pub location: GeoPoint,

    #[serde(rename = "registeredAt")]
    pub registered_at: chrono::DateTime<chrono::Utc>,
}
