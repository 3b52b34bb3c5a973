#![warn(clippy::pedantic)]
// Allow common pedantic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::similar_names)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::wildcard_imports)]
#![allow(clippy::uninlined_format_args)]

//! # Alerts
//!
//! Proximity alerting and fanout engine for VeciSafe neighborhood-safety
//! reports.
//!
//! This crate provides:
//! - Identity sessions (anonymous, pending verification, verified) that
//!   gate who may report
//! - A grid-bucketed geo index answering "who is within `r` meters"
//! - An append-only, time-ordered alert ledger (memory or JSON file)
//! - Fanout of each new alert to nearby subscribers with deduplicated,
//!   retried delivery intents recorded in a delivery store (memory or JSON
//!   file) so a restart resumes where it stopped
//! - `AlertService`, which ties the pieces together
//!
//! ## Example
//!
//! ```rust,ignore
//! use alerts::{AlertService, Backends, Classification, Config, GeoPoint, Report};
//!
//! let config = Config::from_env();
//! let backends = Backends::in_memory(&config, push::from_env(), verification, clock);
//! let service = AlertService::new(config, backends)?;
//!
//! let session = service.sessions().restore("device-key").await?;
//! let reported = service
//!     .report_alert(
//!         &session.session_id,
//!         Report::new(GeoPoint::new(40.7128, -74.0060), Classification::Robbery, ""),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! ```

// Core entities
pub mod entities;

// Error types
pub mod errors;

// Configuration and time
pub mod clock;
pub mod config;

// Geospatial index
pub mod geo;

// Storage layer
pub mod storage;

// Sessions and verification
pub mod session;

// Fanout
pub mod fanout;

// Collaborator boundaries
pub mod location;

// Orchestration
pub mod service;

// Re-export key types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use entities::{
    Alert, AlertAmendment, AlertId, Classification, DeliveryIntent, DeliveryStatus, GeoPoint,
    MediaKind, MediaRef, NewAlert, Session, SessionId, SessionPhase, SubscriberRecord,
};
pub use errors::{AlertError, AlertResult, ErrorKind};
pub use fanout::{
    DeliveryStore, DispatchHandle, DispatchReport, FanoutDispatcher, FileDeliveryStore,
    MemoryDeliveryStore, RetryPolicy, DELIVERIES_FILE,
};
pub use geo::{haversine_m, GeoIndex, Nearby};
pub use location::{FixedLocation, LocationError, LocationProvider, LocationReading};
pub use service::{
    AlertService, Backends, FeedStats, RecencyFilter, Report, Reported, TimeWindow,
};
pub use session::{
    FileSessionStore, LogVerificationSender, MemorySessionStore, SessionManager, SessionStore,
    VerificationSender,
};
pub use storage::{AlertStore, FileAlertStore, MemoryAlertStore};
