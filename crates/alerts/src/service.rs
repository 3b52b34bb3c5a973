//! Alert orchestration: the operations a client calls.
//!
//! `AlertService` validates a report against the reporter's session,
//! persists it, registers the reporter as a subscriber and schedules
//! fanout. Read paths go straight to the store and the geo index.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use push::PushTransport;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::entities::{
    Alert, AlertAmendment, AlertId, Classification, GeoPoint, MediaRef, NewAlert, SessionId,
};
use crate::errors::{AlertError, AlertResult};
use crate::fanout::{DeliveryStore, DispatchHandle, FanoutDispatcher, MemoryDeliveryStore};
use crate::geo::{haversine_m, GeoIndex};
use crate::location::LocationProvider;
use crate::session::{MemorySessionStore, SessionManager, SessionStore, VerificationSender};
use crate::storage::{AlertStore, MemoryAlertStore};

/// Recency filters offered by the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RecencyFilter {
    #[serde(rename = "24h")]
    Last24Hours,
    #[serde(rename = "week")]
    LastWeek,
    #[default]
    All,
}

impl RecencyFilter {
    /// Window ending far in the future and starting at the filter's cutoff.
    #[must_use]
    pub fn window(self, now: DateTime<Utc>) -> TimeWindow {
        match self {
            Self::Last24Hours => TimeWindow::since(now - Duration::hours(24)),
            Self::LastWeek => TimeWindow::since(now - Duration::weeks(1)),
            Self::All => TimeWindow::all(),
        }
    }
}

impl std::fmt::Display for RecencyFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Last24Hours => write!(f, "24h"),
            Self::LastWeek => write!(f, "week"),
            Self::All => write!(f, "all"),
        }
    }
}

impl std::str::FromStr for RecencyFilter {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "24h" | "day" => Ok(Self::Last24Hours),
            "week" | "1week" | "7d" => Ok(Self::LastWeek),
            "all" => Ok(Self::All),
            _ => Err(AlertError::InvalidArgument {
                field: "filter",
                reason: format!("unknown recency filter '{s}' (use 24h, week or all)"),
            }),
        }
    }
}

/// Inclusive time range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeWindow {
    #[must_use]
    pub const fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// From `since` onwards, future-dated alerts included.
    #[must_use]
    pub const fn since(since: DateTime<Utc>) -> Self {
        Self::new(since, DateTime::<Utc>::MAX_UTC)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC)
    }
}

/// Feed counters shown on the home screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedStats {
    pub total: usize,
    /// Alerts since 00:00 UTC today
    pub today: usize,
}

/// A new incident report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub location: GeoPoint,
    pub classification: Classification,
    pub details: String,
    pub media_refs: Vec<MediaRef>,
}

impl Report {
    pub fn new(
        location: GeoPoint,
        classification: Classification,
        details: impl Into<String>,
    ) -> Self {
        Self {
            location,
            classification,
            details: details.into(),
            media_refs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_media(mut self, media_refs: Vec<MediaRef>) -> Self {
        self.media_refs = media_refs;
        self
    }
}

/// Result of a successful report.
///
/// `dispatch` is `None` only when fanout could not be scheduled; the alert
/// is stored either way.
#[derive(Debug)]
pub struct Reported {
    pub alert: Alert,
    pub dispatch: Option<DispatchHandle>,
}

/// Collaborators the service is wired from.
pub struct Backends {
    pub alerts: Arc<dyn AlertStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub verification: Arc<dyn VerificationSender>,
    pub push: Arc<dyn PushTransport>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub geo: Arc<GeoIndex>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// Volatile stores with the given transports.
    pub fn in_memory(
        config: &Config,
        push: Arc<dyn PushTransport>,
        verification: Arc<dyn VerificationSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            alerts: Arc::new(MemoryAlertStore::with_clock(clock.clone())),
            sessions: Arc::new(MemorySessionStore::new()),
            verification,
            push,
            deliveries: Arc::new(MemoryDeliveryStore::new()),
            geo: Arc::new(GeoIndex::new(config.geo_cell_degrees)),
            clock,
        }
    }
}

/// Entry point for every client-facing operation.
pub struct AlertService {
    config: Config,
    sessions: SessionManager,
    store: Arc<dyn AlertStore>,
    geo: Arc<GeoIndex>,
    dispatcher: FanoutDispatcher,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl AlertService {
    pub fn new(config: Config, backends: Backends) -> AlertResult<Self> {
        config.validate()?;

        let sessions = SessionManager::new(
            &config,
            backends.sessions,
            backends.verification,
            backends.geo.clone(),
            backends.clock.clone(),
        );
        let dispatcher = FanoutDispatcher::new(
            &config,
            backends.geo.clone(),
            backends.push,
            backends.deliveries.clone(),
            backends.clock.clone(),
        );

        info!(
            store = backends.alerts.storage_type(),
            deliveries = backends.deliveries.storage_type(),
            radius_m = config.notification_radius_m,
            require_verified = config.require_verified,
            "Alert service ready"
        );

        Ok(Self {
            config,
            sessions,
            store: backends.alerts,
            geo: backends.geo,
            dispatcher,
            clock: backends.clock,
            shutdown: CancellationToken::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub const fn dispatcher(&self) -> &FanoutDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    /// Store a report and schedule its fanout.
    ///
    /// `cancel` aborts the report up to the moment the alert is written.
    /// Once stored, fanout is always scheduled and only stops on
    /// [`shutdown`](Self::shutdown). A fanout that cannot be scheduled is
    /// logged and never undoes the append. After shutdown every report is
    /// rejected with [`AlertError::Cancelled`].
    pub async fn report_alert(
        &self,
        session_id: &SessionId,
        report: Report,
        cancel: &CancellationToken,
    ) -> AlertResult<Reported> {
        self.authorize_reporter(session_id).await?;
        report.location.validate()?;
        if cancel.is_cancelled() || self.shutdown.is_cancelled() {
            return Err(AlertError::Cancelled);
        }

        let draft = NewAlert::new(
            *session_id,
            report.location,
            report.classification,
            report.details,
        )
        .with_media(report.media_refs);
        let alert = self.store.append(draft).await?;
        info!(
            alert_id = %alert.id,
            session_id = %session_id,
            classification = %alert.classification,
            "Alert reported"
        );

        // The reporter is a subscriber from now on.
        if let Err(e) = self
            .geo
            .upsert(*session_id, alert.location, self.clock.now())
            .await
        {
            warn!(session_id = %session_id, error = %e, "Failed to register reporter location");
        }

        let dispatch = match self
            .dispatcher
            .dispatch(&alert, self.shutdown.child_token())
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "Fanout not scheduled");
                None
            }
        };

        Ok(Reported { alert, dispatch })
    }

    /// Report at the device's current location.
    pub async fn report_from_provider(
        &self,
        session_id: &SessionId,
        provider: &dyn LocationProvider,
        classification: Classification,
        details: impl Into<String> + Send,
        cancel: &CancellationToken,
    ) -> AlertResult<Reported> {
        self.authorize_reporter(session_id).await?;

        let reading = provider
            .current()
            .await
            .map_err(|e| AlertError::LocationUnavailable {
                reason: e.to_string(),
            })?;
        debug!(
            session_id = %session_id,
            location = %reading.point,
            accuracy_m = reading.accuracy_m,
            "Location reading"
        );

        self.report_alert(
            session_id,
            Report::new(reading.point, classification, details),
            cancel,
        )
        .await
    }

    /// Register or move the session's subscriber location.
    pub async fn update_location(
        &self,
        session_id: &SessionId,
        location: GeoPoint,
    ) -> AlertResult<()> {
        self.sessions.get(session_id).await?;
        self.geo.upsert(*session_id, location, self.clock.now()).await
    }

    /// Stop notifying a session. Returns whether it was subscribed.
    pub async fn unsubscribe(&self, session_id: &SessionId) -> bool {
        let removed = self.geo.remove(session_id).await;
        if removed {
            info!(session_id = %session_id, "Notifications turned off");
        }
        removed
    }

    /// Change classification or details of one's own alert.
    pub async fn amend_alert(
        &self,
        session_id: &SessionId,
        alert_id: &AlertId,
        amendment: &AlertAmendment,
    ) -> AlertResult<Alert> {
        let alert = self.store.amend(alert_id, session_id, amendment).await?;
        info!(alert_id = %alert_id, session_id = %session_id, "Alert amended");
        Ok(alert)
    }

    pub async fn recent(&self, n: usize) -> AlertResult<Vec<Alert>> {
        self.store.recent(n).await
    }

    pub async fn windowed(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> AlertResult<Vec<Alert>> {
        self.store.window(since, until).await
    }

    /// Alerts within `radius_m` of `location` inside `window`, newest first.
    pub async fn nearby_alerts(
        &self,
        location: GeoPoint,
        radius_m: f64,
        window: TimeWindow,
    ) -> AlertResult<Vec<Alert>> {
        location.validate()?;
        if radius_m.is_nan() || radius_m < 0.0 {
            return Err(AlertError::InvalidArgument {
                field: "radius_m",
                reason: "must be a non-negative number of meters".to_string(),
            });
        }

        let alerts = self.store.window(window.since, window.until).await?;
        Ok(alerts
            .into_iter()
            .filter(|alert| haversine_m(location, alert.location) <= radius_m)
            .collect())
    }

    /// Feed filtered by recency.
    pub async fn feed(&self, filter: RecencyFilter) -> AlertResult<Vec<Alert>> {
        let window = filter.window(self.clock.now());
        self.store.window(window.since, window.until).await
    }

    pub async fn stats(&self) -> AlertResult<FeedStats> {
        let now = self.clock.now();
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map_or(now, |t| t.and_utc());

        let (total, today) =
            futures::try_join!(self.store.count(), self.store.count_since(midnight))?;
        Ok(FeedStats { total, today })
    }

    /// Re-drive every alert that still has Pending or Failed intents.
    pub async fn resume_deliveries(&self) -> AlertResult<Vec<DispatchHandle>> {
        let mut handles = Vec::new();
        for alert_id in self.dispatcher.pending_alert_ids().await? {
            let Some(alert) = self.store.get(&alert_id).await? else {
                warn!(alert_id = %alert_id, "Pending deliveries for unknown alert");
                continue;
            };
            handles.push(
                self.dispatcher
                    .resume(&alert, self.shutdown.child_token())
                    .await?,
            );
        }
        if !handles.is_empty() {
            info!(alerts = handles.len(), "Resumed deliveries");
        }
        Ok(handles)
    }

    /// Stop taking reports and scheduling delivery attempts. Unfinished
    /// intents stay in the delivery store for [`resume_deliveries`](Self::resume_deliveries).
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn authorize_reporter(&self, session_id: &SessionId) -> AlertResult<()> {
        let session = self.sessions.get(session_id).await?;
        if self.config.require_verified && !session.is_verified() {
            return Err(AlertError::Unauthenticated {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }
}
