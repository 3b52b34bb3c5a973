//! Turns one stored alert into per-recipient push deliveries.

use std::sync::Arc;
use std::time::Duration;

use push::{AlertSummary, PushError, PushTransport};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ledger::DeliveryLedger;
use super::retry::RetryPolicy;
use super::store::DeliveryStore;
use crate::clock::Clock;
use crate::config::Config;
use crate::entities::{Alert, AlertId, DeliveryIntent, DeliveryStatus, SessionId};
use crate::errors::{AlertError, AlertResult};
use crate::geo::GeoIndex;

/// Outcome of one dispatch once every driven intent has stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: usize,
    pub exhausted: usize,
    /// Left Pending/Failed by cancellation
    pub pending: usize,
}

impl DispatchReport {
    fn record(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Sent => self.sent += 1,
            DeliveryStatus::Exhausted => self.exhausted += 1,
            DeliveryStatus::Pending | DeliveryStatus::Failed => self.pending += 1,
        }
    }
}

/// A scheduled fanout. Dropping the handle does not stop delivery.
#[derive(Debug)]
pub struct DispatchHandle {
    alert_id: AlertId,
    intents: Vec<DeliveryIntent>,
    driven: usize,
    join: JoinHandle<DispatchReport>,
}

impl DispatchHandle {
    #[must_use]
    pub const fn alert_id(&self) -> AlertId {
        self.alert_id
    }

    /// Intents this dispatch created, nearest recipient first.
    #[must_use]
    pub fn intents(&self) -> &[DeliveryIntent] {
        &self.intents
    }

    /// Number of intents this dispatch is delivering (new and resumed).
    #[must_use]
    pub const fn driven(&self) -> usize {
        self.driven
    }

    /// Wait until every driven intent is Sent, Exhausted or released by
    /// cancellation.
    pub async fn wait(self) -> AlertResult<DispatchReport> {
        self.join.await.map_err(|e| AlertError::Internal {
            reason: format!("fanout supervisor for alert '{}' failed: {e}", self.alert_id),
        })
    }
}

/// Shared state every delivery task needs.
#[derive(Clone)]
struct Courier {
    transport: Arc<dyn PushTransport>,
    ledger: Arc<DeliveryLedger>,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl Courier {
    /// Run one intent to a terminal state or until cancelled.
    async fn deliver(
        self,
        mut intent: DeliveryIntent,
        summary: AlertSummary,
        cancel: CancellationToken,
    ) -> DeliveryStatus {
        let alert_id = intent.alert_id;
        let recipient = intent.recipient_session_id;
        let recipient_key = recipient.to_string();

        loop {
            if !self.policy.allows_retry(intent.attempt) {
                intent.status = DeliveryStatus::Exhausted;
                intent
                    .last_error
                    .get_or_insert_with(|| "attempt budget used".to_string());
                self.settle(&intent).await;
                return DeliveryStatus::Exhausted;
            }

            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.ledger.release(alert_id, recipient).await;
                    return intent.status;
                }
                permit = self.permits.acquire() => permit,
            };
            let Ok(permit) = permit else {
                self.ledger.release(alert_id, recipient).await;
                return intent.status;
            };

            intent.attempt += 1;
            let result = self.transport.send(&recipient_key, &summary).await;
            drop(permit);

            let err = match result {
                Ok(()) => {
                    intent.status = DeliveryStatus::Sent;
                    intent.last_error = None;
                    self.settle(&intent).await;
                    info!(
                        alert_id = %alert_id,
                        recipient = %recipient,
                        attempt = intent.attempt,
                        transport = self.transport.name(),
                        "Push delivered"
                    );
                    return DeliveryStatus::Sent;
                }
                Err(err) => err,
            };
            intent.last_error = Some(err.to_string());

            if !err.is_retryable() || !self.policy.allows_retry(intent.attempt) {
                warn!(
                    alert_id = %alert_id,
                    recipient = %recipient,
                    attempt = intent.attempt,
                    error = %err,
                    "Delivery exhausted"
                );
                intent.status = DeliveryStatus::Exhausted;
                self.settle(&intent).await;
                return DeliveryStatus::Exhausted;
            }

            let delay = self.backoff(intent.attempt, &err);
            debug!(
                alert_id = %alert_id,
                recipient = %recipient,
                attempt = intent.attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Delivery failed, retrying"
            );
            intent.status = DeliveryStatus::Failed;
            self.write(&intent).await;

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.ledger.release(alert_id, recipient).await;
                    return intent.status;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Record the intent; a failed write only costs a possible resend.
    async fn write(&self, intent: &DeliveryIntent) {
        if let Err(e) = self.ledger.record(intent).await {
            error!(
                alert_id = %intent.alert_id,
                recipient = %intent.recipient_session_id,
                status = %intent.status,
                error = %e,
                "Failed to record delivery state"
            );
        }
    }

    /// Record a terminal state and give up ownership of the pair.
    async fn settle(&self, intent: &DeliveryIntent) {
        self.write(intent).await;
        self.ledger
            .release(intent.alert_id, intent.recipient_session_id)
            .await;
    }

    fn backoff(&self, attempt: u32, err: &PushError) -> Duration {
        let delay = self.policy.delay_after(attempt);
        match err {
            PushError::RateLimited { retry_after_secs } => {
                delay.max(Duration::from_secs(*retry_after_secs))
            }
            _ => delay,
        }
    }
}

/// Fans alerts out to nearby subscribers.
///
/// Every send, across all alerts, goes through one semaphore bounded by
/// `max_concurrent_deliveries`. A permit is held for the send only, never
/// across a backoff sleep.
pub struct FanoutDispatcher {
    geo: Arc<GeoIndex>,
    clock: Arc<dyn Clock>,
    courier: Courier,
    radius_m: f64,
}

impl FanoutDispatcher {
    pub fn new(
        config: &Config,
        geo: Arc<GeoIndex>,
        transport: Arc<dyn PushTransport>,
        deliveries: Arc<dyn DeliveryStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            geo,
            clock,
            courier: Courier {
                transport,
                ledger: Arc::new(DeliveryLedger::new(deliveries)),
                permits: Arc::new(Semaphore::new(config.max_concurrent_deliveries.max(1))),
                policy: config.retry,
            },
            radius_m: config.notification_radius_m,
        }
    }

    /// Notification radius in meters
    #[must_use]
    pub const fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Create intents for every subscriber near the alert (except the
    /// reporter) and start delivering them.
    ///
    /// Intents are in the delivery store before this returns, even when
    /// `cancel` has already fired; in that case nothing is sent and the
    /// intents wait for [`resume`](Self::resume). Replaying the same alert
    /// creates nothing for pairs that already have a current intent and
    /// picks up idle Pending/Failed ones.
    pub async fn dispatch(
        &self,
        alert: &Alert,
        cancel: CancellationToken,
    ) -> AlertResult<DispatchHandle> {
        let recipients: Vec<(SessionId, f64)> = self
            .geo
            .query_with_distance(alert.location, self.radius_m)
            .await
            .into_iter()
            .filter(|n| n.session_id != alert.reporter_session_id)
            .map(|n| (n.session_id, n.distance_m))
            .collect();

        self.schedule(alert, &recipients, cancel).await
    }

    /// Re-drive idle Pending/Failed intents of an alert without looking for
    /// new recipients.
    pub async fn resume(
        &self,
        alert: &Alert,
        cancel: CancellationToken,
    ) -> AlertResult<DispatchHandle> {
        self.schedule(alert, &[], cancel).await
    }

    async fn schedule(
        &self,
        alert: &Alert,
        recipients: &[(SessionId, f64)],
        cancel: CancellationToken,
    ) -> AlertResult<DispatchHandle> {
        let claim = self
            .courier
            .ledger
            .claim(alert.id, recipients, self.clock.now())
            .await?;

        info!(
            alert_id = %alert.id,
            nearby = recipients.len(),
            created = claim.created.len(),
            driven = claim.to_drive.len(),
            cancelled = cancel.is_cancelled(),
            "Fanout scheduled"
        );

        let mut deliveries = JoinSet::new();
        for intent in &claim.to_drive {
            let courier = self.courier.clone();
            let summary = alert.summary(Some(intent.distance_m));
            deliveries.spawn(courier.deliver(intent.clone(), summary, cancel.clone()));
        }

        let alert_id = alert.id;
        let driven = claim.to_drive.len();
        let join = tokio::spawn(async move {
            let mut report = DispatchReport::default();
            while let Some(result) = deliveries.join_next().await {
                match result {
                    Ok(status) => report.record(status),
                    Err(e) => {
                        error!(alert_id = %alert_id, error = %e, "Delivery task panicked");
                        report.pending += 1;
                    }
                }
            }
            debug!(
                alert_id = %alert_id,
                sent = report.sent,
                exhausted = report.exhausted,
                pending = report.pending,
                "Fanout finished"
            );
            report
        });

        Ok(DispatchHandle {
            alert_id,
            intents: claim.created,
            driven,
            join,
        })
    }

    /// Every intent recorded for an alert, archived ones included.
    pub async fn intents(&self, alert_id: &AlertId) -> AlertResult<Vec<DeliveryIntent>> {
        self.courier.ledger.store().intents(alert_id).await
    }

    /// Intents that ran out of attempts.
    pub async fn exhausted(&self) -> AlertResult<Vec<DeliveryIntent>> {
        self.courier.ledger.store().exhausted().await
    }

    /// Alerts with deliveries still outstanding.
    pub async fn pending_alert_ids(&self) -> AlertResult<Vec<AlertId>> {
        self.courier.ledger.store().pending_alert_ids().await
    }

    /// Number of intents currently owned by delivery tasks.
    pub async fn in_flight(&self) -> usize {
        self.courier.ledger.in_flight().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::fanout::store::MemoryDeliveryStore;
    use crate::entities::{Classification, GeoPoint};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const NYC: GeoPoint = GeoPoint::new(40.7128, -74.0060);

    /// Fails the first `failures` sends per recipient, then succeeds.
    #[derive(Default)]
    struct ScriptedTransport {
        failures: u32,
        error: Option<fn() -> PushError>,
        delay: Duration,
        calls: Mutex<HashMap<String, u32>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedTransport {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        fn calls_for(&self, recipient: &SessionId) -> u32 {
            self.calls
                .lock()
                .unwrap()
                .get(&recipient.to_string())
                .copied()
                .unwrap_or(0)
        }

        fn total_calls(&self) -> u32 {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl PushTransport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, recipient: &str, _summary: &AlertSummary) -> Result<(), PushError> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(recipient.to_string()).or_insert(0);
                *count += 1;
                *count
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if call <= self.failures {
                let make = self
                    .error
                    .unwrap_or(|| PushError::Other("gateway timeout".to_string()));
                return Err(make());
            }
            Ok(())
        }
    }

    fn config(base_delay_ms: u64) -> Config {
        Config {
            notification_radius_m: 500.0,
            max_concurrent_deliveries: 4,
            retry: RetryPolicy {
                base_delay_ms,
                factor: 2,
                max_attempts: 5,
            },
            ..Config::default()
        }
    }

    fn alert(reporter: SessionId) -> Alert {
        Alert {
            id: AlertId::generate(),
            reporter_session_id: reporter,
            location: NYC,
            created_at: Utc::now(),
            classification: Classification::Robbery,
            details: String::new(),
            media_refs: vec![],
        }
    }

    async fn setup(
        config: &Config,
        transport: Arc<ScriptedTransport>,
        subscribers: &[(SessionId, GeoPoint)],
    ) -> FanoutDispatcher {
        let geo = Arc::new(GeoIndex::new(0.01));
        for (id, point) in subscribers {
            geo.upsert(*id, *point, Utc::now()).await.unwrap();
        }
        FanoutDispatcher::new(
            config,
            geo,
            transport,
            Arc::new(MemoryDeliveryStore::new()),
            Arc::new(SystemClock),
        )
    }

    #[tokio::test]
    async fn test_notifies_only_nearby_non_reporters() {
        let reporter = SessionId::generate();
        let near = SessionId::generate();
        let far = SessionId::generate();
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = setup(
            &config(1),
            transport.clone(),
            &[
                (reporter, NYC),
                (near, GeoPoint::new(40.7129, -74.0061)),
                (far, GeoPoint::new(40.7589, -73.9851)),
            ],
        )
        .await;

        let alert = alert(reporter);
        let handle = dispatcher
            .dispatch(&alert, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.intents().len(), 1);
        assert_eq!(handle.intents()[0].recipient_session_id, near);
        assert_eq!(handle.intents()[0].status, DeliveryStatus::Pending);

        let report = handle.wait().await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(transport.calls_for(&reporter), 0);
        assert_eq!(transport.calls_for(&far), 0);

        let intents = dispatcher.intents(&alert.id).await.unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].status, DeliveryStatus::Sent);
        assert_eq!(intents[0].attempt, 1);
        assert_eq!(dispatcher.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_replay_never_sends_twice() {
        let recipient = SessionId::generate();
        let transport = Arc::new(ScriptedTransport {
            delay: Duration::from_millis(20),
            ..ScriptedTransport::default()
        });
        let dispatcher = setup(&config(1), transport.clone(), &[(recipient, NYC)]).await;
        let alert = alert(SessionId::generate());

        // Second dispatch while the first is still in flight
        let first = dispatcher
            .dispatch(&alert, CancellationToken::new())
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(&alert, CancellationToken::new())
            .await
            .unwrap();
        assert!(second.intents().is_empty());
        first.wait().await.unwrap();
        second.wait().await.unwrap();

        // And once more after it has been sent
        let third = dispatcher
            .dispatch(&alert, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(third.driven(), 0);
        third.wait().await.unwrap();

        assert_eq!(transport.calls_for(&recipient), 1);
        let sent: Vec<_> = dispatcher
            .intents(&alert.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|i| i.status == DeliveryStatus::Sent)
            .collect();
        assert_eq!(sent.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausts_after_five_failures() {
        let recipient = SessionId::generate();
        let transport = Arc::new(ScriptedTransport::failing(u32::MAX));
        let dispatcher = setup(&config(1), transport.clone(), &[(recipient, NYC)]).await;
        let alert = alert(SessionId::generate());

        let report = dispatcher
            .dispatch(&alert, CancellationToken::new())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.exhausted, 1);
        assert_eq!(report.sent, 0);
        assert_eq!(transport.calls_for(&recipient), 5);

        let exhausted = dispatcher.exhausted().await.unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].attempt, 5);
        assert_eq!(exhausted[0].status, DeliveryStatus::Exhausted);
        assert!(dispatcher.pending_alert_ids().await.unwrap().is_empty());
        assert_eq!(dispatcher.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let recipient = SessionId::generate();
        let transport = Arc::new(ScriptedTransport::failing(2));
        let dispatcher = setup(&config(1), transport.clone(), &[(recipient, NYC)]).await;
        let alert = alert(SessionId::generate());

        let report = dispatcher
            .dispatch(&alert, CancellationToken::new())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.sent, 1);
        let intents = dispatcher.intents(&alert.id).await.unwrap();
        assert_eq!(intents[0].attempt, 3);
        assert!(intents[0].last_error.is_none());
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_not_retried() {
        let recipient = SessionId::generate();
        let transport = Arc::new(ScriptedTransport {
            failures: u32::MAX,
            error: Some(|| PushError::Rejected {
                status: 400,
                body: "unknown device".to_string(),
            }),
            ..ScriptedTransport::default()
        });
        let dispatcher = setup(&config(1), transport.clone(), &[(recipient, NYC)]).await;
        let alert = alert(SessionId::generate());

        let report = dispatcher
            .dispatch(&alert, CancellationToken::new())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.exhausted, 1);
        assert_eq!(transport.calls_for(&recipient), 1);
    }

    #[tokio::test]
    async fn test_cancel_keeps_intents_for_resume() {
        let recipient = SessionId::generate();
        let transport = Arc::new(ScriptedTransport::failing(1));
        // Long backoff so the retry is still sleeping when we cancel
        let dispatcher = setup(&config(60_000), transport.clone(), &[(recipient, NYC)]).await;
        let alert = alert(SessionId::generate());

        let cancel = CancellationToken::new();
        let handle = dispatcher.dispatch(&alert, cancel.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let report = handle.wait().await.unwrap();
        assert_eq!(report.pending, 1);
        let intents = dispatcher.intents(&alert.id).await.unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].status, DeliveryStatus::Failed);
        assert_eq!(intents[0].attempt, 1);
        assert_eq!(dispatcher.pending_alert_ids().await.unwrap(), vec![alert.id]);
        assert_eq!(dispatcher.in_flight().await, 0);

        let report = dispatcher
            .resume(&alert, CancellationToken::new())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(transport.calls_for(&recipient), 2);
        assert!(dispatcher.pending_alert_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch_records_pending_intents() {
        let recipient = SessionId::generate();
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = setup(&config(1), transport.clone(), &[(recipient, NYC)]).await;
        let alert = alert(SessionId::generate());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let handle = dispatcher.dispatch(&alert, cancel).await.unwrap();
        assert_eq!(handle.intents().len(), 1);

        let report = handle.wait().await.unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(transport.total_calls(), 0);
        let intents = dispatcher.intents(&alert.id).await.unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].status, DeliveryStatus::Pending);
        assert_eq!(intents[0].attempt, 0);
        assert_eq!(dispatcher.pending_alert_ids().await.unwrap(), vec![alert.id]);
        assert_eq!(dispatcher.in_flight().await, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let subscribers: Vec<_> = (0..12)
            .map(|i| {
                (
                    SessionId::generate(),
                    GeoPoint::new(40.7128 + f64::from(i) * 0.0001, -74.0060),
                )
            })
            .collect();
        let transport = Arc::new(ScriptedTransport {
            delay: Duration::from_millis(10),
            ..ScriptedTransport::default()
        });
        let mut config = config(1);
        config.max_concurrent_deliveries = 3;
        let dispatcher = setup(&config, transport.clone(), &subscribers).await;

        let report = dispatcher
            .dispatch(&alert(SessionId::generate()), CancellationToken::new())
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();

        assert_eq!(report.sent, 12);
        assert_eq!(transport.total_calls(), 12);
        assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 3);
    }
}
