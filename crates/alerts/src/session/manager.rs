//! Session lifecycle: anonymous, pending verification, verified.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::store::SessionStore;
use super::verification::{digest, generate_code, normalize_phone, VerificationSender};
use crate::clock::Clock;
use crate::config::Config;
use crate::entities::{PendingVerification, Session, SessionId, SessionPhase};
use crate::errors::{AlertError, AlertResult};
use crate::geo::GeoIndex;

/// Salt for phone hashes. Not per-session, so the same number always hashes
/// the same way.
const PHONE_SALT: &str = "vecisafe-phone";

struct SessionSlot {
    /// Blob key in the session store; `None` for sessions that are never
    /// persisted.
    device_key: Option<String>,
    session: Session,
}

/// Owns every live session. Transitions on one session are serialized by
/// that session's mutex; unrelated sessions never wait on each other.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionSlot>>>>,
    store: Arc<dyn SessionStore>,
    sender: Arc<dyn VerificationSender>,
    geo: Arc<GeoIndex>,
    clock: Arc<dyn Clock>,
    code_ttl: Duration,
    max_attempts: u32,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        store: Arc<dyn SessionStore>,
        sender: Arc<dyn VerificationSender>,
        geo: Arc<GeoIndex>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            sender,
            geo,
            clock,
            code_ttl: config.code_ttl(),
            max_attempts: config.max_verification_attempts.max(1),
        }
    }

    /// Fresh anonymous session that lives only in memory.
    pub async fn create_anonymous(&self) -> Session {
        let session = Session::anonymous(self.clock.now());
        self.track(None, session.clone()).await;
        debug!(session_id = %session.session_id, "Anonymous session created");
        session
    }

    /// Load the session stored for a device, creating and storing an
    /// anonymous one on first launch.
    pub async fn restore(&self, device_key: &str) -> AlertResult<Session> {
        let session = if let Some(session) = self.store.get(device_key).await? {
            debug!(session_id = %session.session_id, phase = %session.phase, "Session restored");
            session
        } else {
            let session = Session::anonymous(self.clock.now());
            self.store.set(device_key, &session).await?;
            info!(session_id = %session.session_id, "First launch, anonymous session stored");
            session
        };

        // A live slot is newer than whatever was on disk.
        if let Some(slot) = self.slot(&session.session_id).await {
            return Ok(slot.lock().await.session.clone());
        }

        self.track(Some(device_key.to_string()), session.clone()).await;
        Ok(session)
    }

    /// Current state of a session.
    pub async fn get(&self, session_id: &SessionId) -> AlertResult<Session> {
        let slot = self.require(session_id).await?;
        let session = slot.lock().await.session.clone();
        Ok(session)
    }

    /// Issue a verification code to `phone_number`.
    ///
    /// Allowed while anonymous or already pending (a re-request replaces the
    /// outstanding code and resets the attempt count).
    pub async fn request_verification(
        &self,
        session_id: &SessionId,
        phone_number: &str,
    ) -> AlertResult<()> {
        let phone = normalize_phone(phone_number)?;
        let slot = self.require(session_id).await?;
        let mut slot = slot.lock().await;

        if slot.session.phase == SessionPhase::Verified {
            return Err(AlertError::InvalidTransition {
                session_id: session_id.to_string(),
                phase: slot.session.phase.to_string(),
                action: "request verification for",
            });
        }

        let code = generate_code();
        self.sender
            .send_code(&phone, &code)
            .await
            .map_err(|e| {
                warn!(session_id = %session_id, error = %e, "Verification transport failed");
                AlertError::VerificationUnavailable {
                    reason: e.to_string(),
                }
            })?;

        let mut next = slot.session.clone();
        next.phase = SessionPhase::PendingVerification;
        next.pending = Some(PendingVerification {
            code_hash: digest(&session_id.to_string(), &code),
            phone_number_hash: digest(PHONE_SALT, &phone),
            expires_at: self.clock.now() + self.code_ttl,
            attempts: 0,
        });
        self.commit(&mut slot, next).await?;

        info!(session_id = %session_id, "Verification code requested");
        Ok(())
    }

    /// Check a code against the outstanding one.
    ///
    /// Expired codes fail without touching state. A wrong code counts an
    /// attempt; the attempt that reaches the limit sends the session back
    /// to anonymous.
    pub async fn confirm_verification(
        &self,
        session_id: &SessionId,
        code: &str,
    ) -> AlertResult<Session> {
        let slot = self.require(session_id).await?;
        let mut slot = slot.lock().await;

        let pending = match (&slot.session.phase, &slot.session.pending) {
            (SessionPhase::PendingVerification, Some(pending)) => pending.clone(),
            (phase, _) => {
                return Err(AlertError::InvalidTransition {
                    session_id: session_id.to_string(),
                    phase: phase.to_string(),
                    action: "confirm verification for",
                })
            }
        };

        if self.clock.now() > pending.expires_at {
            return Err(AlertError::CodeExpired {
                session_id: session_id.to_string(),
            });
        }

        let mut next = slot.session.clone();

        if digest(&session_id.to_string(), code.trim()) != pending.code_hash {
            let attempts = pending.attempts + 1;
            if attempts >= self.max_attempts {
                next.reset_to_anonymous();
                self.commit(&mut slot, next).await?;
                warn!(session_id = %session_id, attempts, "Verification attempts exhausted");
                return Err(AlertError::VerificationAttemptsExhausted {
                    session_id: session_id.to_string(),
                });
            }

            if let Some(p) = next.pending.as_mut() {
                p.attempts = attempts;
            }
            self.commit(&mut slot, next).await?;
            return Err(AlertError::CodeMismatch {
                session_id: session_id.to_string(),
                attempts_remaining: self.max_attempts - attempts,
            });
        }

        next.phase = SessionPhase::Verified;
        next.phone_number_hash = Some(pending.phone_number_hash);
        next.pending = None;
        self.commit(&mut slot, next).await?;

        info!(session_id = %session_id, "Session verified");
        Ok(slot.session.clone())
    }

    /// Replace the session with a fresh anonymous one and drop the old id's
    /// subscriber record. Unknown ids still get a fresh session.
    pub async fn sign_out(&self, session_id: &SessionId) -> AlertResult<Session> {
        let removed = self.sessions.write().await.remove(session_id);

        let device_key = match removed {
            Some(slot) => slot.lock().await.device_key.clone(),
            None => None,
        };

        let fresh = Session::anonymous(self.clock.now());
        if let Some(key) = &device_key {
            self.store.set(key, &fresh).await?;
        }
        self.track(device_key, fresh.clone()).await;

        self.geo.remove(session_id).await;
        info!(old_session_id = %session_id, session_id = %fresh.session_id, "Signed out");
        Ok(fresh)
    }

    async fn track(&self, device_key: Option<String>, session: Session) {
        self.sessions.write().await.insert(
            session.session_id,
            Arc::new(Mutex::new(SessionSlot {
                device_key,
                session,
            })),
        );
    }

    async fn slot(&self, session_id: &SessionId) -> Option<Arc<Mutex<SessionSlot>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn require(&self, session_id: &SessionId) -> AlertResult<Arc<Mutex<SessionSlot>>> {
        self.slot(session_id)
            .await
            .ok_or_else(|| AlertError::UnknownSession {
                session_id: session_id.to_string(),
            })
    }

    /// Write through to the store, then swap the in-memory state.
    async fn commit(&self, slot: &mut SessionSlot, next: Session) -> AlertResult<()> {
        if let Some(key) = &slot.device_key {
            self.store.set(key, &next).await?;
        }
        slot.session = next;
        Ok(())
    }
}
