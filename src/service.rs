// AuthPlatform: the transport-agnostic surface of the platform. Wires the
// collaborators together and owns the per-session serialization that keeps
// concurrent batches for one session from racing on the trust score.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use log::info;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::errors::PlatformError;
use crate::models::{
    AlertSeverity, BehavioralEvent, EventKind, EventPayload, SecurityAlert, Session, SessionId,
    SessionStatus, StoredCredential, User,
};
use crate::security::{
    ChallengeStore, CredentialAssertion, CredentialVerifier, RegistrationAttestation,
    SessionService, VerificationMode,
};
use crate::storage::Store;
use crate::trust::{
    FeatureExtractor, ModelCache, PolicyAction, PolicyDecision, PolicyEngine, TrustEngine,
    TrustThresholds,
};

/// One client-submitted event: capture timestamp plus the tagged payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub timestamp: f64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Result of one event batch submission. Scoring fields stay `None` when
/// the feature window was empty and scoring was skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub events_processed: usize,
    pub trust_score: Option<f64>,
    pub status: Option<SessionStatus>,
    pub action: Option<PolicyAction>,
    pub require_stepup: bool,
}

/// Current trust standing of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustReport {
    pub session_id: SessionId,
    pub trust_score: f64,
    pub status: SessionStatus,
    pub action: PolicyAction,
    pub message: String,
    pub require_stepup: bool,
}

/// Successful login: the opaque bearer token plus the session row.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub token: String,
    pub session: Session,
}

/// Newest-first slice of a session's raw events with per-kind counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvents {
    pub session_id: SessionId,
    pub total_events: usize,
    pub keystroke_events: usize,
    pub mouse_events: usize,
    pub events: Vec<BehavioralEvent>,
}

pub struct AuthPlatform {
    config: Config,
    store: Arc<dyn Store>,
    sessions: Arc<SessionService>,
    challenges: ChallengeStore,
    verifier: Arc<dyn CredentialVerifier>,
    models: Arc<ModelCache>,
    engine: TrustEngine,
    policy: PolicyEngine,
    extractor: FeatureExtractor,
    // One async mutex per session so same-session batches serialize while
    // different sessions proceed in parallel.
    session_locks: SyncMutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl AuthPlatform {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        let thresholds = TrustThresholds::from_config(&config);
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            config.session_expiry_minutes,
            thresholds,
        ));
        let models = Arc::new(ModelCache::new(&config));

        AuthPlatform {
            challenges: ChallengeStore::new(config.challenge_ttl_seconds),
            sessions,
            engine: TrustEngine::new(models.clone()),
            policy: PolicyEngine::new(thresholds),
            extractor: FeatureExtractor::new(config.feature_window_seconds),
            models,
            verifier,
            store,
            session_locks: SyncMutex::new(HashMap::new()),
            config,
        }
    }

    /// Bring up the global anomaly model (reload or bootstrap-train).
    pub async fn init(&self) -> anyhow::Result<()> {
        self.models
            .init_global(self.store.as_ref(), Path::new(&self.config.model_path))
            .await
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Begin registration: issue and store a challenge for the username.
    pub async fn register_begin(&self, username: &str) -> Result<Vec<u8>, PlatformError> {
        if self.store.user_by_username(username).await?.is_some() {
            return Err(PlatformError::UserExists(username.to_string()));
        }

        let challenge = self.verifier.generate_challenge();
        self.challenges
            .put(&ChallengeStore::registration_key(username), challenge.clone());

        info!("registration started for user {}", username);
        Ok(challenge)
    }

    /// Complete registration: verify the attestation, persist the user and
    /// their credential, and consume the challenge.
    pub async fn register_complete(
        &self,
        username: &str,
        attestation: &RegistrationAttestation,
    ) -> Result<User, PlatformError> {
        let key = ChallengeStore::registration_key(username);
        let challenge = self
            .challenges
            .get(&key)
            .ok_or_else(|| PlatformError::ChallengeNotFound(key.clone()))?;

        self.verifier.verify_registration(&challenge, attestation).await?;

        let user = User::new(username, Some(username));
        self.store.insert_user(user.clone()).await?;
        self.store
            .insert_credential(StoredCredential {
                id: uuid::Uuid::new_v4(),
                user_id: user.id,
                credential_id: attestation.credential_id.clone(),
                public_key: attestation.public_key.clone(),
                sign_count: 0,
                created_at: Utc::now(),
                last_used: None,
            })
            .await?;

        self.challenges.remove(&key);
        info!("registration completed for user {}", username);
        Ok(user)
    }

    // ------------------------------------------------------------------
    // Login / logout
    // ------------------------------------------------------------------

    /// Begin login: issue a challenge and list the user's credential ids.
    pub async fn login_begin(
        &self,
        username: &str,
    ) -> Result<(Vec<u8>, Vec<String>), PlatformError> {
        let user = self
            .store
            .user_by_username(username)
            .await?
            .ok_or_else(|| PlatformError::UserNotFound(username.to_string()))?;

        let credentials = self.store.credentials_for_user(user.id).await?;
        if credentials.is_empty() {
            return Err(PlatformError::CredentialNotFound(username.to_string()));
        }

        let challenge = self.verifier.generate_challenge();
        self.challenges
            .put(&ChallengeStore::login_key(username), challenge.clone());

        info!("authentication started for user {}", username);
        Ok((
            challenge,
            credentials.into_iter().map(|c| c.credential_id).collect(),
        ))
    }

    /// Complete login: verify the assertion and open a fully trusted
    /// session.
    pub async fn login_complete(
        &self,
        username: &str,
        assertion: &CredentialAssertion,
    ) -> Result<LoginOutcome, PlatformError> {
        let key = ChallengeStore::login_key(username);
        let challenge = self
            .challenges
            .get(&key)
            .ok_or_else(|| PlatformError::ChallengeNotFound(key.clone()))?;

        let user = self
            .store
            .user_by_username(username)
            .await?
            .ok_or_else(|| PlatformError::UserNotFound(username.to_string()))?;

        let credential = self
            .store
            .credential_by_external_id(&assertion.credential_id)
            .await?
            .ok_or_else(|| PlatformError::CredentialNotFound(assertion.credential_id.clone()))?;
        if credential.user_id != user.id {
            return Err(PlatformError::VerificationFailed(
                "credential does not belong to this user".to_string(),
            ));
        }

        let verified = self
            .verifier
            .verify_assertion(&challenge, &credential, assertion, VerificationMode::Standard)
            .await?;

        self.store
            .update_credential_usage(&verified.credential_id, verified.new_sign_count, Utc::now())
            .await?;
        self.challenges.remove(&key);

        let (session, token) = self.sessions.create_session(user.id).await?;
        info!("authentication completed for user {}", username);
        Ok(LoginOutcome { token, session })
    }

    /// Revoke the caller's session.
    pub async fn logout(&self, token: &str) -> Result<(), PlatformError> {
        let session = self.sessions.validate_token(token).await?;
        self.sessions.revoke(session.id).await?;
        Ok(())
    }

    /// Current session row for the caller.
    pub async fn session_info(&self, token: &str) -> Result<Session, PlatformError> {
        self.sessions.validate_token(token).await
    }

    // ------------------------------------------------------------------
    // Behavioral pipeline
    // ------------------------------------------------------------------

    /// Ingest a batch of behavioral events, then run the trust pipeline
    /// over the current feature window: extract, score, update the session
    /// and enforce the policy decision. Batches for the same session are
    /// serialized; events are durably stored before extraction runs.
    pub async fn submit_event_batch(
        &self,
        token: &str,
        session_id: SessionId,
        events: Vec<IncomingEvent>,
    ) -> Result<BatchOutcome, PlatformError> {
        let session = self.sessions.validate_token(token).await?;
        if session.id != session_id {
            return Err(PlatformError::SessionMismatch);
        }

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let rows: Vec<BehavioralEvent> = events
            .into_iter()
            .map(|e| BehavioralEvent::new(session_id, e.payload, e.timestamp))
            .collect();
        let stored = self.store.insert_events(&rows).await?;
        info!("stored {} events for session {}", stored, session_id);

        let window_end = Utc::now();
        let window_start = window_end - self.extractor.window();
        let window_events = self.store.events_in_window(session_id, window_start).await?;

        let features = match self
            .extractor
            .extract(session_id, &window_events, window_start, window_end)
        {
            Some(features) => features,
            // Empty window: the batch is accepted, scoring is skipped.
            None => {
                return Ok(BatchOutcome {
                    events_processed: stored,
                    trust_score: None,
                    status: None,
                    action: None,
                    require_stepup: false,
                })
            }
        };

        self.store.insert_feature_vector(features.clone()).await?;
        self.models
            .maybe_train_personal(self.store.as_ref(), session.user_id)
            .await?;

        let breakdown = self.engine.compute(session.user_id, &features);
        let updated = self
            .sessions
            .apply_trust_score(session_id, breakdown.final_score)
            .await?;

        let decision = self.policy.evaluate(updated.trust_score, updated.status);
        let finalized = self.enforce(&updated, &decision).await?;

        Ok(BatchOutcome {
            events_processed: stored,
            trust_score: Some(finalized.trust_score),
            status: Some(finalized.status),
            action: Some(decision.action),
            require_stepup: decision.require_stepup,
        })
    }

    /// Read the current trust standing. Pure with respect to trust state:
    /// repeated calls without an intervening batch return identical
    /// results.
    pub async fn get_trust_score(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> Result<TrustReport, PlatformError> {
        let session = self.sessions.validate_token(token).await?;
        if session.id != session_id {
            return Err(PlatformError::SessionMismatch);
        }

        let decision = self.policy.evaluate(session.trust_score, session.status);
        Ok(TrustReport {
            session_id: session.id,
            trust_score: session.trust_score,
            status: session.status,
            action: decision.action,
            message: decision.message,
            require_stepup: decision.require_stepup,
        })
    }

    /// Newest-first raw events for audit/inspection.
    pub async fn session_events(
        &self,
        token: &str,
        session_id: SessionId,
        limit: usize,
    ) -> Result<SessionEvents, PlatformError> {
        let session = self.sessions.validate_token(token).await?;
        if session.id != session_id {
            return Err(PlatformError::SessionMismatch);
        }

        let events = self.store.recent_events(session_id, limit).await?;
        let keystroke_events = events.iter().filter(|e| e.kind() == EventKind::Keystroke).count();
        let mouse_events = events.iter().filter(|e| e.kind() == EventKind::Mouse).count();

        Ok(SessionEvents {
            session_id,
            total_events: events.len(),
            keystroke_events,
            mouse_events,
            events,
        })
    }

    /// Newest-first security alerts for a session.
    pub async fn get_alerts(
        &self,
        token: &str,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<SecurityAlert>, PlatformError> {
        let session = self.sessions.validate_token(token).await?;
        if session.id != session_id {
            return Err(PlatformError::SessionMismatch);
        }
        self.store.alerts_for_session(session_id, limit).await
    }

    // ------------------------------------------------------------------
    // Step-up re-authentication
    // ------------------------------------------------------------------

    /// Begin step-up: issue and store a fresh challenge keyed by the
    /// session. Allowed while the session is SUSPICIOUS; any active
    /// session may proactively step up.
    pub async fn begin_step_up(
        &self,
        token: &str,
        session_id: SessionId,
    ) -> Result<Vec<u8>, PlatformError> {
        let session = self.sessions.validate_token(token).await?;
        if session.id != session_id {
            return Err(PlatformError::SessionMismatch);
        }

        let challenge = self.verifier.generate_challenge();
        self.challenges
            .put(&ChallengeStore::stepup_key(session_id), challenge.clone());

        info!("step-up started for session {}", session_id);
        Ok(challenge)
    }

    /// Complete step-up under strict verification. Success consumes the
    /// challenge and restores full trust; verification failure leaves both
    /// the challenge and the trust score untouched.
    pub async fn complete_step_up(
        &self,
        token: &str,
        session_id: SessionId,
        assertion: &CredentialAssertion,
    ) -> Result<Session, PlatformError> {
        let session = self.sessions.validate_token(token).await?;
        if session.id != session_id {
            return Err(PlatformError::SessionMismatch);
        }

        let key = ChallengeStore::stepup_key(session_id);
        let challenge = self
            .challenges
            .get(&key)
            .ok_or_else(|| PlatformError::ChallengeNotFound(key.clone()))?;

        let credential = self
            .store
            .credential_by_external_id(&assertion.credential_id)
            .await?
            .ok_or_else(|| PlatformError::CredentialNotFound(assertion.credential_id.clone()))?;
        if credential.user_id != session.user_id {
            return Err(PlatformError::VerificationFailed(
                "credential does not belong to this session".to_string(),
            ));
        }

        let verified = self
            .verifier
            .verify_assertion(&challenge, &credential, assertion, VerificationMode::Strict)
            .await?;

        self.challenges.remove(&key);
        self.store
            .update_credential_usage(&verified.credential_id, verified.new_sign_count, Utc::now())
            .await?;

        let restored = self.sessions.reset_trust(session_id).await?;
        self.store
            .insert_alert(SecurityAlert::new(
                session_id,
                "STEPUP_SUCCESS",
                "Step-up authentication successful",
                AlertSeverity::Info,
                restored.trust_score,
            ))
            .await?;

        info!("step-up completed for session {}", session_id);
        Ok(restored)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn session_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        self.session_locks
            .lock()
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply the policy decision's side effects. Termination is the only
    /// place the pipeline deactivates a session.
    async fn enforce(
        &self,
        session: &Session,
        decision: &PolicyDecision,
    ) -> Result<Session, PlatformError> {
        match decision.action {
            PolicyAction::Terminate => {
                let revoked = self.sessions.revoke(session.id).await?;
                self.store
                    .insert_alert(SecurityAlert::new(
                        session.id,
                        "SESSION_TERMINATED",
                        &decision.message,
                        AlertSeverity::Danger,
                        decision.trust_score,
                    ))
                    .await?;
                Ok(revoked)
            }
            PolicyAction::Stepup => {
                self.store
                    .insert_alert(SecurityAlert::new(
                        session.id,
                        "STEPUP_REQUIRED",
                        &decision.message,
                        AlertSeverity::Warning,
                        decision.trust_score,
                    ))
                    .await?;
                Ok(session.clone())
            }
            PolicyAction::Monitor => {
                self.store
                    .insert_alert(SecurityAlert::new(
                        session.id,
                        "TRUST_MONITOR",
                        &decision.message,
                        AlertSeverity::Info,
                        decision.trust_score,
                    ))
                    .await?;
                Ok(session.clone())
            }
            PolicyAction::Continue => Ok(session.clone()),
        }
    }
}
