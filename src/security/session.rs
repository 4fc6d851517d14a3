// Session lifecycle and trust state machine. Bearer tokens are opaque
// random strings; nothing in the core parses them. Scoring updates map a
// trust score onto a status but never deactivate a session; termination is
// always an explicit, separate step.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration, Utc};
use log::info;
use parking_lot::RwLock;
use rand::{thread_rng, Rng};

use crate::errors::PlatformError;
use crate::models::{Session, SessionId, SessionStatus, UserId};
use crate::storage::Store;
use crate::trust::policy::TrustThresholds;

/// What the identity collaborator hands back for a bearer token.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub is_active: bool,
}

/// Resolves a bearer token to a session identity, or fails with
/// `InvalidSession`. The token format is the provider's business.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> Result<SessionIdentity, PlatformError>;
}

pub struct SessionService {
    store: Arc<dyn Store>,
    tokens: RwLock<HashMap<String, SessionId>>,
    expiry: Duration,
    thresholds: TrustThresholds,
}

impl SessionService {
    pub fn new(store: Arc<dyn Store>, expiry_minutes: i64, thresholds: TrustThresholds) -> Self {
        SessionService {
            store,
            tokens: RwLock::new(HashMap::new()),
            expiry: Duration::minutes(expiry_minutes),
            thresholds,
        }
    }

    fn generate_token() -> String {
        let mut bytes = [0u8; 32];
        thread_rng().fill(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Create a session for a freshly authenticated user. Starts fully
    /// trusted.
    pub async fn create_session(&self, user_id: UserId) -> Result<(Session, String), PlatformError> {
        let session = Session::new(user_id, Utc::now() + self.expiry);
        self.store.insert_session(session.clone()).await?;

        let token = Self::generate_token();
        self.tokens.write().insert(token.clone(), session.id);

        info!("session created for user {}: {}", user_id, session.id);
        Ok((session, token))
    }

    /// Resolve and check a bearer token. Expired sessions flip to EXPIRED
    /// (inactive) here; there is no timer, expiry is enforced on use.
    pub async fn validate_token(&self, token: &str) -> Result<Session, PlatformError> {
        let session_id = self
            .tokens
            .read()
            .get(token)
            .copied()
            .ok_or(PlatformError::InvalidSession)?;

        let session = self
            .store
            .session(session_id)
            .await?
            .ok_or(PlatformError::InvalidSession)?;

        if !session.is_active {
            self.tokens.write().remove(token);
            return Err(PlatformError::InvalidSession);
        }

        if session.expires_at < Utc::now() {
            self.store
                .deactivate_session(session_id, SessionStatus::Expired)
                .await?;
            self.tokens.write().remove(token);
            info!("session {} expired", session_id);
            return Err(PlatformError::InvalidSession);
        }

        let now = Utc::now();
        self.store.touch_session(session_id, now).await?;

        let mut session = session;
        session.last_activity = now;
        Ok(session)
    }

    /// Explicitly terminate a session (logout or policy revoke).
    pub async fn revoke(&self, session_id: SessionId) -> Result<Session, PlatformError> {
        let session = self
            .store
            .deactivate_session(session_id, SessionStatus::Terminated)
            .await?;
        self.tokens.write().retain(|_, id| *id != session_id);
        info!("session revoked: {}", session_id);
        Ok(session)
    }

    /// Apply a freshly computed trust score. The status follows the score
    /// bands; `is_active` is deliberately left untouched so a CRITICAL
    /// session can be observed before the policy engine terminates it.
    pub async fn apply_trust_score(
        &self,
        session_id: SessionId,
        trust_score: f64,
    ) -> Result<Session, PlatformError> {
        let status = self.thresholds.status_for(trust_score);
        let session = self.store.apply_trust(session_id, trust_score, status).await?;
        info!(
            "trust updated for session {}: {:.1} ({})",
            session_id, trust_score, status
        );
        Ok(session)
    }

    /// Successful step-up restores full trust.
    pub async fn reset_trust(&self, session_id: SessionId) -> Result<Session, PlatformError> {
        self.apply_trust_score(session_id, 100.0).await
    }

    pub async fn session(&self, session_id: SessionId) -> Result<Option<Session>, PlatformError> {
        self.store.session(session_id).await
    }
}

#[async_trait]
impl IdentityProvider for SessionService {
    async fn resolve(&self, bearer_token: &str) -> Result<SessionIdentity, PlatformError> {
        let session = self.validate_token(bearer_token).await?;
        Ok(SessionIdentity {
            session_id: session.id,
            user_id: session.user_id,
            is_active: session.is_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::storage::MemoryStore;

    async fn service() -> (SessionService, UserId) {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("alice", None);
        store.insert_user(user.clone()).await.unwrap();
        (
            SessionService::new(store, 60, TrustThresholds::default()),
            user.id,
        )
    }

    #[tokio::test]
    async fn test_create_and_validate_round_trip() {
        let (service, user_id) = service().await;
        let (session, token) = service.create_session(user_id).await.unwrap();

        let resolved = service.validate_token(&token).await.unwrap();
        assert_eq!(resolved.id, session.id);
        assert_eq!(resolved.status, SessionStatus::Ok);
        assert_eq!(resolved.trust_score, 100.0);
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (service, _) = service().await;
        let err = service.validate_token("not-a-token").await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidSession));
    }

    #[tokio::test]
    async fn test_expired_session_flips_to_expired() {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("bob", None);
        store.insert_user(user.clone()).await.unwrap();

        // Negative expiry: the session is already past its deadline.
        let service = SessionService::new(store.clone(), -1, TrustThresholds::default());
        let (session, token) = service.create_session(user.id).await.unwrap();

        let err = service.validate_token(&token).await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidSession));

        let row = store.session(session.id).await.unwrap().unwrap();
        assert_eq!(row.status, SessionStatus::Expired);
        assert!(!row.is_active);
    }

    #[tokio::test]
    async fn test_revoked_token_no_longer_resolves() {
        let (service, user_id) = service().await;
        let (session, token) = service.create_session(user_id).await.unwrap();

        let revoked = service.revoke(session.id).await.unwrap();
        assert_eq!(revoked.status, SessionStatus::Terminated);
        assert!(!revoked.is_active);

        assert!(service.validate_token(&token).await.is_err());
    }

    #[tokio::test]
    async fn test_trust_update_never_deactivates() {
        let (service, user_id) = service().await;
        let (session, _) = service.create_session(user_id).await.unwrap();

        let updated = service.apply_trust_score(session.id, 10.0).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Critical);
        assert!(updated.is_active, "scoring must not terminate the session");

        let updated = service.apply_trust_score(session.id, 55.0).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Monitor);

        let updated = service.apply_trust_score(session.id, 30.0).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Suspicious);
    }

    #[tokio::test]
    async fn test_reset_trust_restores_ok() {
        let (service, user_id) = service().await;
        let (session, _) = service.create_session(user_id).await.unwrap();

        service.apply_trust_score(session.id, 25.0).await.unwrap();
        let restored = service.reset_trust(session.id).await.unwrap();
        assert_eq!(restored.trust_score, 100.0);
        assert_eq!(restored.status, SessionStatus::Ok);
    }
}
