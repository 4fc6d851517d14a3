// Persistence collaborator. The trait carries exactly the query shapes the
// trust pipeline needs; `MemoryStore` is the in-process implementation and
// the seam a SQL-backed adapter would fill.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::PlatformError;
use crate::models::{
    BehavioralEvent, FeatureVector, SecurityAlert, Session, SessionId, SessionStatus,
    StoredCredential, User, UserId,
};

#[async_trait]
pub trait Store: Send + Sync {
    // Users and credentials
    async fn insert_user(&self, user: User) -> Result<(), PlatformError>;
    async fn user_by_username(&self, username: &str) -> Result<Option<User>, PlatformError>;
    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, PlatformError>;
    async fn insert_credential(&self, credential: StoredCredential) -> Result<(), PlatformError>;
    async fn credentials_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StoredCredential>, PlatformError>;
    async fn credential_by_external_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<StoredCredential>, PlatformError>;
    async fn update_credential_usage(
        &self,
        credential_id: &str,
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), PlatformError>;

    // Sessions
    async fn insert_session(&self, session: Session) -> Result<(), PlatformError>;
    async fn session(&self, id: SessionId) -> Result<Option<Session>, PlatformError>;
    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), PlatformError>;
    /// Atomically set trust score and status. Never touches `is_active`;
    /// enforcement is a separate, explicit step. Fails on terminal sessions.
    async fn apply_trust(
        &self,
        id: SessionId,
        trust_score: f64,
        status: SessionStatus,
    ) -> Result<Session, PlatformError>;
    /// Atomically deactivate a session with a terminal status.
    async fn deactivate_session(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<Session, PlatformError>;

    // Behavioral events
    async fn insert_events(&self, events: &[BehavioralEvent]) -> Result<usize, PlatformError>;
    /// Events for a session with ingestion time at or after `since`,
    /// in ingestion order.
    async fn events_in_window(
        &self,
        session_id: SessionId,
        since: DateTime<Utc>,
    ) -> Result<Vec<BehavioralEvent>, PlatformError>;
    /// Newest-first slice of a session's events.
    async fn recent_events(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<BehavioralEvent>, PlatformError>;

    // Feature vectors
    async fn insert_feature_vector(&self, features: FeatureVector) -> Result<(), PlatformError>;
    /// Newest-first feature vectors for a user across all of their sessions.
    async fn feature_history_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<FeatureVector>, PlatformError>;
    async fn feature_count_for_user(&self, user_id: UserId) -> Result<usize, PlatformError>;
    /// Every stored feature vector, for global model training.
    async fn all_feature_vectors(&self) -> Result<Vec<FeatureVector>, PlatformError>;

    // Security alerts
    async fn insert_alert(&self, alert: SecurityAlert) -> Result<(), PlatformError>;
    /// Newest-first alerts for a session.
    async fn alerts_for_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<SecurityAlert>, PlatformError>;
}
