// In-memory store backed by locked maps. Suitable for tests, simulation,
// and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::errors::PlatformError;
use crate::models::{
    BehavioralEvent, FeatureVector, SecurityAlert, Session, SessionId, SessionStatus,
    StoredCredential, User, UserId,
};
use crate::storage::Store;

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<UserId, User>>,
    credentials: RwLock<HashMap<String, StoredCredential>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    events: RwLock<HashMap<SessionId, Vec<BehavioralEvent>>>,
    // Feature vectors tagged with the owning user so per-user history
    // queries do not need a join back through sessions.
    features: RwLock<Vec<(UserId, FeatureVector)>>,
    alerts: RwLock<HashMap<SessionId, Vec<SecurityAlert>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn owner_of_session(&self, session_id: SessionId) -> Result<UserId, PlatformError> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|s| s.user_id)
            .ok_or(PlatformError::InvalidSession)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<(), PlatformError> {
        let mut users = self.users.write();
        if users.values().any(|u| u.username == user.username) {
            return Err(PlatformError::UserExists(user.username));
        }
        users.insert(user.id, user);
        Ok(())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<User>, PlatformError> {
        Ok(self
            .users
            .read()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, PlatformError> {
        Ok(self.users.read().get(&id).cloned())
    }

    async fn insert_credential(&self, credential: StoredCredential) -> Result<(), PlatformError> {
        self.credentials
            .write()
            .insert(credential.credential_id.clone(), credential);
        Ok(())
    }

    async fn credentials_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<StoredCredential>, PlatformError> {
        Ok(self
            .credentials
            .read()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn credential_by_external_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<StoredCredential>, PlatformError> {
        Ok(self.credentials.read().get(credential_id).cloned())
    }

    async fn update_credential_usage(
        &self,
        credential_id: &str,
        sign_count: u32,
        used_at: DateTime<Utc>,
    ) -> Result<(), PlatformError> {
        let mut credentials = self.credentials.write();
        let credential = credentials
            .get_mut(credential_id)
            .ok_or_else(|| PlatformError::CredentialNotFound(credential_id.to_string()))?;
        credential.sign_count = sign_count;
        credential.last_used = Some(used_at);
        Ok(())
    }

    async fn insert_session(&self, session: Session) -> Result<(), PlatformError> {
        self.sessions.write().insert(session.id, session);
        Ok(())
    }

    async fn session(&self, id: SessionId) -> Result<Option<Session>, PlatformError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn touch_session(&self, id: SessionId, at: DateTime<Utc>) -> Result<(), PlatformError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&id).ok_or(PlatformError::InvalidSession)?;
        session.last_activity = at;
        Ok(())
    }

    async fn apply_trust(
        &self,
        id: SessionId,
        trust_score: f64,
        status: SessionStatus,
    ) -> Result<Session, PlatformError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&id).ok_or(PlatformError::InvalidSession)?;
        if session.is_terminal() {
            return Err(PlatformError::InvalidSession);
        }
        session.trust_score = trust_score;
        session.status = status;
        Ok(session.clone())
    }

    async fn deactivate_session(
        &self,
        id: SessionId,
        status: SessionStatus,
    ) -> Result<Session, PlatformError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(&id).ok_or(PlatformError::InvalidSession)?;
        session.is_active = false;
        session.status = status;
        Ok(session.clone())
    }

    async fn insert_events(&self, events: &[BehavioralEvent]) -> Result<usize, PlatformError> {
        let mut map = self.events.write();
        for event in events {
            map.entry(event.session_id).or_default().push(event.clone());
        }
        Ok(events.len())
    }

    async fn events_in_window(
        &self,
        session_id: SessionId,
        since: DateTime<Utc>,
    ) -> Result<Vec<BehavioralEvent>, PlatformError> {
        Ok(self
            .events
            .read()
            .get(&session_id)
            .map(|rows| {
                rows.iter()
                    .filter(|e| e.ingested_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn recent_events(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<BehavioralEvent>, PlatformError> {
        Ok(self
            .events
            .read()
            .get(&session_id)
            .map(|rows| rows.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_feature_vector(&self, features: FeatureVector) -> Result<(), PlatformError> {
        let owner = self.owner_of_session(features.session_id)?;
        self.features.write().push((owner, features));
        Ok(())
    }

    async fn feature_history_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<FeatureVector>, PlatformError> {
        Ok(self
            .features
            .read()
            .iter()
            .rev()
            .filter(|(owner, _)| *owner == user_id)
            .take(limit)
            .map(|(_, fv)| fv.clone())
            .collect())
    }

    async fn feature_count_for_user(&self, user_id: UserId) -> Result<usize, PlatformError> {
        Ok(self
            .features
            .read()
            .iter()
            .filter(|(owner, _)| *owner == user_id)
            .count())
    }

    async fn all_feature_vectors(&self) -> Result<Vec<FeatureVector>, PlatformError> {
        Ok(self
            .features
            .read()
            .iter()
            .map(|(_, fv)| fv.clone())
            .collect())
    }

    async fn insert_alert(&self, alert: SecurityAlert) -> Result<(), PlatformError> {
        self.alerts
            .write()
            .entry(alert.session_id)
            .or_default()
            .push(alert);
        Ok(())
    }

    async fn alerts_for_session(
        &self,
        session_id: SessionId,
        limit: usize,
    ) -> Result<Vec<SecurityAlert>, PlatformError> {
        let alerts = self.alerts.read();
        let mut rows: Vec<SecurityAlert> = alerts
            .get(&session_id)
            .map(|rows| rows.clone())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventPayload, KeyAction};
    use chrono::Duration;

    async fn session_for(store: &MemoryStore, user_id: UserId) -> Session {
        let session = Session::new(user_id, Utc::now() + Duration::minutes(60));
        store.insert_session(session.clone()).await.unwrap();
        session
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = MemoryStore::new();
        store.insert_user(User::new("alice", None)).await.unwrap();
        let err = store.insert_user(User::new("alice", None)).await.unwrap_err();
        assert!(matches!(err, PlatformError::UserExists(_)));
    }

    #[tokio::test]
    async fn test_apply_trust_refuses_terminal_session() {
        let store = MemoryStore::new();
        let user = User::new("bob", None);
        store.insert_user(user.clone()).await.unwrap();
        let session = session_for(&store, user.id).await;

        store
            .deactivate_session(session.id, SessionStatus::Terminated)
            .await
            .unwrap();
        let err = store
            .apply_trust(session.id, 50.0, SessionStatus::Monitor)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::InvalidSession));
    }

    #[tokio::test]
    async fn test_apply_trust_does_not_deactivate() {
        let store = MemoryStore::new();
        let user = User::new("carol", None);
        store.insert_user(user.clone()).await.unwrap();
        let session = session_for(&store, user.id).await;

        let updated = store
            .apply_trust(session.id, 10.0, SessionStatus::Critical)
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Critical);
        assert!(updated.is_active);
    }

    #[tokio::test]
    async fn test_feature_history_spans_sessions() {
        let store = MemoryStore::new();
        let user = User::new("dave", None);
        store.insert_user(user.clone()).await.unwrap();
        let s1 = session_for(&store, user.id).await;
        let s2 = session_for(&store, user.id).await;

        let now = Utc::now();
        for session_id in [s1.id, s2.id] {
            let fv = FeatureVector::empty(session_id, now, now);
            store.insert_feature_vector(fv).await.unwrap();
        }

        assert_eq!(store.feature_count_for_user(user.id).await.unwrap(), 2);
        let history = store.feature_history_for_user(user.id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_events_in_window_filters_on_ingestion_time() {
        let store = MemoryStore::new();
        let user = User::new("erin", None);
        store.insert_user(user.clone()).await.unwrap();
        let session = session_for(&store, user.id).await;

        let mut old = BehavioralEvent::new(
            session.id,
            EventPayload::Keystroke { key: "a".into(), action: KeyAction::Down },
            1.0,
        );
        old.ingested_at = Utc::now() - Duration::seconds(60);
        let fresh = BehavioralEvent::new(
            session.id,
            EventPayload::Keystroke { key: "b".into(), action: KeyAction::Down },
            2.0,
        );
        store.insert_events(&[old, fresh]).await.unwrap();

        let window = store
            .events_in_window(session.id, Utc::now() - Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
    }
}
