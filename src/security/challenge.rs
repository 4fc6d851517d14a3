// TTL-bounded cache for short-lived authentication challenges. Keys are
// namespaced by purpose so registration, login and step-up flows cannot
// collide on the same principal.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::models::SessionId;

#[derive(Debug, Clone)]
struct StoredChallenge {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Keyed challenge cache with purge-on-access expiry. All access goes
/// through the internal lock; an expired entry observed by a read is
/// removed and reported as a miss in the same critical section, so a
/// concurrent reader can never resurrect it.
pub struct ChallengeStore {
    entries: Mutex<HashMap<String, StoredChallenge>>,
    default_ttl: Duration,
}

impl ChallengeStore {
    pub fn new(ttl_seconds: u64) -> Self {
        ChallengeStore {
            entries: Mutex::new(HashMap::new()),
            default_ttl: Duration::seconds(ttl_seconds as i64),
        }
    }

    pub fn registration_key(username: &str) -> String {
        format!("reg:{}", username)
    }

    pub fn login_key(username: &str) -> String {
        format!("auth:{}", username)
    }

    pub fn stepup_key(session_id: SessionId) -> String {
        format!("stepup:{}", session_id)
    }

    /// Store a challenge under `key` with the default TTL, replacing any
    /// previous challenge for the same key.
    pub fn put(&self, key: &str, value: Vec<u8>) {
        self.put_with_expiry(key, value, Utc::now() + self.default_ttl);
    }

    fn put_with_expiry(&self, key: &str, value: Vec<u8>, expires_at: DateTime<Utc>) {
        self.entries
            .lock()
            .insert(key.to_string(), StoredChallenge { value, expires_at });
    }

    /// Fetch a live challenge. Expired entries are deleted and reported as
    /// a miss atomically.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Utc::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Remove a challenge (successful verification consumes it).
    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }

    /// Drop every expired entry. Purge-on-access already keeps reads
    /// correct; this bounds memory for keys nobody reads again.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
