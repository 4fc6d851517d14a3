// Shared domain models for the continuous authentication platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Define core types
pub type UserId = Uuid;
pub type SessionId = Uuid;
pub type EventId = Uuid;

/// Kind of behavioral telemetry an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Keystroke,
    Mouse,
}

/// Keystroke action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Down,
    Up,
}

/// Mouse action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseAction {
    Move,
    Click,
}

/// Event payload, tagged by telemetry kind. Malformed payloads fail
/// deserialization at ingestion and never reach scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventPayload {
    Keystroke { key: String, action: KeyAction },
    Mouse { action: MouseAction, x: f64, y: f64 },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Keystroke { .. } => EventKind::Keystroke,
            EventPayload::Mouse { .. } => EventKind::Mouse,
        }
    }
}

/// One raw behavioral event as submitted by the client. Immutable once
/// stored; retained for audit and feature recomputation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralEvent {
    pub id: EventId,
    pub session_id: SessionId,
    pub payload: EventPayload,
    /// Client-side capture time, float seconds.
    pub timestamp: f64,
    pub ingested_at: DateTime<Utc>,
}

impl BehavioralEvent {
    pub fn new(session_id: SessionId, payload: EventPayload, timestamp: f64) -> Self {
        BehavioralEvent {
            id: Uuid::new_v4(),
            session_id,
            payload,
            timestamp,
            ingested_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Number of dimensions in the flattened feature array.
pub const FEATURE_DIM: usize = 12;

/// Statistical snapshot of one feature window. Fields that could not be
/// computed from the window stay `None`; they are only coerced to zero in
/// the flattened array handed to the anomaly scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureVector {
    pub id: Uuid,
    pub session_id: SessionId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    // Keystroke features
    pub avg_key_hold_time: Option<f64>,
    pub avg_inter_key_interval: Option<f64>,
    /// Keys per second.
    pub typing_speed: Option<f64>,
    pub key_hold_std: Option<f64>,
    pub inter_key_std: Option<f64>,

    // Mouse features
    pub avg_mouse_speed: Option<f64>,
    pub avg_mouse_acceleration: Option<f64>,
    /// Clicks per second.
    pub click_rate: Option<f64>,
    pub mouse_speed_std: Option<f64>,

    // Combined counters
    pub total_events: u32,
    pub keystroke_count: u32,
    pub mouse_count: u32,

    pub created_at: DateTime<Utc>,
}

impl FeatureVector {
    pub fn empty(session_id: SessionId, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        FeatureVector {
            id: Uuid::new_v4(),
            session_id,
            window_start,
            window_end,
            avg_key_hold_time: None,
            avg_inter_key_interval: None,
            typing_speed: None,
            key_hold_std: None,
            inter_key_std: None,
            avg_mouse_speed: None,
            avg_mouse_acceleration: None,
            click_rate: None,
            mouse_speed_std: None,
            total_events: 0,
            keystroke_count: 0,
            mouse_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Flatten into the numeric array the anomaly scorer consumes.
    /// Absent fields become 0.0 here; this is a documented lossy contract
    /// and the scorer is trained against arrays built the same way.
    pub fn to_array(&self) -> [f64; FEATURE_DIM] {
        [
            self.avg_key_hold_time.unwrap_or(0.0),
            self.avg_inter_key_interval.unwrap_or(0.0),
            self.typing_speed.unwrap_or(0.0),
            self.key_hold_std.unwrap_or(0.0),
            self.inter_key_std.unwrap_or(0.0),
            self.avg_mouse_speed.unwrap_or(0.0),
            self.avg_mouse_acceleration.unwrap_or(0.0),
            self.click_rate.unwrap_or(0.0),
            self.mouse_speed_std.unwrap_or(0.0),
            self.total_events as f64,
            self.keystroke_count as f64,
            self.mouse_count as f64,
        ]
    }
}

/// Session trust state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Ok,
    Monitor,
    Suspicious,
    Critical,
    Terminated,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Ok => "OK",
            SessionStatus::Monitor => "MONITOR",
            SessionStatus::Suspicious => "SUSPICIOUS",
            SessionStatus::Critical => "CRITICAL",
            SessionStatus::Terminated => "TERMINATED",
            SessionStatus::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// An authenticated session. `trust_score` and `status` are mutated by the
/// trust engine; `is_active` flips to false only on explicit termination
/// (logout, expiry, policy revoke), never as a side effect of scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub trust_score: f64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl Session {
    pub fn new(user_id: UserId, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id,
            trust_score: 100.0,
            status: SessionStatus::Ok,
            created_at: now,
            last_activity: now,
            expires_at,
            is_active: true,
        }
    }

    /// Terminal sessions accept no further trust mutation.
    pub fn is_terminal(&self) -> bool {
        !self.is_active
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Danger,
}

/// Append-only audit record emitted by the policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub session_id: SessionId,
    pub alert_type: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub trust_score: f64,
    pub created_at: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(
        session_id: SessionId,
        alert_type: &str,
        message: &str,
        severity: AlertSeverity,
        trust_score: f64,
    ) -> Self {
        SecurityAlert {
            id: Uuid::new_v4(),
            session_id,
            alert_type: alert_type.to_string(),
            message: message.to_string(),
            severity,
            trust_score,
            created_at: Utc::now(),
        }
    }
}

/// Registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

impl User {
    pub fn new(username: &str, display_name: Option<&str>) -> Self {
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            display_name: display_name.map(ToString::to_string),
            created_at: Utc::now(),
            is_active: true,
        }
    }
}

/// Enrolled credential. The key material is opaque to the core; only the
/// credential-verification collaborator interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCredential {
    pub id: Uuid,
    pub user_id: UserId,
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_tagging_round_trip() {
        let json = r#"{"type":"keystroke","key":"a","action":"down"}"#;
        let payload: EventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kind(), EventKind::Keystroke);

        let json = r#"{"type":"mouse","action":"move","x":10.0,"y":20.0}"#;
        let payload: EventPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kind(), EventKind::Mouse);
    }

    #[test]
    fn test_malformed_payload_rejected() {
        // Missing required field for the tag
        let json = r#"{"type":"keystroke","action":"down"}"#;
        assert!(serde_json::from_str::<EventPayload>(json).is_err());

        // Unknown tag
        let json = r#"{"type":"touch","x":1.0,"y":2.0}"#;
        assert!(serde_json::from_str::<EventPayload>(json).is_err());
    }

    #[test]
    fn test_feature_array_absent_becomes_zero() {
        let now = Utc::now();
        let mut fv = FeatureVector::empty(Uuid::new_v4(), now, now);
        fv.typing_speed = Some(5.0);
        fv.total_events = 3;
        fv.mouse_count = 3;

        let arr = fv.to_array();
        assert_eq!(arr[0], 0.0); // avg_key_hold_time absent
        assert_eq!(arr[2], 5.0);
        assert_eq!(arr[9], 3.0);
        assert_eq!(arr[11], 3.0);
    }
}
