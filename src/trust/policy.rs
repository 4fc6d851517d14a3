// Adaptive policy evaluation. Pure functions of the trust score; the
// platform applies the decided action (alerts, revocation) separately so a
// CRITICAL session can be observed before it is cut off.

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::SessionStatus;

/// The three trust bands, strictly ordered OK > MONITOR > STEPUP.
#[derive(Debug, Clone, Copy)]
pub struct TrustThresholds {
    pub ok: u8,
    pub monitor: u8,
    pub stepup: u8,
}

impl TrustThresholds {
    pub fn from_config(config: &Config) -> Self {
        TrustThresholds {
            ok: config.trust_threshold_ok,
            monitor: config.trust_threshold_monitor,
            stepup: config.trust_threshold_stepup,
        }
    }

    /// Map a trust score onto a session status. Boundary values belong to
    /// the higher band.
    pub fn status_for(&self, trust_score: f64) -> SessionStatus {
        if trust_score >= self.ok as f64 {
            SessionStatus::Ok
        } else if trust_score >= self.monitor as f64 {
            SessionStatus::Monitor
        } else if trust_score >= self.stepup as f64 {
            SessionStatus::Suspicious
        } else {
            SessionStatus::Critical
        }
    }
}

impl Default for TrustThresholds {
    fn default() -> Self {
        TrustThresholds { ok: 70, monitor: 40, stepup: 20 }
    }
}

/// Policy action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Continue,
    Monitor,
    Stepup,
    Terminate,
}

impl std::fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PolicyAction::Continue => "continue",
            PolicyAction::Monitor => "monitor",
            PolicyAction::Stepup => "stepup",
            PolicyAction::Terminate => "terminate",
        };
        f.write_str(s)
    }
}

/// Outcome of one policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub action: PolicyAction,
    pub message: String,
    pub require_stepup: bool,
    pub trust_score: f64,
}

pub struct PolicyEngine {
    thresholds: TrustThresholds,
}

impl PolicyEngine {
    pub fn new(thresholds: TrustThresholds) -> Self {
        PolicyEngine { thresholds }
    }

    /// Evaluate the adaptive policy for a trust score. Total over all
    /// scores; exactly one action per call. The current status is part of
    /// the contract but does not influence the band chosen.
    pub fn evaluate(&self, trust_score: f64, _current_status: SessionStatus) -> PolicyDecision {
        let (action, message, require_stepup) = if trust_score >= self.thresholds.ok as f64 {
            (PolicyAction::Continue, "Trust level: OK", false)
        } else if trust_score >= self.thresholds.monitor as f64 {
            (PolicyAction::Monitor, "Trust level: Monitoring for anomalies", false)
        } else if trust_score >= self.thresholds.stepup as f64 {
            (PolicyAction::Stepup, "Trust level: Step-up authentication required", true)
        } else {
            (PolicyAction::Terminate, "Trust level: Critical - Session terminated", false)
        };

        PolicyDecision {
            action,
            message: message.to_string(),
            require_stepup,
            trust_score,
        }
    }

    pub fn should_terminate(&self, trust_score: f64) -> bool {
        trust_score < self.thresholds.stepup as f64
    }

    pub fn should_require_stepup(&self, trust_score: f64) -> bool {
        trust_score >= self.thresholds.stepup as f64
            && trust_score < self.thresholds.monitor as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PolicyEngine {
        PolicyEngine::new(TrustThresholds::default())
    }

    #[test]
    fn test_policy_is_total_with_no_gaps() {
        let engine = engine();
        for score in 0..=100 {
            let decision = engine.evaluate(score as f64, SessionStatus::Ok);
            let expected = match score {
                s if s >= 70 => PolicyAction::Continue,
                s if s >= 40 => PolicyAction::Monitor,
                s if s >= 20 => PolicyAction::Stepup,
                _ => PolicyAction::Terminate,
            };
            assert_eq!(decision.action, expected, "score {}", score);
        }
    }

    #[test]
    fn test_boundary_values_belong_to_higher_band() {
        let engine = engine();
        assert_eq!(engine.evaluate(70.0, SessionStatus::Ok).action, PolicyAction::Continue);
        assert_eq!(engine.evaluate(40.0, SessionStatus::Ok).action, PolicyAction::Monitor);
        assert_eq!(engine.evaluate(20.0, SessionStatus::Ok).action, PolicyAction::Stepup);
        assert_eq!(engine.evaluate(19.999, SessionStatus::Ok).action, PolicyAction::Terminate);
    }

    #[test]
    fn test_stepup_band_sets_flag() {
        let engine = engine();
        let decision = engine.evaluate(25.0, SessionStatus::Monitor);
        assert_eq!(decision.action, PolicyAction::Stepup);
        assert!(decision.require_stepup);

        let decision = engine.evaluate(45.0, SessionStatus::Monitor);
        assert!(!decision.require_stepup);
    }

    #[test]
    fn test_status_mapping_matches_policy_bands() {
        let thresholds = TrustThresholds::default();
        assert_eq!(thresholds.status_for(85.0), SessionStatus::Ok);
        assert_eq!(thresholds.status_for(70.0), SessionStatus::Ok);
        assert_eq!(thresholds.status_for(69.9), SessionStatus::Monitor);
        assert_eq!(thresholds.status_for(40.0), SessionStatus::Monitor);
        assert_eq!(thresholds.status_for(39.9), SessionStatus::Suspicious);
        assert_eq!(thresholds.status_for(20.0), SessionStatus::Suspicious);
        assert_eq!(thresholds.status_for(10.0), SessionStatus::Critical);
    }

    #[test]
    fn test_termination_predicate() {
        let engine = engine();
        assert!(engine.should_terminate(19.0));
        assert!(!engine.should_terminate(20.0));
        assert!(engine.should_require_stepup(20.0));
        assert!(!engine.should_require_stepup(40.0));
    }
}
