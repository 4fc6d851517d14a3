// Trust scoring: a rule-based baseline fused with global and personal
// anomaly-model contributions. Model availability selects the fusion row;
// a missing or failing model degrades the fusion, never the request.

use std::sync::Arc;

use log::{info, warn};

use crate::models::{FeatureVector, UserId};
use crate::trust::cache::ModelCache;

/// Component scores behind one trust evaluation.
#[derive(Debug, Clone)]
pub struct TrustBreakdown {
    pub baseline: f64,
    pub global_trust: Option<f64>,
    pub personal_trust: Option<f64>,
    pub final_score: f64,
}

pub struct TrustEngine {
    models: Arc<ModelCache>,
}

impl TrustEngine {
    pub fn new(models: Arc<ModelCache>) -> Self {
        TrustEngine { models }
    }

    /// Compute the trust score for one feature window.
    pub fn compute(&self, user_id: UserId, features: &FeatureVector) -> TrustBreakdown {
        let array = features.to_array();

        let baseline = baseline_score(features);
        let global_trust = self.models.global().map(|model| model.trust_contribution(&array));
        let personal_trust = self
            .models
            .personal(user_id)
            .map(|model| model.trust_contribution(&array));

        let final_score = fuse(baseline, global_trust, personal_trust).clamp(0.0, 100.0);

        info!(
            "trust computed for session {}: baseline {:.1}, global {:?}, personal {:?}, final {:.1}",
            features.session_id, baseline, global_trust, personal_trust, final_score
        );

        TrustBreakdown { baseline, global_trust, personal_trust, final_score }
    }
}

/// Weighted fusion of the available scores. Personal signal dominates once
/// available because it encodes the individual's own baseline behavior.
fn fuse(baseline: f64, global_trust: Option<f64>, personal_trust: Option<f64>) -> f64 {
    match (global_trust, personal_trust) {
        (None, None) => baseline,
        (Some(global), None) => 0.3 * baseline + 0.7 * global,
        (Some(global), Some(personal)) => 0.2 * baseline + 0.3 * global + 0.5 * personal,
        // The global model is trained at startup, so a personal model
        // without a global one only occurs if the bootstrap failed; give
        // the lone model the single-model weighting.
        (None, Some(personal)) => 0.3 * baseline + 0.7 * personal,
    }
}

/// Rule-based heuristic score. Starts at 100; each triggered rule
/// subtracts a fixed penalty. Rules over absent fields are skipped.
pub fn baseline_score(features: &FeatureVector) -> f64 {
    let mut score: f64 = 100.0;

    // Extremely fast typing (bot-like)
    if let Some(speed) = features.typing_speed {
        if speed > 15.0 {
            score -= 20.0;
            warn!("suspicious typing speed: {:.1} keys/s", speed);
        }
    }

    // Machine-consistent inter-key timing
    if let Some(std) = features.inter_key_std {
        if std < 0.01 {
            score -= 15.0;
            warn!("suspicious timing consistency: {:.4}", std);
        }
    }

    // Excessive mouse speed
    if let Some(speed) = features.avg_mouse_speed {
        if speed > 5000.0 {
            score -= 15.0;
            warn!("suspicious mouse speed: {:.0} px/s", speed);
        }
    }

    // Very low activity (possible session hijacking)
    if features.total_events < 5 {
        score -= 10.0;
        warn!("low activity: {} events", features.total_events);
    }

    // Mouse-only traffic in a busy batch
    if features.keystroke_count == 0 && features.total_events > 20 {
        score -= 10.0;
        warn!("no keystroke activity in a busy window");
    }

    // Hold times outside the human range
    if let Some(hold) = features.avg_key_hold_time {
        if !(0.03..=0.5).contains(&hold) {
            score -= 10.0;
            warn!("unusual key hold time: {:.3} s", hold);
        }
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::trust::isolation::{ForestConfig, IsolationForest};
    use chrono::Utc;
    use uuid::Uuid;

    fn benign_features() -> FeatureVector {
        let now = Utc::now();
        let mut fv = FeatureVector::empty(Uuid::new_v4(), now, now);
        fv.avg_key_hold_time = Some(0.1);
        fv.avg_inter_key_interval = Some(0.15);
        fv.typing_speed = Some(5.0);
        fv.key_hold_std = Some(0.02);
        fv.inter_key_std = Some(0.05);
        fv.avg_mouse_speed = Some(500.0);
        fv.avg_mouse_acceleration = Some(100.0);
        fv.click_rate = Some(0.5);
        fv.mouse_speed_std = Some(100.0);
        fv.total_events = 80;
        fv.keystroke_count = 40;
        fv.mouse_count = 40;
        fv
    }

    #[test]
    fn test_benign_features_keep_full_baseline() {
        assert_eq!(baseline_score(&benign_features()), 100.0);
    }

    #[test]
    fn test_each_rule_subtracts_its_penalty() {
        let mut fv = benign_features();
        fv.typing_speed = Some(16.0);
        assert_eq!(baseline_score(&fv), 80.0);

        let mut fv = benign_features();
        fv.inter_key_std = Some(0.001);
        assert_eq!(baseline_score(&fv), 85.0);

        let mut fv = benign_features();
        fv.avg_mouse_speed = Some(6000.0);
        assert_eq!(baseline_score(&fv), 85.0);

        let mut fv = benign_features();
        fv.total_events = 3;
        assert_eq!(baseline_score(&fv), 90.0);

        let mut fv = benign_features();
        fv.keystroke_count = 0;
        fv.total_events = 25;
        assert_eq!(baseline_score(&fv), 90.0);

        let mut fv = benign_features();
        fv.avg_key_hold_time = Some(0.6);
        assert_eq!(baseline_score(&fv), 90.0);
    }

    #[test]
    fn test_penalties_stack_additively() {
        let mut fv = benign_features();
        fv.typing_speed = Some(20.0); // -20
        fv.inter_key_std = Some(0.001); // -15
        fv.avg_mouse_speed = Some(9000.0); // -15
        fv.avg_key_hold_time = Some(0.01); // -10
        assert_eq!(baseline_score(&fv), 40.0);
    }

    #[test]
    fn test_absent_fields_skip_rules() {
        let now = Utc::now();
        let mut fv = FeatureVector::empty(Uuid::new_v4(), now, now);
        // Mouse-only window: 3 events, no keystrokes, nothing measured for
        // the keystroke rules. Only the low-activity penalty applies.
        fv.avg_mouse_speed = Some(400.0);
        fv.total_events = 3;
        fv.mouse_count = 3;
        assert_eq!(baseline_score(&fv), 90.0);
    }

    #[test]
    fn test_fusion_rows() {
        assert_eq!(fuse(80.0, None, None), 80.0);
        assert!((fuse(80.0, Some(60.0), None) - (0.3 * 80.0 + 0.7 * 60.0)).abs() < 1e-9);
        assert!(
            (fuse(80.0, Some(60.0), Some(90.0))
                - (0.2 * 80.0 + 0.3 * 60.0 + 0.5 * 90.0))
                .abs()
                < 1e-9
        );
    }

    #[test]
    fn test_personal_model_dominates_when_it_disagrees() {
        // Global population where fast typing is an outlier; a user whose
        // own history is exactly that fast typing.
        fn rows(base: [f64; 12]) -> Vec<Vec<f64>> {
            (0..200)
                .map(|i| {
                    let mut row = base.to_vec();
                    // Spread across several features so trees can split on them.
                    row[0] += (i % 7) as f64 * 0.002;
                    row[2] += (i % 9) as f64 * 0.05;
                    row[5] += (i % 11) as f64 * 5.0;
                    row[9] += (i % 13) as f64;
                    row
                })
                .collect()
        }

        let global_data = rows([0.1, 0.15, 5.0, 0.02, 0.05, 500.0, 100.0, 0.5, 100.0, 80.0, 40.0, 40.0]);
        let personal_data = rows([0.05, 0.06, 13.0, 0.02, 0.03, 900.0, 150.0, 0.8, 120.0, 120.0, 80.0, 40.0]);

        let forest_config = ForestConfig { n_trees: 50, ..ForestConfig::default() };
        let global = IsolationForest::fit(&global_data, &forest_config).unwrap();
        let personal = IsolationForest::fit(&personal_data, &forest_config).unwrap();

        let sample = vec![0.055, 0.06, 13.2, 0.02, 0.03, 920.0, 150.0, 0.8, 120.0, 126.0, 80.0, 40.0];
        let g = global.trust_contribution(&sample);
        let p = personal.trust_contribution(&sample);
        assert!(p > g, "personal trust {} should exceed global {}", p, g);

        let baseline = 100.0;
        let with_personal = fuse(baseline, Some(g), Some(p));
        let global_only = fuse(baseline, Some(g), None);
        assert!(
            with_personal > global_only,
            "personal weighting should lift the score: {} vs {}",
            with_personal,
            global_only
        );
    }

    #[test]
    fn test_engine_without_models_returns_baseline() {
        let config = Config::default();
        let models = Arc::new(ModelCache::new(&config));
        let engine = TrustEngine::new(models);

        let breakdown = engine.compute(Uuid::new_v4(), &benign_features());
        assert_eq!(breakdown.final_score, 100.0);
        assert!(breakdown.global_trust.is_none());
        assert!(breakdown.personal_trust.is_none());
    }
}
