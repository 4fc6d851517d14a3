// src/trust/mod.rs
pub mod cache;
pub mod engine;
pub mod features;
pub mod isolation;
pub mod policy;
pub mod synthetic;

pub use cache::ModelCache;
pub use engine::{baseline_score, TrustBreakdown, TrustEngine};
pub use features::FeatureExtractor;
pub use isolation::{ForestConfig, IsolationForest, StandardScaler};
pub use policy::{PolicyAction, PolicyDecision, PolicyEngine, TrustThresholds};
pub use synthetic::generate_bootstrap_data;
