// Isolation ensemble anomaly scorer. An ensemble of randomized binary
// partition trees over standardized features; samples that isolate in few
// splits score as anomalous. Training is seeded and deterministic.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

/// Euler-Mascheroni constant, for the unsuccessful-search path correction.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Training knobs for one ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of trees in the ensemble.
    pub n_trees: usize,
    /// Subsample size per tree.
    pub sample_size: usize,
    /// Expected proportion of outliers in the training data; anchors the
    /// score normalization.
    pub contamination: f64,
    /// Base RNG seed; per-tree seeds derive from it.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            n_trees: 100,
            sample_size: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

/// Per-feature zero-mean unit-variance transform fitted on training data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(data: &[Vec<f64>]) -> Self {
        let dim = data.first().map(Vec::len).unwrap_or(0);
        let n = data.len() as f64;

        let mut means = vec![0.0; dim];
        for row in data {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in means.iter_mut() {
            *m /= n;
        }

        let mut stds = vec![0.0; dim];
        for row in data {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in stds.iter_mut() {
            *s = (*s / n).sqrt();
            // Constant features pass through unscaled.
            if *s == 0.0 {
                *s = 1.0;
            }
        }

        StandardScaler { means, stds }
    }

    pub fn transform(&self, sample: &[f64]) -> Vec<f64> {
        sample
            .iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Internal {
        split_feature: usize,
        split_value: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    root: TreeNode,
}

impl IsolationTree {
    fn grow(samples: &[&[f64]], height_limit: usize, rng: &mut StdRng) -> TreeNode {
        Self::grow_node(samples, height_limit, 0, rng)
    }

    fn grow_node(
        samples: &[&[f64]],
        height_limit: usize,
        depth: usize,
        rng: &mut StdRng,
    ) -> TreeNode {
        if depth >= height_limit || samples.len() <= 1 {
            return TreeNode::Leaf { size: samples.len() };
        }

        let dim = samples[0].len();

        // Only features with spread in this node can split it.
        let mut candidates = Vec::with_capacity(dim);
        for feature in 0..dim {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for row in samples {
                min = min.min(row[feature]);
                max = max.max(row[feature]);
            }
            if max > min {
                candidates.push((feature, min, max));
            }
        }
        if candidates.is_empty() {
            return TreeNode::Leaf { size: samples.len() };
        }

        let (split_feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
        let split_value = rng.gen_range(min..max);

        let (left, right): (Vec<&[f64]>, Vec<&[f64]>) = samples
            .iter()
            .copied()
            .partition(|row| row[split_feature] < split_value);

        TreeNode::Internal {
            split_feature,
            split_value,
            left: Box::new(Self::grow_node(&left, height_limit, depth + 1, rng)),
            right: Box::new(Self::grow_node(&right, height_limit, depth + 1, rng)),
        }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0.0;
        loop {
            match node {
                TreeNode::Leaf { size } => return depth + average_path_length(*size),
                TreeNode::Internal { split_feature, split_value, left, right } => {
                    depth += 1.0;
                    node = if sample.get(*split_feature).copied().unwrap_or(0.0) < *split_value {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over n points.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// A trained isolation ensemble plus its feature scaling transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    scaler: StandardScaler,
    sample_size: usize,
    contamination: f64,
    /// The (1 - contamination) quantile of training-set raw scores. The
    /// normalized score pins this point to 0.5.
    offset: f64,
    trained: bool,
}

impl IsolationForest {
    /// Fit an ensemble on raw (unscaled) feature arrays.
    pub fn fit(data: &[Vec<f64>], config: &ForestConfig) -> Result<IsolationForest, PlatformError> {
        if data.len() < 2 {
            return Err(PlatformError::Model(format!(
                "need at least 2 training samples, got {}",
                data.len()
            )));
        }
        let dim = data[0].len();
        if data.iter().any(|row| row.len() != dim) {
            return Err(PlatformError::Model(
                "training samples have inconsistent dimensions".to_string(),
            ));
        }

        let scaler = StandardScaler::fit(data);
        let scaled: Vec<Vec<f64>> = data.iter().map(|row| scaler.transform(row)).collect();

        let sample_size = config.sample_size.min(scaled.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        let trees: Vec<IsolationTree> = (0..config.n_trees)
            .into_par_iter()
            .map(|tree_index| {
                let mut rng =
                    StdRng::seed_from_u64(config.seed.wrapping_add(tree_index as u64 * 0x9E37_79B9));
                let sample = subsample(&scaled, sample_size, &mut rng);
                IsolationTree { root: IsolationTree::grow(&sample, height_limit, &mut rng) }
            })
            .collect();

        let mut forest = IsolationForest {
            trees,
            scaler,
            sample_size,
            contamination: config.contamination,
            offset: 0.5,
            trained: true,
        };

        // Calibrate the normalization so the contamination boundary of the
        // training set lands on 0.5.
        let mut train_scores: Vec<f64> = scaled.par_iter().map(|row| forest.raw_score(row)).collect();
        train_scores.sort_by(|a, b| a.total_cmp(b));
        let quantile = (1.0 - config.contamination).clamp(0.0, 1.0);
        let index = ((train_scores.len() - 1) as f64 * quantile).round() as usize;
        forest.offset = train_scores[index];

        info!(
            "isolation ensemble trained: {} trees, {} samples, offset {:.4}",
            forest.trees.len(),
            data.len(),
            forest.offset
        );

        Ok(forest)
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Raw ensemble score `2^(-E[h(x)] / c(sample_size))` on a scaled
    /// sample. Around 0.5 for inliers, toward 1.0 for easily isolated
    /// points.
    fn raw_score(&self, scaled: &[f64]) -> f64 {
        let avg_path: f64 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(scaled))
            .sum::<f64>()
            / self.trees.len() as f64;

        let c = average_path_length(self.sample_size);
        if c == 0.0 {
            return 0.5;
        }
        2.0_f64.powf(-avg_path / c)
    }

    /// Normalized anomaly score in [0, 1]; higher = more anomalous.
    /// Monotone in the raw score and saturating at both bounds.
    pub fn anomaly_score(&self, sample: &[f64]) -> f64 {
        let scaled = self.scaler.transform(sample);
        (self.raw_score(&scaled) + 0.5 - self.offset).clamp(0.0, 1.0)
    }

    /// Trust contribution of a sample: `(1 - anomaly) * 100`.
    pub fn trust_contribution(&self, sample: &[f64]) -> f64 {
        (1.0 - self.anomaly_score(sample)) * 100.0
    }

    /// Persist the trained ensemble as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create model directory {:?}", parent))?;
        }
        let json = serde_json::to_vec(self).context("failed to serialize model")?;
        fs::write(path, json).with_context(|| format!("failed to write model to {:?}", path))?;
        info!("model saved to {}", path.display());
        Ok(())
    }

    /// Load a previously saved ensemble.
    pub fn load(path: &Path) -> Result<IsolationForest> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read model from {:?}", path))?;
        let forest: IsolationForest =
            serde_json::from_slice(&bytes).context("failed to deserialize model")?;
        info!("model loaded from {}", path.display());
        Ok(forest)
    }
}

/// Draw `sample_size` distinct rows, or every row when the set is small.
fn subsample<'a>(data: &'a [Vec<f64>], sample_size: usize, rng: &mut StdRng) -> Vec<&'a [f64]> {
    if data.len() <= sample_size {
        return data.iter().map(Vec::as_slice).collect();
    }
    rand::seq::index::sample(rng, data.len(), sample_size)
        .into_iter()
        .map(|i| data[i].as_slice())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_data(n: usize) -> Vec<Vec<f64>> {
        // A tight cluster around (1, 2, 3) with mild deterministic jitter.
        (0..n)
            .map(|i| {
                let j = (i % 7) as f64 * 0.01;
                vec![1.0 + j, 2.0 - j, 3.0 + j * 0.5]
            })
            .collect()
    }

    #[test]
    fn test_outlier_scores_higher_than_inlier() {
        let data = clustered_data(200);
        let forest = IsolationForest::fit(&data, &ForestConfig::default()).unwrap();

        let inlier = forest.anomaly_score(&[1.0, 2.0, 3.0]);
        let outlier = forest.anomaly_score(&[50.0, -40.0, 90.0]);

        assert!(outlier > inlier, "outlier {} inlier {}", outlier, inlier);
        assert!(outlier > 0.5);
    }

    #[test]
    fn test_scores_saturate_at_bounds() {
        let data = clustered_data(200);
        let forest = IsolationForest::fit(&data, &ForestConfig::default()).unwrap();

        let extreme = forest.anomaly_score(&[1e9, -1e9, 1e9]);
        assert!((0.0..=1.0).contains(&extreme));

        for sample in &data {
            let score = forest.anomaly_score(sample);
            assert!((0.0..=1.0).contains(&score));
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let data = clustered_data(150);
        let config = ForestConfig::default();
        let a = IsolationForest::fit(&data, &config).unwrap();
        let b = IsolationForest::fit(&data, &config).unwrap();

        let sample = [3.0, 1.0, 4.0];
        assert_eq!(a.anomaly_score(&sample), b.anomaly_score(&sample));
    }

    #[test]
    fn test_trust_contribution_inverts_anomaly() {
        let data = clustered_data(100);
        let forest = IsolationForest::fit(&data, &ForestConfig::default()).unwrap();

        let sample = [1.0, 2.0, 3.0];
        let anomaly = forest.anomaly_score(&sample);
        let trust = forest.trust_contribution(&sample);
        assert!((trust - (1.0 - anomaly) * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_fit_rejects_degenerate_input() {
        let err = IsolationForest::fit(&[vec![1.0, 2.0]], &ForestConfig::default()).unwrap_err();
        assert!(matches!(err, PlatformError::Model(_)));

        let err = IsolationForest::fit(
            &[vec![1.0, 2.0], vec![1.0]],
            &ForestConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PlatformError::Model(_)));
    }

    #[test]
    fn test_scaler_handles_constant_features() {
        let data = vec![vec![5.0, 1.0], vec![5.0, 2.0], vec![5.0, 3.0]];
        let scaler = StandardScaler::fit(&data);
        let scaled = scaler.transform(&[5.0, 2.0]);
        assert_eq!(scaled[0], 0.0);
        assert_eq!(scaled[1], 0.0);
    }

    #[test]
    fn test_save_load_round_trip() {
        let data = clustered_data(120);
        let forest = IsolationForest::fit(&data, &ForestConfig::default()).unwrap();

        let path = std::env::temp_dir().join(format!("forest-{}.json", uuid::Uuid::new_v4()));
        forest.save(&path).unwrap();
        let restored = IsolationForest::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(restored.is_trained());
        let sample = [1.0, 2.0, 3.0];
        assert_eq!(forest.anomaly_score(&sample), restored.anomaly_score(&sample));
    }

    #[test]
    fn test_average_path_length_monotone() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(100) > average_path_length(10));
    }
}
