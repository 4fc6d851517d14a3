// Concurrency-safe cache of trained anomaly models: one global ensemble
// for the whole population and lazily built per-user ensembles. Training
// always runs on a snapshot outside the map locks; readers never observe a
// partially built model.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::errors::PlatformError;
use crate::models::UserId;
use crate::storage::Store;
use crate::trust::isolation::{ForestConfig, IsolationForest};
use crate::trust::synthetic::generate_bootstrap_data;

/// Most recent feature vectors considered when training a personal model.
const PERSONAL_HISTORY_LIMIT: usize = 500;

/// Synthetic bootstrap population for the global model fallback.
const BOOTSTRAP_NORMAL: usize = 1000;
const BOOTSTRAP_ANOMALOUS: usize = 100;

pub struct ModelCache {
    global: RwLock<Option<Arc<IsolationForest>>>,
    personal: RwLock<HashMap<UserId, Arc<IsolationForest>>>,
    /// Users with a training pass in flight; lookups stay lock-free of the
    /// training work itself.
    in_flight: Mutex<HashSet<UserId>>,
    forest_config: ForestConfig,
    min_personal_samples: usize,
    retrain_interval: usize,
    min_global_samples: usize,
}

impl ModelCache {
    pub fn new(config: &Config) -> Self {
        ModelCache {
            global: RwLock::new(None),
            personal: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            forest_config: ForestConfig {
                n_trees: config.ensemble_size,
                contamination: config.contamination,
                ..ForestConfig::default()
            },
            min_personal_samples: config.min_personal_samples,
            retrain_interval: config.personal_retrain_interval,
            min_global_samples: config.min_global_samples,
        }
    }

    pub fn global(&self) -> Option<Arc<IsolationForest>> {
        self.global.read().clone()
    }

    pub fn personal(&self, user_id: UserId) -> Option<Arc<IsolationForest>> {
        self.personal.read().get(&user_id).cloned()
    }

    /// Bring up the global model: reload a persisted ensemble if one
    /// exists, otherwise train from stored history when there is enough of
    /// it, otherwise from the synthetic bootstrap population. The pipeline
    /// always leaves this call with a live global model.
    pub async fn init_global(&self, store: &dyn Store, model_path: &Path) -> Result<()> {
        if model_path.exists() {
            match IsolationForest::load(model_path) {
                Ok(forest) => {
                    *self.global.write() = Some(Arc::new(forest));
                    return Ok(());
                }
                Err(e) => warn!("failed to load persisted model, retraining: {:#}", e),
            }
        }

        let history = store
            .all_feature_vectors()
            .await
            .map_err(|e| anyhow::anyhow!("loading training history: {}", e))?;

        let data: Vec<Vec<f64>> = if history.len() > self.min_global_samples {
            info!("training global model from {} stored feature vectors", history.len());
            history.iter().map(|fv| fv.to_array().to_vec()).collect()
        } else {
            info!(
                "insufficient stored history ({} vectors), training global model from synthetic data",
                history.len()
            );
            generate_bootstrap_data(BOOTSTRAP_NORMAL, BOOTSTRAP_ANOMALOUS, self.forest_config.seed)
        };

        let forest = IsolationForest::fit(&data, &self.forest_config)
            .map_err(|e| anyhow::anyhow!("global model training failed: {}", e))?;

        if let Err(e) = forest.save(model_path) {
            warn!("could not persist global model: {:#}", e);
        }

        *self.global.write() = Some(Arc::new(forest));
        Ok(())
    }

    /// Train or refresh the personal model for a user when their stored
    /// history warrants it. The trigger is count-based: build once the
    /// history reaches the minimum, retrain whenever the count sits on a
    /// multiple of the retrain interval. Lookups for other users proceed
    /// while a training pass runs.
    pub async fn maybe_train_personal(
        &self,
        store: &dyn Store,
        user_id: UserId,
    ) -> Result<(), PlatformError> {
        let count = store.feature_count_for_user(user_id).await?;
        if count < self.min_personal_samples {
            return Ok(());
        }

        let needs_training = match self.personal.read().get(&user_id) {
            None => true,
            Some(_) => count % self.retrain_interval == 0,
        };
        if !needs_training {
            return Ok(());
        }

        // One trainer per user at a time; a concurrent caller just keeps
        // using whatever model is already swapped in.
        if !self.in_flight.lock().insert(user_id) {
            return Ok(());
        }

        let result = self.train_personal(store, user_id).await;
        self.in_flight.lock().remove(&user_id);
        result
    }

    async fn train_personal(
        &self,
        store: &dyn Store,
        user_id: UserId,
    ) -> Result<(), PlatformError> {
        let history = store
            .feature_history_for_user(user_id, PERSONAL_HISTORY_LIMIT)
            .await?;
        let data: Vec<Vec<f64>> = history.iter().map(|fv| fv.to_array().to_vec()).collect();

        // Trained outside any lock; only the finished model touches the map.
        match IsolationForest::fit(&data, &self.forest_config) {
            Ok(forest) => {
                info!(
                    "personal model trained for user {} from {} vectors",
                    user_id,
                    data.len()
                );
                self.personal.write().insert(user_id, Arc::new(forest));
                Ok(())
            }
            Err(e) => {
                // A single user's failed training never blocks scoring;
                // fusion falls back to the global model.
                warn!("personal model training failed for user {}: {}", user_id, e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeatureVector, Session, User};
    use crate::storage::MemoryStore;
    use chrono::{Duration, Utc};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.ensemble_size = 25;
        config.min_personal_samples = 5;
        config.personal_retrain_interval = 10;
        config
    }

    async fn store_with_history(n: usize) -> (MemoryStore, UserId) {
        let store = MemoryStore::new();
        let user = User::new("trainee", None);
        store.insert_user(user.clone()).await.unwrap();
        let session = Session::new(user.id, Utc::now() + Duration::minutes(60));
        store.insert_session(session.clone()).await.unwrap();

        let now = Utc::now();
        for i in 0..n {
            let mut fv = FeatureVector::empty(session.id, now, now);
            fv.typing_speed = Some(5.0 + (i % 5) as f64 * 0.1);
            fv.avg_key_hold_time = Some(0.1);
            fv.total_events = 50 + (i % 7) as u32;
            fv.keystroke_count = 30;
            fv.mouse_count = 20;
            store.insert_feature_vector(fv).await.unwrap();
        }
        (store, user.id)
    }

    #[tokio::test]
    async fn test_no_personal_model_below_minimum() {
        let cache = ModelCache::new(&test_config());
        let (store, user_id) = store_with_history(3).await;

        cache.maybe_train_personal(&store, user_id).await.unwrap();
        assert!(cache.personal(user_id).is_none());
    }

    #[tokio::test]
    async fn test_personal_model_built_at_minimum() {
        let cache = ModelCache::new(&test_config());
        let (store, user_id) = store_with_history(6).await;

        cache.maybe_train_personal(&store, user_id).await.unwrap();
        assert!(cache.personal(user_id).is_some());
    }

    #[tokio::test]
    async fn test_retrain_only_on_count_multiple() {
        let cache = ModelCache::new(&test_config());
        let (store, user_id) = store_with_history(6).await;

        cache.maybe_train_personal(&store, user_id).await.unwrap();
        let first = cache.personal(user_id).unwrap();

        // 7 vectors: not a multiple of 10, the cached model stays.
        let session = store.all_feature_vectors().await.unwrap()[0].session_id;
        let now = Utc::now();
        let mut fv = FeatureVector::empty(session, now, now);
        fv.typing_speed = Some(5.5);
        store.insert_feature_vector(fv).await.unwrap();

        cache.maybe_train_personal(&store, user_id).await.unwrap();
        let second = cache.personal(user_id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Reach exactly 10: the count-modulo trigger fires.
        for i in 0..3 {
            let mut fv = FeatureVector::empty(session, now, now);
            fv.typing_speed = Some(6.0 + i as f64 * 0.1);
            store.insert_feature_vector(fv).await.unwrap();
        }
        cache.maybe_train_personal(&store, user_id).await.unwrap();
        let third = cache.personal(user_id).unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
    }

    #[tokio::test]
    async fn test_init_global_falls_back_to_synthetic() {
        let cache = ModelCache::new(&test_config());
        let store = MemoryStore::new();
        let path = std::env::temp_dir().join(format!("global-{}.json", uuid::Uuid::new_v4()));

        cache.init_global(&store, &path).await.unwrap();
        assert!(cache.global().is_some());

        // A second cache reloads the persisted ensemble instead of training.
        let cache2 = ModelCache::new(&test_config());
        cache2.init_global(&store, &path).await.unwrap();
        assert!(cache2.global().is_some());

        std::fs::remove_file(&path).ok();
    }
}
