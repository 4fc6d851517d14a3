use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Platform configuration, loaded from defaults, an optional KEY=VALUE
/// config file, then environment variable overrides (highest precedence).
#[derive(Debug, Clone)]
pub struct Config {
    /// Trust score at or above which a session is fully trusted.
    pub trust_threshold_ok: u8,
    /// Trust score at or above which a session is merely monitored.
    pub trust_threshold_monitor: u8,
    /// Trust score at or above which step-up re-authentication is required;
    /// below it the session is terminated.
    pub trust_threshold_stepup: u8,

    /// Trailing window of behavioral events used per feature vector.
    pub feature_window_seconds: u64,
    /// Lifetime of registration/login/step-up challenges.
    pub challenge_ttl_seconds: u64,
    /// Session lifetime from login.
    pub session_expiry_minutes: i64,

    /// Number of trees in the isolation ensemble.
    pub ensemble_size: usize,
    /// Expected proportion of outliers in training data.
    pub contamination: f64,
    /// Feature vectors required before a personal model is built.
    pub min_personal_samples: usize,
    /// Personal model retrains when the history count is a multiple of this.
    pub personal_retrain_interval: usize,
    /// Feature vectors required before the global model trains from
    /// history instead of the synthetic bootstrap.
    pub min_global_samples: usize,

    /// Where the trained global model is persisted.
    pub model_path: String,
    pub log_level: String,

    /// Extra configuration values
    pub extra: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trust_threshold_ok: 70,
            trust_threshold_monitor: 40,
            trust_threshold_stepup: 20,
            feature_window_seconds: 10,
            challenge_ttl_seconds: 300,
            session_expiry_minutes: 60,
            ensemble_size: 100,
            contamination: 0.1,
            min_personal_samples: 30,
            personal_retrain_interval: 50,
            min_global_samples: 100,
            model_path: "data/models/isolation_forest.json".to_string(),
            log_level: "info".to_string(),
            extra: HashMap::new(),
        }
    }
}

/// Load configuration from the environment and an optional config file
/// named by `CONFIG_FILE`.
pub fn load_config() -> Result<Config> {
    let mut config = Config::default();

    if let Ok(path) = env::var("CONFIG_FILE") {
        load_from_file(&mut config, Path::new(&path))?;
    }

    load_from_env(&mut config);
    config.validate()?;

    Ok(config)
}

impl Config {
    /// Reject threshold orderings the policy engine cannot partition on.
    pub fn validate(&self) -> Result<()> {
        if !(self.trust_threshold_ok > self.trust_threshold_monitor
            && self.trust_threshold_monitor > self.trust_threshold_stepup)
        {
            bail!(
                "trust thresholds must be strictly ordered OK > MONITOR > STEPUP, got {} / {} / {}",
                self.trust_threshold_ok,
                self.trust_threshold_monitor,
                self.trust_threshold_stepup
            );
        }
        if self.trust_threshold_ok > 100 {
            bail!("trust thresholds must lie in 0-100");
        }
        if !(0.0..0.5).contains(&self.contamination) {
            bail!("contamination must lie in [0, 0.5), got {}", self.contamination);
        }
        if self.ensemble_size == 0 {
            bail!("ensemble size must be nonzero");
        }
        if self.personal_retrain_interval == 0 {
            bail!("personal retrain interval must be nonzero");
        }
        Ok(())
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "TRUST_THRESHOLD_OK" => {
                if let Ok(v) = value.parse() {
                    self.trust_threshold_ok = v;
                }
            }
            "TRUST_THRESHOLD_MONITOR" => {
                if let Ok(v) = value.parse() {
                    self.trust_threshold_monitor = v;
                }
            }
            "TRUST_THRESHOLD_STEPUP" => {
                if let Ok(v) = value.parse() {
                    self.trust_threshold_stepup = v;
                }
            }
            "FEATURE_WINDOW_SECONDS" => {
                if let Ok(v) = value.parse() {
                    self.feature_window_seconds = v;
                }
            }
            "CHALLENGE_TTL_SECONDS" => {
                if let Ok(v) = value.parse() {
                    self.challenge_ttl_seconds = v;
                }
            }
            "SESSION_EXPIRY_MINUTES" => {
                if let Ok(v) = value.parse() {
                    self.session_expiry_minutes = v;
                }
            }
            "ENSEMBLE_SIZE" => {
                if let Ok(v) = value.parse() {
                    self.ensemble_size = v;
                }
            }
            "CONTAMINATION" => {
                if let Ok(v) = value.parse() {
                    self.contamination = v;
                }
            }
            "MIN_PERSONAL_SAMPLES" => {
                if let Ok(v) = value.parse() {
                    self.min_personal_samples = v;
                }
            }
            "PERSONAL_RETRAIN_INTERVAL" => {
                if let Ok(v) = value.parse() {
                    self.personal_retrain_interval = v;
                }
            }
            "MIN_GLOBAL_SAMPLES" => {
                if let Ok(v) = value.parse() {
                    self.min_global_samples = v;
                }
            }
            "MODEL_PATH" => self.model_path = value.to_string(),
            "LOG_LEVEL" => self.log_level = value.to_string(),
            _ => {
                if let Some(stripped) = key.strip_prefix("CONFIG_") {
                    self.extra.insert(stripped.to_string(), value.to_string());
                }
            }
        }
    }
}

fn load_from_env(config: &mut Config) {
    for (key, value) in env::vars() {
        config.apply(&key, &value);
    }
}

/// Load configuration from a file
fn load_from_file(config: &mut Config, path: &Path) -> Result<()> {
    let file = File::open(path).context("Failed to open configuration file")?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line.context("Failed to read line from configuration file")?;
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(index) = line.find('=') {
            let key = line[..index].trim();
            let value = line[index + 1..].trim();
            config.apply(key, value);
        }
    }

    Ok(())
}
