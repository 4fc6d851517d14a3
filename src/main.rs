use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::info;
use rand::{thread_rng, Rng};

use adaptive_auth::config::{self, Config};
use adaptive_auth::models::{EventPayload, KeyAction, MouseAction};
use adaptive_auth::security::{CredentialAssertion, HmacVerifier, RegistrationAttestation};
use adaptive_auth::service::{AuthPlatform, IncomingEvent};
use adaptive_auth::storage::MemoryStore;
use adaptive_auth::trust::{generate_bootstrap_data, ForestConfig, IsolationForest};
use adaptive_auth::utils::{self, datetime_to_seconds};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    component: Component,
}

#[derive(Subcommand)]
enum Component {
    /// Train the global anomaly model and persist it
    TrainModel,

    /// Drive the full trust pipeline with synthetic traffic
    Simulate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    utils::logging::init_logger();

    // Parse command line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config()?;

    // Run the selected component
    match cli.component {
        Component::TrainModel => {
            info!("Starting model training...");
            train_model(config).await?;
        }
        Component::Simulate => {
            info!("Starting pipeline simulation...");
            simulate(config).await?;
        }
    }

    Ok(())
}

/// Offline global-model training from the synthetic bootstrap population,
/// with a quick labeled evaluation at the 0.5 anomaly boundary.
async fn train_model(config: Config) -> Result<()> {
    let n_normal = 1000;
    let n_anomalous = 100;

    info!(
        "generating synthetic training data: {} normal, {} anomalous",
        n_normal, n_anomalous
    );
    let data = generate_bootstrap_data(n_normal, n_anomalous, 42);

    let forest_config = ForestConfig {
        n_trees: config.ensemble_size,
        contamination: config.contamination,
        ..ForestConfig::default()
    };
    let forest = IsolationForest::fit(&data, &forest_config)?;

    // The generator emits normal rows first, so labels are positional.
    let mut true_positives = 0usize;
    let mut false_positives = 0usize;
    let mut true_negatives = 0usize;
    let mut false_negatives = 0usize;

    for (index, sample) in data.iter().enumerate() {
        let is_anomalous = index >= n_normal;
        let flagged = forest.anomaly_score(sample) > 0.5;
        match (is_anomalous, flagged) {
            (true, true) => true_positives += 1,
            (true, false) => false_negatives += 1,
            (false, true) => false_positives += 1,
            (false, false) => true_negatives += 1,
        }
    }

    let precision = if true_positives + false_positives > 0 {
        true_positives as f64 / (true_positives + false_positives) as f64
    } else {
        0.0
    };
    let recall = if true_positives + false_negatives > 0 {
        true_positives as f64 / (true_positives + false_negatives) as f64
    } else {
        0.0
    };

    println!("============================================================");
    println!("GLOBAL MODEL TRAINING");
    println!("============================================================");
    println!("True Negatives:  {}", true_negatives);
    println!("False Positives: {}", false_positives);
    println!("False Negatives: {}", false_negatives);
    println!("True Positives:  {}", true_positives);
    println!("Precision: {:.4}", precision);
    println!("Recall:    {:.4}", recall);
    println!("============================================================");

    forest.save(Path::new(&config.model_path))?;
    info!("model saved to {}", config.model_path);

    Ok(())
}

/// End-to-end walk through the platform: register, log in, stream calm
/// then bot-like telemetry, and step up when the policy demands it.
async fn simulate(config: Config) -> Result<()> {
    let window_seconds = config.feature_window_seconds;
    let store = Arc::new(MemoryStore::new());
    let platform = AuthPlatform::new(config, store, Arc::new(HmacVerifier::new()));
    platform.init().await?;

    let secret = b"simulated-device-secret".to_vec();

    // Enroll and authenticate the demo user.
    let challenge = platform.register_begin("demo").await?;
    platform
        .register_complete(
            "demo",
            &RegistrationAttestation {
                credential_id: "demo-cred".to_string(),
                public_key: secret.clone(),
                signature: HmacVerifier::sign_challenge(&secret, &challenge),
            },
        )
        .await?;

    let (challenge, _credential_ids) = platform.login_begin("demo").await?;
    let login = platform
        .login_complete(
            "demo",
            &CredentialAssertion {
                credential_id: "demo-cred".to_string(),
                signature: HmacVerifier::sign_challenge(&secret, &challenge),
                sign_count: 1,
                user_verified: false,
            },
        )
        .await?;
    println!("logged in: session {}", login.session.id);

    // A few rounds of human-looking typing keep the session trusted.
    for round in 0..3 {
        let base = datetime_to_seconds(&Utc::now());
        let outcome = platform
            .submit_event_batch(&login.token, login.session.id, calm_typing(base, 12))
            .await?;
        println!(
            "calm batch {}: score {:?}, action {:?}",
            round + 1,
            outcome.trust_score,
            outcome.action
        );
    }

    // Let the calm events age out of the feature window so the burst is
    // scored on its own.
    println!("waiting {}s for the feature window to drain...", window_seconds + 1);
    tokio::time::sleep(std::time::Duration::from_secs(window_seconds + 1)).await;

    // A bot-like burst degrades trust.
    let base = datetime_to_seconds(&Utc::now());
    let outcome = platform
        .submit_event_batch(&login.token, login.session.id, bot_burst(base))
        .await?;
    println!(
        "bot batch: score {:?}, status {:?}, action {:?}",
        outcome.trust_score, outcome.status, outcome.action
    );

    let report = platform.get_trust_score(&login.token, login.session.id).await?;
    println!("trust report: {:.1} ({}) - {}", report.trust_score, report.status, report.message);

    for alert in platform.get_alerts(&login.token, login.session.id, 10).await? {
        println!("alert [{:?}] {}: {}", alert.severity, alert.alert_type, alert.message);
    }

    // Step up if the policy asked for it.
    if report.require_stepup {
        let challenge = platform.begin_step_up(&login.token, login.session.id).await?;
        let restored = platform
            .complete_step_up(
                &login.token,
                login.session.id,
                &CredentialAssertion {
                    credential_id: "demo-cred".to_string(),
                    signature: HmacVerifier::sign_challenge(&secret, &challenge),
                    sign_count: 2,
                    user_verified: true,
                },
            )
            .await?;
        println!("step-up complete: trust restored to {:.1}", restored.trust_score);
    }

    platform.logout(&login.token).await?;
    println!("logged out");

    Ok(())
}

/// Human-paced typing with natural jitter.
fn calm_typing(base: f64, keys: usize) -> Vec<IncomingEvent> {
    let mut rng = thread_rng();
    let mut events = Vec::with_capacity(keys * 2);
    let mut t = base;

    for i in 0..keys {
        let key = ((b'a' + (i % 26) as u8) as char).to_string();
        let hold = rng.gen_range(0.06..0.14);
        events.push(IncomingEvent {
            timestamp: t,
            payload: EventPayload::Keystroke { key: key.clone(), action: KeyAction::Down },
        });
        events.push(IncomingEvent {
            timestamp: t + hold,
            payload: EventPayload::Keystroke { key, action: KeyAction::Up },
        });
        t += rng.gen_range(0.18..0.4);
    }

    events
}

/// Machine-like burst: implausibly fast, implausibly regular.
fn bot_burst(base: f64) -> Vec<IncomingEvent> {
    let mut events = Vec::new();
    let mut t = base;

    for i in 0..8 {
        let key = ((b'a' + (i % 26) as u8) as char).to_string();
        events.push(IncomingEvent {
            timestamp: t,
            payload: EventPayload::Keystroke { key: key.clone(), action: KeyAction::Down },
        });
        events.push(IncomingEvent {
            timestamp: t + 0.008,
            payload: EventPayload::Keystroke { key, action: KeyAction::Up },
        });
        t += 0.02;
    }

    for i in 0..6 {
        events.push(IncomingEvent {
            timestamp: t + i as f64 * 0.01,
            payload: EventPayload::Mouse {
                action: MouseAction::Move,
                x: i as f64 * 180.0,
                y: i as f64 * 120.0,
            },
        });
    }

    events
}
