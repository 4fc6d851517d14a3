// Synthetic behavioral data for bootstrapping the global model before any
// real history exists. Distribution parameters mirror observed human
// typing/mouse telemetry; anomalies come in three shapes: bot-fast,
// machine-consistent, and hijack-slow.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::models::FEATURE_DIM;

/// Generate `n_normal` normal and `n_anomalous` anomalous feature arrays,
/// in that order. Deterministic for a given seed.
pub fn generate_bootstrap_data(n_normal: usize, n_anomalous: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(n_normal + n_anomalous);

    for _ in 0..n_normal {
        data.push(normal_sample(&mut rng));
    }
    for _ in 0..n_anomalous {
        match rng.gen_range(0..3) {
            0 => data.push(fast_sample(&mut rng)),
            1 => data.push(consistent_sample(&mut rng)),
            _ => data.push(slow_sample(&mut rng)),
        }
    }

    data
}

fn gaussian(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    match Normal::new(mean, std) {
        Ok(dist) => dist.sample(rng),
        Err(_) => mean,
    }
}

/// Typical interactive behavior.
fn normal_sample(rng: &mut StdRng) -> Vec<f64> {
    vec![
        gaussian(rng, 0.1, 0.03),   // avg_key_hold_time
        gaussian(rng, 0.15, 0.05),  // avg_inter_key_interval
        gaussian(rng, 5.0, 1.5),    // typing_speed
        gaussian(rng, 0.02, 0.01),  // key_hold_std
        gaussian(rng, 0.05, 0.02),  // inter_key_std
        gaussian(rng, 500.0, 150.0), // avg_mouse_speed
        gaussian(rng, 100.0, 30.0), // avg_mouse_acceleration
        gaussian(rng, 0.5, 0.2),    // click_rate
        gaussian(rng, 100.0, 30.0), // mouse_speed_std
        rng.gen_range(50..200) as f64, // total_events
        rng.gen_range(20..100) as f64, // keystroke_count
        rng.gen_range(30..100) as f64, // mouse_count
    ]
}

/// Bot-like: very fast and very regular.
fn fast_sample(rng: &mut StdRng) -> Vec<f64> {
    vec![
        gaussian(rng, 0.02, 0.005),
        gaussian(rng, 0.03, 0.005),
        gaussian(rng, 20.0, 2.0),
        gaussian(rng, 0.003, 0.001),
        gaussian(rng, 0.005, 0.001),
        gaussian(rng, 2000.0, 200.0),
        gaussian(rng, 500.0, 50.0),
        gaussian(rng, 2.0, 0.3),
        gaussian(rng, 50.0, 10.0),
        rng.gen_range(150..300) as f64,
        rng.gen_range(80..150) as f64,
        rng.gen_range(70..150) as f64,
    ]
}

/// Automated replay: timings with almost no variance.
fn consistent_sample(rng: &mut StdRng) -> Vec<f64> {
    vec![
        0.1,
        0.15,
        5.0,
        0.001,
        0.001,
        500.0,
        100.0,
        0.5,
        10.0,
        rng.gen_range(50..200) as f64,
        rng.gen_range(20..100) as f64,
        rng.gen_range(30..100) as f64,
    ]
}

/// Suspiciously slow and erratic, as in a hijacked session.
fn slow_sample(rng: &mut StdRng) -> Vec<f64> {
    vec![
        gaussian(rng, 0.5, 0.1),
        gaussian(rng, 1.0, 0.3),
        gaussian(rng, 1.0, 0.3),
        gaussian(rng, 0.1, 0.03),
        gaussian(rng, 0.3, 0.1),
        gaussian(rng, 100.0, 30.0),
        gaussian(rng, 20.0, 10.0),
        gaussian(rng, 0.1, 0.05),
        gaussian(rng, 30.0, 10.0),
        rng.gen_range(10..50) as f64,
        rng.gen_range(5..20) as f64,
        rng.gen_range(5..30) as f64,
    ]
}
