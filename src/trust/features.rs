// Feature extraction over a trailing window of behavioral events. Missing
// statistics stay `None` rather than zero so the rule engine can tell
// "absent" from "measured zero".

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::models::{
    BehavioralEvent, EventKind, EventPayload, FeatureVector, KeyAction, MouseAction, SessionId,
};

pub struct FeatureExtractor {
    window_seconds: u64,
}

impl FeatureExtractor {
    pub fn new(window_seconds: u64) -> Self {
        FeatureExtractor { window_seconds }
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_seconds as i64)
    }

    /// Build a feature vector from the events of one window. Returns
    /// `None` for an empty window; the caller accepts the batch and skips
    /// scoring.
    pub fn extract(
        &self,
        session_id: SessionId,
        events: &[BehavioralEvent],
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Option<FeatureVector> {
        if events.is_empty() {
            debug!("no events in window for session {}", session_id);
            return None;
        }

        let keystrokes: Vec<&BehavioralEvent> = events
            .iter()
            .filter(|e| e.kind() == EventKind::Keystroke)
            .collect();
        let mouse: Vec<&BehavioralEvent> = events
            .iter()
            .filter(|e| e.kind() == EventKind::Mouse)
            .collect();

        let mut features = FeatureVector::empty(session_id, window_start, window_end);
        features.total_events = events.len() as u32;
        features.keystroke_count = keystrokes.len() as u32;
        features.mouse_count = mouse.len() as u32;

        if !keystrokes.is_empty() {
            extract_keystroke_features(&keystrokes, &mut features);
        }
        if !mouse.is_empty() {
            extract_mouse_features(&mouse, &mut features);
        }

        Some(features)
    }
}

fn extract_keystroke_features(events: &[&BehavioralEvent], features: &mut FeatureVector) {
    // Group down/up timestamps per key for hold-time matching.
    let mut per_key: HashMap<&str, (Vec<f64>, Vec<f64>)> = HashMap::new();
    for event in events {
        if let EventPayload::Keystroke { key, action } = &event.payload {
            let entry = per_key.entry(key.as_str()).or_default();
            match action {
                KeyAction::Down => entry.0.push(event.timestamp),
                KeyAction::Up => entry.1.push(event.timestamp),
            }
        }
    }

    // For every down, the earliest later up is its release. Downs without
    // a later up are discarded, not zero-filled.
    let mut hold_times = Vec::new();
    for (downs, ups) in per_key.values_mut() {
        downs.sort_by(|a, b| a.total_cmp(b));
        ups.sort_by(|a, b| a.total_cmp(b));
        for &down in downs.iter() {
            if let Some(&up) = ups.iter().find(|&&up| up > down) {
                hold_times.push(up - down);
            }
        }
    }

    if !hold_times.is_empty() {
        features.avg_key_hold_time = Some(mean(&hold_times));
        features.key_hold_std = Some(std_dev(&hold_times));
    }

    // Inter-key intervals over the globally sorted timestamps of all
    // keystroke events, downs and ups alike.
    let mut timestamps: Vec<f64> = events.iter().map(|e| e.timestamp).collect();
    timestamps.sort_by(|a, b| a.total_cmp(b));

    if timestamps.len() > 1 {
        let intervals: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        features.avg_inter_key_interval = Some(mean(&intervals));
        features.inter_key_std = Some(std_dev(&intervals));

        let span = timestamps[timestamps.len() - 1] - timestamps[0];
        if span > 0.0 {
            features.typing_speed = Some(timestamps.len() as f64 / span);
        }
    }
}

fn extract_mouse_features(events: &[&BehavioralEvent], features: &mut FeatureVector) {
    let moves: Vec<&&BehavioralEvent> = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::Mouse { action: MouseAction::Move, .. }))
        .collect();
    let click_count = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::Mouse { action: MouseAction::Click, .. }))
        .count();

    if moves.len() > 1 {
        let mut speeds = Vec::new();
        let mut accelerations = Vec::new();

        for pair in moves.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            let (px, py) = mouse_position(prev);
            let (cx, cy) = mouse_position(curr);

            let distance = ((cx - px).powi(2) + (cy - py).powi(2)).sqrt();
            let dt = curr.timestamp - prev.timestamp;

            if dt > 0.0 {
                let speed = distance / dt;
                if let Some(&prev_speed) = speeds.last() {
                    accelerations.push((speed - prev_speed) / dt);
                }
                speeds.push(speed);
            }
        }

        if !speeds.is_empty() {
            features.avg_mouse_speed = Some(mean(&speeds));
            features.mouse_speed_std = Some(std_dev(&speeds));
        }
        if !accelerations.is_empty() {
            let magnitudes: Vec<f64> = accelerations.iter().map(|a| a.abs()).collect();
            features.avg_mouse_acceleration = Some(mean(&magnitudes));
        }
    }

    // Click rate over the span of all mouse events in the window.
    if click_count > 0 {
        let mut timestamps: Vec<f64> = events.iter().map(|e| e.timestamp).collect();
        timestamps.sort_by(|a, b| a.total_cmp(b));
        let span = timestamps[timestamps.len() - 1] - timestamps[0];
        if span > 0.0 {
            features.click_rate = Some(click_count as f64 / span);
        }
    }
}

fn mouse_position(event: &BehavioralEvent) -> (f64, f64) {
    match event.payload {
        EventPayload::Mouse { x, y, .. } => (x, y),
        _ => (0.0, 0.0),
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}
