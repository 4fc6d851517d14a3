pub mod logging;

use chrono::{DateTime, TimeZone, Utc};

/// Converts a float-seconds client timestamp to a DateTime<Utc>
pub fn seconds_to_datetime(seconds: f64) -> DateTime<Utc> {
    let millis = (seconds * 1000.0) as i64;
    match Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(dt) => dt,
        // Fallback to current time if the timestamp is out of range
        _ => Utc::now(),
    }
}

/// Converts a DateTime<Utc> to float seconds
pub fn datetime_to_seconds(dt: &DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_round_trip() {
        let dt = seconds_to_datetime(1700000000.5);
        assert!((datetime_to_seconds(&dt) - 1700000000.5).abs() < 1e-3);
    }
}
