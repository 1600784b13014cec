//! Sender timestamps.

use chrono::{DateTime, Utc};

/// Microseconds since the Unix epoch, as carried in every frame.
pub type Timestamp = u64;

/// Current time as a frame timestamp.
pub fn now_micros() -> Timestamp {
    u64::try_from(Utc::now().timestamp_micros()).unwrap_or(0)
}

/// Converts a frame timestamp back to a wall-clock time.
///
/// Returns `None` for values outside chrono's representable range.
pub fn to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    let micros = i64::try_from(ts).ok()?;
    DateTime::from_timestamp_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotone_enough() {
        let a = now_micros();
        let b = now_micros();
        assert!(a > 1_500_000_000_000_000);
        assert!(b >= a);
    }

    #[test]
    fn test_to_datetime() {
        let dt = to_datetime(1_000_000).unwrap();
        assert_eq!(dt.timestamp(), 1);
        assert!(to_datetime(u64::MAX).is_none());
    }
}
