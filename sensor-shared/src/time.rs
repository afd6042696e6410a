// SPDX-License-Identifier: GPL-3.0-only

//! Timestamp formatting and decimal truncation shared by every stage.

use chrono::{DateTime, Utc};

/// Truncate (never round) `value` to `decimals` fractional digits.
///
/// `truncate(1.0369, 3) == 1.036`, not `1.037`. Used for `effective_duration`
/// and for parsed control-message float values, both of which must never be
/// rounded up past what the encoder clock skew correction actually allows.
#[must_use]
pub fn truncate(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).trunc() / factor
}

/// Render `ts` as `YYYY-MM-DDTHH:MM:SS.mmmZ`, milliseconds truncated (not
/// rounded) from the timestamp's microseconds.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    let micros = ts.timestamp_subsec_micros();
    let millis = micros / 1000;
    format!("{}.{millis:03}Z", ts.format("%Y-%m-%dT%H:%M:%S"))
}

/// The current instant, for use as a `CaptureRecord`/`UploadRecord` timestamp.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncate_never_rounds_up() {
        assert_eq!(truncate(1.0369, 3), 1.036);
        assert_eq!(truncate(10.0, 3), 10.0);
        assert_eq!(truncate(10.3599, 3), 10.359);
    }

    #[test]
    fn truncate_is_idempotent() {
        let once = truncate(1.0369, 3);
        let twice = truncate(once, 3);
        assert_eq!(once, twice);
    }

    #[test]
    fn effective_duration_example() {
        assert_eq!(truncate(10.0 * 1.036, 3), 10.360);
    }

    #[test]
    fn format_timestamp_truncates_micros_to_millis() {
        let ts = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(format_timestamp(ts), "2026-07-28T12:00:00.123Z");
    }
}
