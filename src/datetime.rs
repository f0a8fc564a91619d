//! Date/time utilities for RSS Monitor.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Default display format for item dates.
pub const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Format a `DateTime<Utc>` in the given timezone.
///
/// Falls back to UTC if the timezone name is unknown.
pub fn format_in_timezone(dt: &DateTime<Utc>, timezone: &str, format: &str) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => dt.with_timezone(&tz).format(format).to_string(),
        Err(_) => dt.format(format).to_string(),
    }
}

/// Render a timestamp as an RFC 2822 date (mail `Date:` header) in the given timezone.
pub fn rfc2822_in_timezone(dt: &DateTime<Utc>, timezone: &str) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => dt.with_timezone(&tz).to_rfc2822(),
        Err(_) => dt.to_rfc2822(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_in_timezone() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(
            format_in_timezone(&dt, "Asia/Tokyo", "%Y/%m/%d %H:%M"),
            "2024/01/15 19:30"
        );
        assert_eq!(format_in_timezone(&dt, "UTC", DEFAULT_FORMAT), "2024-01-15 10:30");
    }

    #[test]
    fn test_format_in_timezone_invalid_timezone() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(
            format_in_timezone(&dt, "Invalid/Zone", "%Y/%m/%d %H:%M"),
            "2024/01/15 10:30"
        );
    }

    #[test]
    fn test_rfc2822_in_timezone() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(
            rfc2822_in_timezone(&dt, "Asia/Tokyo"),
            "Mon, 15 Jan 2024 19:30:00 +0900"
        );
    }
}
