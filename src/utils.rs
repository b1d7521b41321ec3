/// Utility functions for time bookkeeping and formatting
use time::macros::format_description;
use time::OffsetDateTime;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to YYYY-MM-DD HH:MM:SS format.
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    dt.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
        .unwrap_or_else(|_| dt.to_string())
}

/// Convert a time::Duration to whole seconds, clamping negative spans to zero
pub fn duration_to_seconds(duration: time::Duration) -> u64 {
    duration.whole_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_datetime() {
        let dt = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(format_datetime(&dt), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_duration_to_seconds() {
        assert_eq!(duration_to_seconds(time::Duration::milliseconds(59_900)), 59);
        assert_eq!(duration_to_seconds(time::Duration::seconds(-3)), 0);
    }
}
