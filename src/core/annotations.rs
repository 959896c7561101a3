//! Annotation formatting.
//!
//! Annotations arrive as `<unix-seconds>$<message>` and are shown with a
//! local date prefix.

use chrono::DateTime;
use chrono_tz::Tz;

/// Number of most recent annotations attached to each poll.
pub const ANNOTATION_LIMIT: usize = 10;

const ANNOTATION_SEPARATOR: char = '$';
const DATE_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

/// Format one raw annotation in `tz`.
///
/// Entries that do not match the expected shape become a placeholder string
/// instead of an error.
pub fn format_annotation(raw: &str, tz: Tz) -> String {
    parse_annotation(raw, tz).unwrap_or_else(|| format!("Invalid annotation: {raw}"))
}

/// Format a list of raw annotations, keeping their order.
pub fn format_annotations(raw: &[String], tz: Tz) -> Vec<String> {
    raw.iter().map(|entry| format_annotation(entry, tz)).collect()
}

fn parse_annotation(raw: &str, tz: Tz) -> Option<String> {
    let (seconds, message) = raw.split_once(ANNOTATION_SEPARATOR)?;
    let seconds: i64 = seconds.trim().parse().ok()?;
    let when = DateTime::from_timestamp(seconds, 0)?.with_timezone(&tz);
    Some(format!("{}: {}", when.format(DATE_FORMAT), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats_in_timezone() {
        // 2024-01-15 12:30:00 UTC
        let raw = "1705321800$electrode check";
        assert_eq!(
            format_annotation(raw, chrono_tz::UTC),
            "15/01/2024, 12:30:00: electrode check"
        );
        assert_eq!(
            format_annotation(raw, chrono_tz::Europe::Madrid),
            "15/01/2024, 13:30:00: electrode check"
        );
    }

    #[test]
    fn test_message_may_contain_separator() {
        let formatted = format_annotation("0$cost $5", chrono_tz::UTC);
        assert_eq!(formatted, "01/01/1970, 00:00:00: cost $5");
    }

    #[test]
    fn test_malformed_entries_become_placeholders() {
        for raw in ["no separator", "abc$message", "$empty"] {
            assert_eq!(
                format_annotation(raw, chrono_tz::UTC),
                format!("Invalid annotation: {raw}")
            );
        }
    }
}
