use chrono::{DateTime, NaiveDateTime, Utc};

/// Parse an RSS publication date.
///
/// Nyaa emits RFC 2822 with a numeric offset ("Tue, 09 Sep 2025 20:24:10
/// -0000"); other feeds use "GMT", a bare ISO 8601 timestamp, or a plain
/// "YYYY-MM-DD HH:MM:SS". Formats are tried in that order.
#[must_use]
pub fn parse_pub_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    // RFC 2822 covers numeric offsets, "GMT" and "-0000" alike.
    if let Ok(parsed) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }

    None
}
