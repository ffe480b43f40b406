use crate::filter::config::{WARMUP_SKEW_SECS, WEIGHT_DYNAMIC, WEIGHT_EDGE};
use chrono::{Local, NaiveDateTime};

/// Number of TAB-separated fields the access-log format carries.
///
/// In order: time_iso, country, address, upstream_cache_status,
/// upstream_response_time, status, scheme, host, method, uri, body_bytes,
/// referer, user_agent.
pub const FIELD_COUNT: usize = 13;

/// Length of the minute-granular window key, `YYYY-MM-DD HH:MM`.
pub const WINDOW_KEY_LEN: usize = 16;

/// One parsed access-log line, reduced to the fields the aggregator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Normalized window key, `YYYY-MM-DD HH:MM`.
    pub window:  String,
    /// Two-letter country code as produced by the geo module.
    pub country: String,
    /// Client address (IPv4 or IPv6 textual form).
    pub addr:    String,
    /// Request target, host and URI concatenated.
    pub target:  String,
    /// Centi-weight of this request (1 edge-served, 100 dynamic).
    pub weight:  u64,
}

/// Parses one TAB-separated access-log line.
///
/// Returns `None` for any line that cannot be interpreted; the caller logs
/// and skips it. Trailing extra fields are tolerated (a user agent may
/// itself contain a TAB), since only the first ten fields are consumed.
pub fn parse_log_line(line: &str) -> Option<LogRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < FIELD_COUNT {
        return None;
    }

    let window = window_key(fields[0])?;
    let country = fields[1];
    let addr = fields[2];
    if addr.is_empty() {
        return None;
    }
    let cache_status = fields[3];
    let upstream_time = fields[4];
    let host = fields[7];
    let uri = fields[9];

    // Requests answered entirely from the edge cost almost nothing and are
    // weighted down a hundredfold; anything that touched an upstream counts
    // in full.
    let weight = if cache_status == "-" && upstream_time == "-" {
        WEIGHT_EDGE
    } else {
        WEIGHT_DYNAMIC
    };

    Some(LogRecord {
        window,
        country: country.to_string(),
        addr: addr.to_string(),
        target: format!("{host}{uri}"),
        weight,
    })
}

/// Derives the minute-granular window key from the ISO time field:
/// `2024-05-01T12:34:56+03:00` → `2024-05-01 12:34`.
pub fn window_key(time: &str) -> Option<String> {
    if time.len() < WINDOW_KEY_LEN || !time.is_char_boundary(WINDOW_KEY_LEN) {
        return None;
    }
    let prefix = &time[..WINDOW_KEY_LEN];
    if prefix.as_bytes().get(10) != Some(&b'T') {
        return None;
    }
    Some(prefix.replacen('T', " ", 1))
}

/// True when the record's window lies more than two minutes behind the local
/// wall clock. Drives the optional `--skip-stale` warm-up; an unparseable
/// key is never treated as stale.
pub fn record_is_stale(window: &str) -> bool {
    let Ok(start) = NaiveDateTime::parse_from_str(window, "%Y-%m-%d %H:%M") else {
        return false;
    };
    let now = Local::now().naive_local();
    now.signed_duration_since(start) > chrono::Duration::seconds(WARMUP_SKEW_SECS)
}

#[cfg(test)]
pub(crate) fn sample_line(time: &str, country: &str, addr: &str, uri: &str, cached: bool) -> String {
    let (cache, upstream) = if cached { ("-", "-") } else { ("MISS", "0.123") };
    format!(
        "{time}\t{country}\t{addr}\t{cache}\t{upstream}\t200\thttps\texample.com\tGET\t{uri}\t512\t-\tMozilla/5.0"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dynamic_line() {
        let line = sample_line("2024-05-01T12:34:56+03:00", "UA", "1.2.3.4", "/index", false);
        let rec = parse_log_line(&line).unwrap();
        assert_eq!(rec.window, "2024-05-01 12:34");
        assert_eq!(rec.country, "UA");
        assert_eq!(rec.addr, "1.2.3.4");
        assert_eq!(rec.target, "example.com/index");
        assert_eq!(rec.weight, WEIGHT_DYNAMIC);
    }

    #[test]
    fn edge_served_line_weighs_one_centi() {
        let line = sample_line("2024-05-01T12:34:56+03:00", "DE", "1.2.3.4", "/logo.png", true);
        assert_eq!(parse_log_line(&line).unwrap().weight, WEIGHT_EDGE);
    }

    #[test]
    fn short_and_garbled_lines_rejected() {
        assert!(parse_log_line("").is_none());
        assert!(parse_log_line("just one field").is_none());
        // 13 fields but a broken timestamp.
        let line = sample_line("yesterday-ish", "UA", "1.2.3.4", "/", false);
        assert!(parse_log_line(&line).is_none());
    }

    #[test]
    fn tab_in_user_agent_tolerated() {
        let mut line = sample_line("2024-05-01T12:34:56+03:00", "UA", "1.2.3.4", "/", false);
        line.push_str("\twith\ttabs");
        assert!(parse_log_line(&line).is_some());
    }

    #[test]
    fn window_key_normalizes_separator() {
        assert_eq!(
            window_key("2024-05-01T12:34:56.123+03:00").as_deref(),
            Some("2024-05-01 12:34")
        );
        assert!(window_key("2024-05-01 12:34:56").is_none());
        assert!(window_key("short").is_none());
    }

    #[test]
    fn stale_detection_uses_two_minute_bound() {
        let old = (Local::now() - chrono::Duration::minutes(10))
            .format("%Y-%m-%d %H:%M")
            .to_string();
        let fresh = Local::now().format("%Y-%m-%d %H:%M").to_string();
        assert!(record_is_stale(&old));
        assert!(!record_is_stale(&fresh));
        assert!(!record_is_stale("not a timestamp"));
    }
}
