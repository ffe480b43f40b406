//! Threshold configuration: the `limit`/`block` table loader and the
//! four-level resolver (exact address → CIDR → country → `ALL`).
//!
//! The grammar is line-oriented. `#` starts a comment, tabs count as
//! whitespace, and a parse failure anywhere fails the whole file — the
//! daemon then falls back to the built-in defaults and keeps running, while
//! `--test-config` surfaces the error to the operator.

use crate::filter::config::{DEFAULT_BLOCK_SECS, DEFAULT_ONE_URI_LIMIT, DEFAULT_REQUEST_LIMIT};
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

/// The entity key that every table is guaranteed to contain after loading.
const ALL: &str = "ALL";

// ── Threshold table ───────────────────────────────────────────────────────────

/// One entity → value mapping (request-count, one-URI-count, or
/// block-duration, depending on which of the three tables this is).
///
/// Entities are exact addresses, CIDR strings, two-letter country codes, or
/// the literal `ALL`. CIDR entries are pre-parsed at load time and scanned
/// linearly in lexicographic entity order; the first containing network wins.
/// Note this is not longest-prefix matching: the scan order is the sorted
/// key order, stable across runs.
#[derive(Debug, Clone)]
pub struct ThresholdTable {
    entries: BTreeMap<String, u64>,
    /// CIDR entries in lexicographic entity order, pre-parsed for `resolve`.
    cidrs:   Vec<(IpNet, u64)>,
    /// Mirror of the `ALL` entry so resolution never misses.
    all:     u64,
}

impl ThresholdTable {
    fn new(default_all: u64) -> Self {
        Self {
            entries: BTreeMap::new(),
            cidrs:   Vec::new(),
            all:     default_all,
        }
    }

    /// Inserts one parsed entity. Duplicates fail the file.
    fn insert(&mut self, entity: &str, value: u64) -> Result<(), String> {
        if self.entries.contains_key(entity) {
            return Err(format!("duplicate entity '{entity}'"));
        }
        self.entries.insert(entity.to_string(), value);
        if entity == ALL {
            self.all = value;
        }
        Ok(())
    }

    /// Rebuilds the CIDR scan list from the entry map. Called once after the
    /// whole file parsed, so the scan order is the map's key order.
    fn index_cidrs(&mut self) {
        self.cidrs = self
            .entries
            .iter()
            .filter(|(k, _)| k.contains('/'))
            .filter_map(|(k, v)| k.parse::<IpNet>().ok().map(|net| (net, *v)))
            .collect();
    }

    /// Exact entry lookup, used by tests and the loader's invariant checks.
    pub fn get(&self, entity: &str) -> Option<u64> {
        self.entries.get(entity).copied()
    }

    /// Resolves the applicable value for `(addr, country)`.
    ///
    /// Precedence: exact address, then the first CIDR (in lexicographic
    /// entity order) containing the address, then the country code, then
    /// `ALL` — which is always present after loading.
    pub fn resolve(&self, addr: &str, country: &str) -> u64 {
        if let Some(v) = self.entries.get(addr) {
            return *v;
        }
        if let Ok(ip) = addr.parse::<IpAddr>() {
            for (net, v) in &self.cidrs {
                if net.contains(&ip) {
                    return *v;
                }
            }
        }
        if let Some(v) = self.entries.get(country) {
            return *v;
        }
        self.all
    }
}

// ── Limits (the three tables) ─────────────────────────────────────────────────

/// The loaded threshold configuration, immutable for a daemon lifetime.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Total weighted request count per window.
    pub request: ThresholdTable,
    /// Weighted request count against a single URI per window.
    pub one_uri: ThresholdTable,
    /// Block duration in seconds.
    pub block:   ThresholdTable,
}

impl Default for Limits {
    fn default() -> Self {
        let mut limits = Self {
            request: ThresholdTable::new(DEFAULT_REQUEST_LIMIT),
            one_uri: ThresholdTable::new(DEFAULT_ONE_URI_LIMIT),
            block:   ThresholdTable::new(DEFAULT_BLOCK_SECS),
        };
        limits.synthesize_all();
        limits
    }
}

impl Limits {
    /// Loads the configuration file. A missing file is not an error — the
    /// built-in defaults apply. Any malformed line fails the whole file with
    /// a line-numbered reason; the caller decides whether that is fatal
    /// (`--test-config`) or a fallback-to-defaults diagnostic (the daemon).
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(format!("cannot read: {e}")),
        };
        Self::parse(&text)
    }

    /// Parses configuration text into the three tables.
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut limits = Self {
            request: ThresholdTable::new(DEFAULT_REQUEST_LIMIT),
            one_uri: ThresholdTable::new(DEFAULT_ONE_URI_LIMIT),
            block:   ThresholdTable::new(DEFAULT_BLOCK_SECS),
        };

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            limits
                .parse_line(raw)
                .map_err(|e| format!("line {line_no}: {e}"))?;
        }

        limits.synthesize_all();
        limits.request.index_cidrs();
        limits.one_uri.index_cidrs();
        limits.block.index_cidrs();
        Ok(limits)
    }

    fn parse_line(&mut self, raw: &str) -> Result<(), String> {
        let line = raw.split('#').next().unwrap_or("").replace('\t', " ");
        let mut tokens = line.split_whitespace();
        let Some(directive) = tokens.next() else {
            return Ok(());
        };

        match directive.to_ascii_lowercase().as_str() {
            "limit" => {
                let entity = normalize_entity(
                    tokens.next().ok_or("limit: missing entity")?,
                )?;
                let request = parse_count(
                    tokens.next().ok_or("limit: missing request count")?,
                )?;
                let one_uri = parse_count(
                    tokens.next().ok_or("limit: missing one-URI count")?,
                )?;
                if tokens.next().is_some() {
                    return Err("limit: trailing tokens".into());
                }
                if one_uri > request {
                    return Err(format!(
                        "limit {entity}: one-URI count exceeds request count"
                    ));
                }
                self.request.insert(&entity, request)?;
                self.one_uri.insert(&entity, one_uri)?;
                Ok(())
            }
            "block" => {
                let entity = normalize_entity(
                    tokens.next().ok_or("block: missing entity")?,
                )?;
                let secs = parse_duration(
                    tokens.next().ok_or("block: missing duration")?,
                )?;
                if tokens.next().is_some() {
                    return Err("block: trailing tokens".into());
                }
                self.block.insert(&entity, secs)
            }
            other => Err(format!("unknown directive '{other}'")),
        }
    }

    /// Ensures every table carries an `ALL` entry, synthesized from the
    /// built-in defaults when the file did not provide one.
    fn synthesize_all(&mut self) {
        if self.request.get(ALL).is_none() {
            let _ = self.request.insert(ALL, DEFAULT_REQUEST_LIMIT);
        }
        if self.one_uri.get(ALL).is_none() {
            let _ = self.one_uri.insert(ALL, DEFAULT_ONE_URI_LIMIT);
        }
        if self.block.get(ALL).is_none() {
            let _ = self.block.insert(ALL, DEFAULT_BLOCK_SECS);
        }
    }
}

// ── Token parsing ─────────────────────────────────────────────────────────────

/// Validates and case-folds an entity token.
///
/// Tokens containing `:` (IPv6 forms) are kept verbatim; everything else is
/// upper-cased, so `ua` and `all` fold to `UA` and `ALL`. The token must
/// classify as `ALL`, an exact address, a CIDR, or a two-letter country code.
fn normalize_entity(token: &str) -> Result<String, String> {
    let entity = if token.contains(':') {
        token.to_string()
    } else {
        token.to_ascii_uppercase()
    };

    if entity == ALL {
        return Ok(entity);
    }
    if entity.contains('/') {
        return entity
            .parse::<IpNet>()
            .map(|_| entity.clone())
            .map_err(|e| format!("invalid CIDR '{token}': {e}"));
    }
    if entity.parse::<IpAddr>().is_ok() {
        return Ok(entity);
    }
    if entity.len() == 2 && entity.bytes().all(|b| b.is_ascii_uppercase()) {
        return Ok(entity);
    }
    Err(format!("unrecognized entity '{token}'"))
}

/// Parses a count value: a positive integer, or `none` for "no limit"
/// (mapped to `u64::MAX`, which no window load can exceed).
fn parse_count(token: &str) -> Result<u64, String> {
    let token = token.to_ascii_lowercase();
    if token == "none" {
        return Ok(u64::MAX);
    }
    match token.parse::<u64>() {
        Ok(n) if n >= 1 => Ok(n),
        Ok(_) => Err(format!("count must be at least 1, got '{token}'")),
        Err(_) => Err(format!("invalid count '{token}'")),
    }
}

/// Parses a block duration of the form `<positive-int>{h|d}` into seconds.
fn parse_duration(token: &str) -> Result<u64, String> {
    let token = token.to_ascii_lowercase();
    let (digits, unit_secs) = if let Some(d) = token.strip_suffix('h') {
        (d, 3_600u64)
    } else if let Some(d) = token.strip_suffix('d') {
        (d, 86_400u64)
    } else {
        return Err(format!("duration '{token}' must end in 'h' or 'd'"));
    };
    match digits.parse::<u64>() {
        Ok(n) if n >= 1 => Ok(n.saturating_mul(unit_secs)),
        _ => Err(format!("invalid duration '{token}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let limits = Limits::load(Path::new("/nonexistent/autofilter.conf")).unwrap();
        assert_eq!(limits.request.get(ALL), Some(DEFAULT_REQUEST_LIMIT));
        assert_eq!(limits.one_uri.get(ALL), Some(DEFAULT_ONE_URI_LIMIT));
        assert_eq!(limits.block.get(ALL), Some(DEFAULT_BLOCK_SECS));
    }

    #[test]
    fn all_entries_present_after_any_parse() {
        let limits = Limits::parse("limit 1.2.3.4 10 5\n").unwrap();
        assert!(limits.request.get(ALL).is_some());
        assert!(limits.one_uri.get(ALL).is_some());
        assert!(limits.block.get(ALL).is_some());
    }

    #[test]
    fn one_uri_count_must_not_exceed_request_count() {
        // `none` as the one-URI count with a finite request count violates
        // the per-entity constraint.
        assert!(Limits::parse("limit 10.0.0.0/8 512 none\n").is_err());
        assert!(Limits::parse("limit ALL 10 20\n").is_err());
    }

    #[test]
    fn limit_and_block_directives_parse() {
        let text = "limit 1.2.3.4 10 5\nblock 1.2.3.4 1h\nblock UA 2d\n";
        let limits = Limits::parse(text).unwrap();
        assert_eq!(limits.request.get("1.2.3.4"), Some(10));
        assert_eq!(limits.one_uri.get("1.2.3.4"), Some(5));
        assert_eq!(limits.block.get("1.2.3.4"), Some(3_600));
        assert_eq!(limits.block.get("UA"), Some(172_800));
    }

    #[test]
    fn entities_case_fold_except_ipv6() {
        let limits = Limits::parse("limit ua none none\nlimit 2001:db8::1 7 7\n").unwrap();
        assert_eq!(limits.request.get("UA"), Some(u64::MAX));
        assert_eq!(limits.request.get("2001:db8::1"), Some(7));
    }

    #[test]
    fn duplicate_entity_fails() {
        assert!(Limits::parse("limit 1.2.3.4 10 5\nlimit 1.2.3.4 20 5\n").is_err());
    }

    #[test]
    fn invalid_cidr_fails() {
        assert!(Limits::parse("limit 10.0.0.0/99 10 5\n").is_err());
    }

    #[test]
    fn unknown_directive_fails_with_line_number() {
        let err = Limits::parse("limit ALL 128 32\nfrobnicate 1\n").unwrap_err();
        assert!(err.starts_with("line 2:"), "got: {err}");
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let limits = Limits::parse("\n# full line comment\nlimit ALL 64 16 # inline\n").unwrap();
        assert_eq!(limits.request.get(ALL), Some(64));
        assert_eq!(limits.one_uri.get(ALL), Some(16));
    }

    #[test]
    fn resolve_precedence_exact_cidr_country_all() {
        let text = "\
limit 1.2.3.4 10 5
limit 1.2.0.0/16 20 10
limit UA 30 15
limit ALL 40 20
";
        let limits = Limits::parse(text).unwrap();
        // Exact wins over everything.
        assert_eq!(limits.request.resolve("1.2.3.4", "UA"), 10);
        // CIDR wins over country.
        assert_eq!(limits.request.resolve("1.2.9.9", "UA"), 20);
        // Country wins over ALL.
        assert_eq!(limits.request.resolve("9.9.9.9", "UA"), 30);
        // ALL is the floor.
        assert_eq!(limits.request.resolve("9.9.9.9", "DE"), 40);
    }

    #[test]
    fn cidr_scan_is_lexicographic_first_match() {
        // Both networks contain 10.1.1.1; "10.0.0.0/8" sorts before
        // "10.1.0.0/16", so the /8 value wins even though the /16 is more
        // specific.
        let text = "limit 10.1.0.0/16 99 99\nlimit 10.0.0.0/8 7 7\n";
        let limits = Limits::parse(text).unwrap();
        assert_eq!(limits.request.resolve("10.1.1.1", "DE"), 7);
    }

    #[test]
    fn none_disables_blocking_for_country() {
        let limits = Limits::parse("limit UA none none\n").unwrap();
        assert_eq!(limits.request.resolve("5.6.7.8", "UA"), u64::MAX);
        assert_eq!(limits.one_uri.resolve("5.6.7.8", "UA"), u64::MAX);
        // Other countries still fall through to ALL.
        assert_eq!(
            limits.request.resolve("5.6.7.8", "DE"),
            DEFAULT_REQUEST_LIMIT
        );
    }

    #[test]
    fn one_uri_never_exceeds_request_per_entity() {
        let limits = Limits::parse("limit ALL 128 32\nlimit 1.2.3.4 50 50\n").unwrap();
        for entity in ["ALL", "1.2.3.4"] {
            let req = limits.request.get(entity).unwrap();
            let one = limits.one_uri.get(entity).unwrap();
            assert!(one <= req, "{entity}: {one} > {req}");
        }
    }
}
