//! Persistent bot artifact.
//!
//! The artifact is the only state autofilter persists, and it is shared with
//! nginx: every line maps an address to the `1;` sentinel nginx's geo block
//! resolves, with the remainder of the line carried as a comment. Replacement
//! is atomic — the artifact is written to a randomly named temporary sibling
//! and renamed over the target, so a concurrent reader always sees either the
//! old or the new file, never a partial one.

use crate::filter::types::{BotMap, BotRecord};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Artifact timestamps: UTC, second resolution, no zone designator.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Reads, merges and atomically rewrites the bot artifact.
pub struct BotStore {
    path: PathBuf,
}

impl BotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Reads the artifact into a [`BotMap`].
    ///
    /// A missing artifact is an empty set. Records whose expiry has passed
    /// and lines that fail to parse are dropped; the next write makes the
    /// pruning durable.
    pub fn load(&self, now: u64) -> BotMap {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return BotMap::new(),
        };

        let mut bots = BotMap::new();
        for line in text.lines() {
            let Some(rec) = parse_record(line) else {
                continue;
            };
            if rec.block_until > now {
                bots.insert(rec.addr.clone(), rec);
            }
        }
        bots
    }

    /// Serializes the bot set and atomically replaces the artifact.
    ///
    /// Records are ordered by load descending (ties broken by address) so
    /// the heaviest offenders lead the file. The rename is the commit point.
    pub fn write(&self, bots: &BotMap) -> io::Result<()> {
        let mut records: Vec<&BotRecord> = bots.values().collect();
        records.sort_by(|a, b| b.load.cmp(&a.load).then_with(|| a.addr.cmp(&b.addr)));

        let mut out = String::new();
        for rec in records {
            out.push_str(&render_record(rec));
            out.push('\n');
        }

        let tmp = tmp_sibling(&self.path);
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(out.as_bytes())?;
        }
        fs::rename(&tmp, &self.path)
    }
}

/// Temporary sibling path, `<path>.tmp.<16-hex>.tmp`, on the same filesystem
/// so the final rename cannot cross a mount boundary.
fn tmp_sibling(path: &Path) -> PathBuf {
    let suffix: u64 = rand::random();
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".tmp.{suffix:016x}.tmp"));
    PathBuf::from(name)
}

/// Parses one artifact line:
/// `<address> 1; # <country> <load> <block_until_iso> <reason…>`.
fn parse_record(line: &str) -> Option<BotRecord> {
    let mut fields = line.split_whitespace();
    let addr = fields.next()?;
    if fields.next()? != "1;" || fields.next()? != "#" {
        return None;
    }
    let country = fields.next()?;
    let load: u64 = fields.next()?.parse().ok()?;
    let iso = fields.next()?;
    let reason: Vec<&str> = fields.collect();
    if reason.is_empty() {
        return None;
    }

    let block_until = NaiveDateTime::parse_from_str(iso, TS_FORMAT)
        .ok()?
        .and_utc()
        .timestamp();

    Some(BotRecord {
        addr:        addr.to_string(),
        block_until: u64::try_from(block_until).ok()?,
        country:     country.to_string(),
        load,
        reason:      reason.join(" "),
    })
}

fn render_record(rec: &BotRecord) -> String {
    format!(
        "{:>45} 1; #    {}    {:>7}    {}    {}",
        rec.addr,
        rec.country,
        rec.load,
        format_ts(rec.block_until),
        rec.reason
    )
}

/// Formats an epoch as the artifact's ISO-8601 column.
pub fn format_ts(epoch: u64) -> String {
    match DateTime::<Utc>::from_timestamp(epoch as i64, 0) {
        Some(dt) => dt.format(TS_FORMAT).to_string(),
        None => "9999-12-31T23:59:59".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn rec(addr: &str, load: u64, until: u64) -> BotRecord {
        BotRecord {
            addr:        addr.to_string(),
            block_until: until,
            country:     "UA".to_string(),
            load,
            reason:      "REQUEST_COUNT from UNKNOWN REVERSE DOMAIN NAME".to_string(),
        }
    }

    fn store_in(dir: &tempfile::TempDir) -> BotStore {
        BotStore::new(dir.path().join("bot.conf"))
    }

    #[test]
    fn missing_artifact_is_empty_set() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load(NOW).is_empty());
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut bots = BotMap::new();
        for record in [
            rec("1.2.3.4", 150, NOW + 3_600),
            rec("2001:db8::7", 99, NOW + 60),
        ] {
            bots.insert(record.addr.clone(), record);
        }
        store.write(&bots).unwrap();

        let loaded = store.load(NOW);
        assert_eq!(loaded, bots);
    }

    #[test]
    fn expired_records_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut bots = BotMap::new();
        bots.insert("1.2.3.4".into(), rec("1.2.3.4", 150, NOW - 1));
        bots.insert("5.6.7.8".into(), rec("5.6.7.8", 80, NOW + 100));
        store.write(&bots).unwrap();

        let loaded = store.load(NOW);
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("5.6.7.8"));
    }

    #[test]
    fn records_sorted_by_load_descending() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut bots = BotMap::new();
        for record in [
            rec("1.1.1.1", 10, NOW + 100),
            rec("2.2.2.2", 500, NOW + 100),
            rec("3.3.3.3", 42, NOW + 100),
        ] {
            bots.insert(record.addr.clone(), record);
        }
        store.write(&bots).unwrap();

        let text = fs::read_to_string(dir.path().join("bot.conf")).unwrap();
        let addrs: Vec<&str> = text
            .lines()
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        assert_eq!(addrs, ["2.2.2.2", "3.3.3.3", "1.1.1.1"]);
    }

    #[test]
    fn line_shape_matches_consumer_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let mut bots = BotMap::new();
        bots.insert("1.2.3.4".into(), rec("1.2.3.4", 150, NOW + 3_600));
        store.write(&bots).unwrap();

        let text = fs::read_to_string(dir.path().join("bot.conf")).unwrap();
        let line = text.lines().next().unwrap();
        // Address right-aligned in a 45-column field, then the nginx value.
        assert!(line.starts_with(&format!("{:>45} 1; #", "1.2.3.4")));
        assert!(line.contains("    150    "));
    }

    #[test]
    fn garbage_lines_ignored_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bot.conf");
        fs::write(
            &path,
            "not a record\n\n1.2.3.4 1; # UA notanumber 2024-01-01T00:00:00 x\n",
        )
        .unwrap();
        assert!(BotStore::new(path).load(NOW).is_empty());
    }

    #[test]
    fn write_leaves_no_temporary_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.write(&BotMap::new()).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["bot.conf"]);
    }
}
