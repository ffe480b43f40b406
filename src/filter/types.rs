//! Core data structures shared across the filter sub-modules.
//!
//! The pipeline is single-threaded and cooperative, so the only types that
//! cross a thread boundary are the shutdown flag (set from the signal
//! handler) and the session counters (read by `main` for the final summary).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;

// ── Shutdown signal ──────────────────────────────────────────────────────────

/// Shared shutdown flag set by the SIGINT/SIGTERM handler.
///
/// The tailer checks it after every read and before every sleep; when `true`
/// the pipeline drains out of its loop and exits cleanly.
pub type ShutdownFlag = Arc<AtomicBool>;

// ── Session statistics ────────────────────────────────────────────────────────

/// Counters accumulated across a daemon run, emitted as the shutdown summary.
pub struct SessionStats {
    /// Access-log lines handed to the parser.
    pub lines_total: AtomicU64,
    /// Lines the parser rejected (logged and skipped).
    pub lines_malformed: AtomicU64,
    /// One-minute windows closed and run through detection.
    pub windows_closed: AtomicU64,
    /// Offenders newly added to the bot set.
    pub bots_added: AtomicU64,
    /// SIGHUP signals delivered to the nginx master.
    pub reloads_sent: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lines_total:     AtomicU64::new(0),
            lines_malformed: AtomicU64::new(0),
            windows_closed:  AtomicU64::new(0),
            bots_added:      AtomicU64::new(0),
            reloads_sent:    AtomicU64::new(0),
        })
    }
}

/// Shared type alias for the session statistics.
pub type SharedStats = Arc<SessionStats>;

// ── Bot records ───────────────────────────────────────────────────────────────

/// One blocked client, as held in memory and persisted in the bot artifact.
///
/// A record is live while `block_until` (absolute wall-clock seconds) is in
/// the future; the store drops expired records on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotRecord {
    pub addr:        String,
    /// Absolute expiry, seconds since the Unix epoch.
    pub block_until: u64,
    /// Two-letter country code observed on the offending traffic.
    pub country:     String,
    /// Integer-truncated weighted request count that triggered the block.
    pub load:        u64,
    /// Human-readable cause, e.g. `REQUEST_COUNT from host.example.com.`.
    pub reason:      String,
}

/// The authoritative in-memory bot set, keyed by address.
///
/// A `BTreeMap` so serialization and set comparison are deterministic; the
/// reload controller derives its published set from the keys of this map
/// rather than maintaining a second structure.
pub type BotMap = BTreeMap<String, BotRecord>;

// ── FCrDNS verdict ────────────────────────────────────────────────────────────

/// Outcome of forward-confirmed reverse DNS for a candidate offender.
///
/// Every resolver failure kind (timeout, NXDOMAIN, no answer, no servers)
/// collapses into `Unverified`; DNS trouble never blocks the pipeline and
/// never exonerates an offender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// FCrDNS verified and the hostname matches a search-engine suffix.
    Whitelisted,
    /// FCrDNS verified but the hostname is not a known crawler.
    VerifiedOther(String),
    /// PTR or forward lookup failed, or the forward answers did not include
    /// the original address.
    Unverified,
}
