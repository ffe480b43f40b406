//! One-minute batch aggregation.
//!
//! The aggregator owns at most one open [`CountsWindow`] at a time. A window
//! is created lazily by the first record of a new minute and closed the
//! moment a record with a different minute prefix arrives — the closed
//! window is handed back to the caller for detection *before* the new record
//! is accumulated, so windows close in strict prefix order.

use crate::filter::parsers::LogRecord;
use std::collections::BTreeMap;

/// Accumulated traffic for one one-minute window.
///
/// All counters hold centi-weights; `BTreeMap`s keep detector iteration
/// deterministic (address order).
#[derive(Debug, Default)]
pub struct CountsWindow {
    /// The window key, `YYYY-MM-DD HH:MM`.
    pub key: String,
    /// Per-address accumulated centi-weight.
    pub addr_count: BTreeMap<String, u64>,
    /// Per-address, per-target accumulated centi-weight.
    pub addr_uri_count: BTreeMap<String, BTreeMap<String, u64>>,
    /// Last-seen country per address (last writer wins within the window).
    pub country: BTreeMap<String, String>,
    /// Number of accumulated lines, for the window-close log event.
    pub lines: u64,
}

impl CountsWindow {
    fn new(key: String) -> Self {
        Self {
            key,
            ..Self::default()
        }
    }

    fn accumulate(&mut self, rec: &LogRecord) {
        *self.addr_count.entry(rec.addr.clone()).or_insert(0) += rec.weight;
        *self
            .addr_uri_count
            .entry(rec.addr.clone())
            .or_default()
            .entry(rec.target.clone())
            .or_insert(0) += rec.weight;
        self.country.insert(rec.addr.clone(), rec.country.clone());
        self.lines += 1;
    }
}

// ── Streaming aggregator ─────────────────────────────────────────────────────

/// Streams records into windows, reporting each closed window exactly once.
#[derive(Debug, Default)]
pub struct Aggregator {
    current: Option<CountsWindow>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one record.
    ///
    /// When the record belongs to a different minute than the open window,
    /// the open window is closed and returned; the record then seeds the
    /// fresh window. Exactly one window is open at any time.
    pub fn feed(&mut self, rec: &LogRecord) -> Option<CountsWindow> {
        let closed = match &self.current {
            Some(w) if w.key != rec.window => self.current.take(),
            _ => None,
        };
        let window = self
            .current
            .get_or_insert_with(|| CountsWindow::new(rec.window.clone()));
        window.accumulate(rec);
        closed
    }
}
