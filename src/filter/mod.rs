//! Detection pipeline driver.
//!
//! One logical task drives tail → aggregate → (on window close) detect →
//! persist → maybe-signal in strict sequence. The only suspension points are
//! the tailer's one-second sleeps and the resolver's own DNS timeouts; no
//! shared mutable state crosses a thread boundary.

pub mod config;
pub mod detection;
pub mod parsers;
pub mod rdns;
pub mod reload;
pub mod store;
pub mod tailer;
pub mod types;
pub mod window;

use crate::limits::Limits;
use crate::logger::{Event, SharedLogger};
use rdns::{RdnsVerifier, ReverseVerifier};
use reload::ReloadController;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use store::BotStore;
use tailer::LogTailer;
use types::{ShutdownFlag, SharedStats};
use window::{Aggregator, CountsWindow};

/// Configuration bundle passed from `main` into the pipeline.
pub struct FilterConfig {
    /// Loaded threshold tables (or the built-in defaults).
    pub limits:     Limits,
    /// Shared structured logger.
    pub logger:     SharedLogger,
    /// Shared session statistics for the shutdown summary.
    pub stats:      SharedStats,
    /// Set by the signal handler; the tailer exits on the next checkpoint.
    pub shutdown:   ShutdownFlag,
    /// The nginx access log to follow.
    pub access_log: PathBuf,
    /// The bot artifact nginx consumes.
    pub bot_file:   PathBuf,
    /// PID file of the nginx master process.
    pub pid_file:   PathBuf,
    /// Detect and log only; suppress artifact writes and reload signals.
    pub dry_run:    bool,
    /// Discard records older than the warm-up bound at startup.
    pub skip_stale: bool,
}

/// Entry point for the pipeline. Blocks until shutdown is requested.
///
/// Returns `Err` only for startup failures (the DNS resolver could not be
/// initialized); once running, per-line and per-window problems are logged
/// and absorbed.
pub fn run_filter(cfg: FilterConfig) -> Result<(), String> {
    let verifier = RdnsVerifier::new()?;
    run_with_verifier(cfg, &verifier);
    Ok(())
}

/// The driver proper, generic over the FCrDNS implementation so the whole
/// pipeline can be exercised in tests without a resolver.
pub(crate) fn run_with_verifier(cfg: FilterConfig, verifier: &dyn ReverseVerifier) {
    let mut tailer = LogTailer::new(
        cfg.access_log.clone(),
        Arc::clone(&cfg.shutdown),
        Arc::clone(&cfg.logger),
    );
    let mut aggregator = Aggregator::new();
    let store = BotStore::new(cfg.bot_file.clone());
    let mut reload = ReloadController::new(cfg.pid_file.clone());

    cfg.logger.log(&Event::Info {
        message: "autofilter pipeline started",
    });

    while let Some(line) = tailer.next_line() {
        cfg.stats.lines_total.fetch_add(1, Ordering::Relaxed);

        let Some(record) = parsers::parse_log_line(&line) else {
            cfg.stats.lines_malformed.fetch_add(1, Ordering::Relaxed);
            cfg.logger.log(&Event::MalformedLine {
                snippet: snippet(&line),
            });
            continue;
        };

        if cfg.skip_stale && parsers::record_is_stale(&record.window) {
            continue;
        }

        if let Some(closed) = aggregator.feed(&record) {
            close_window(&cfg, verifier, &store, &mut reload, &closed);
        }
    }
    // The open window is not flushed on shutdown; it is incomplete. The
    // artifact's absolute expiries survive the restart on their own.
}

/// Detection, persistence and reload for one closed window.
fn close_window(
    cfg:      &FilterConfig,
    verifier: &dyn ReverseVerifier,
    store:    &BotStore,
    reload:   &mut ReloadController,
    closed:   &CountsWindow,
) {
    cfg.stats.windows_closed.fetch_add(1, Ordering::Relaxed);
    cfg.logger.log(&Event::WindowClosed {
        window: &closed.key,
        addrs:  closed.addr_count.len(),
        lines:  closed.lines,
    });

    let now = epoch_now();
    let mut bots = store.load(now);
    let added = detection::detect(closed, &cfg.limits, verifier, &mut bots, now);
    cfg.stats
        .bots_added
        .fetch_add(added.len() as u64, Ordering::Relaxed);

    for rec in &added {
        let until = store::format_ts(rec.block_until);
        if cfg.dry_run {
            cfg.logger.diag(&format!(
                "dry-run: would block {} ({}) load={} until {} [{}]",
                rec.addr, rec.country, rec.load, until, rec.reason
            ));
        } else {
            cfg.logger.log(&Event::BotDetected {
                ip:          &rec.addr,
                country:     &rec.country,
                load:        rec.load,
                block_until: &until,
                reason:      &rec.reason,
            });
        }
    }

    if cfg.dry_run {
        return;
    }

    if let Err(e) = store.write(&bots) {
        cfg.logger.log(&Event::Info {
            message: &format!("bot file write failed: {e}"),
        });
        return;
    }

    if let Some(pid) = reload.maybe_signal(&bots, now) {
        cfg.stats.reloads_sent.fetch_add(1, Ordering::Relaxed);
        cfg.logger.log(&Event::ReloadSignaled { pid });
    }
}

fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Caps a malformed line for the log event.
fn snippet(line: &str) -> &str {
    match line.char_indices().nth(120) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
