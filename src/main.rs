mod cli;
mod filter;
mod limits;
mod logger;

use clap::Parser;
use cli::Cli;
use filter::types::{SessionStats, ShutdownFlag};
use filter::FilterConfig;
use limits::Limits;
use logger::{Event, Logger};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // ── Config test mode ─────────────────────────────────────────────────────
    // Parse, report, exit. No logger, no pipeline.
    if cli.test_config {
        return match Limits::load(&cli.config) {
            Ok(_) => {
                println!("{}: configuration ok", cli.config.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", cli.config.display(), e);
                ExitCode::FAILURE
            }
        };
    }

    let session_start = Instant::now();

    // Shared shutdown flag for graceful termination on SIGINT/SIGTERM.
    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);

    let logger = Arc::new(
        Logger::new(cli.json, Some(cli.log_file.as_path()))
            .expect("Failed to open log file"),
    );

    ctrlc::set_handler(move || {
        shutdown_signal.store(true, Ordering::SeqCst);
    })
    .expect("Failed to register signal handler");

    // ── Threshold configuration ──────────────────────────────────────────────
    // A broken config is a diagnostic, not a fatal error: the daemon falls
    // back to the built-in defaults and keeps protecting the site.
    let limits = match Limits::load(&cli.config) {
        Ok(limits) => limits,
        Err(e) => {
            logger.diag(&format!(
                "{}: {} (using built-in defaults)",
                cli.config.display(),
                e
            ));
            Limits::default()
        }
    };

    if cli.dry_run {
        logger.diag("dry-run mode: bot file writes and nginx reloads are suppressed");
    }

    let stats = SessionStats::new();

    let cfg = FilterConfig {
        limits,
        logger:     Arc::clone(&logger),
        stats:      Arc::clone(&stats),
        shutdown,
        access_log: cli.access_log,
        bot_file:   cli.bot_file,
        pid_file:   cli.pid_file,
        dry_run:    cli.dry_run,
        skip_stale: cli.skip_stale,
    };

    if let Err(e) = filter::run_filter(cfg) {
        logger.log(&Event::Info {
            message: &format!("startup failed: {e}"),
        });
        return ExitCode::FAILURE;
    }

    // ── Session summary ──────────────────────────────────────────────────────
    logger.log(&Event::SessionSummary {
        duration_secs:   session_start.elapsed().as_secs(),
        lines_total:     stats.lines_total.load(Ordering::Relaxed),
        lines_malformed: stats.lines_malformed.load(Ordering::Relaxed),
        windows_closed:  stats.windows_closed.load(Ordering::Relaxed),
        bots_added:      stats.bots_added.load(Ordering::Relaxed),
        reloads_sent:    stats.reloads_sent.load(Ordering::Relaxed),
    });
    ExitCode::SUCCESS
}
