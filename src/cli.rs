use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// autofilter — automatic layer-7 DDoS mitigation for nginx.
///
/// Tails the nginx access log, aggregates weighted request counts per client
/// in one-minute windows, verifies offenders are not legitimate search-engine
/// crawlers, and publishes a bot list that nginx uses to block them.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "autofilter",
    version = "0.2.0",
    about   = "Automatic layer-7 DDoS mitigation daemon for nginx",
    long_about = None,
    disable_version_flag = true,
)]
pub struct Cli {
    // ── Modes ────────────────────────────────────────────────────────────────

    /// Detect and log offenders without writing the bot file or signaling nginx.
    ///
    /// Detections are reported on the diagnostics stream (stderr) so the
    /// thresholds can be tuned against live traffic safely.
    #[arg(short = 'n', long = "dry-run", conflicts_with = "test_config")]
    pub dry_run: bool,

    /// Parse the configuration file, report the result, and exit.
    ///
    /// Exit code 0 when the file parses (or is absent), 1 on any parse error.
    #[arg(short = 't', long = "test-config")]
    pub test_config: bool,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    pub version: Option<bool>,

    // ── Paths ────────────────────────────────────────────────────────────────

    /// Threshold configuration file. Its absence is not an error; the
    /// built-in defaults apply.
    #[arg(
        long = "config",
        value_name = "FILE",
        default_value = "/opt/autofilter/autofilter.conf"
    )]
    pub config: PathBuf,

    /// The nginx access log to follow. Polled until it appears; rotation is
    /// handled transparently.
    #[arg(
        long = "access-log",
        value_name = "FILE",
        default_value = "/var/log/nginx/access.log"
    )]
    pub access_log: PathBuf,

    /// Bot artifact consumed by nginx. Replaced atomically on every update.
    #[arg(
        long = "bot-file",
        value_name = "FILE",
        default_value = "/opt/autofilter/var/bot.conf"
    )]
    pub bot_file: PathBuf,

    /// PID file of the nginx master process, read before each reload signal.
    #[arg(
        long = "pid-file",
        value_name = "FILE",
        default_value = "/var/run/nginx.pid"
    )]
    pub pid_file: PathBuf,

    /// Daemon log file, rotated at 1 MiB through 9 generations.
    #[arg(
        long = "log-file",
        value_name = "FILE",
        default_value = "/opt/autofilter/var/autofilter.log"
    )]
    pub log_file: PathBuf,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Emit log entries as newline-delimited JSON (NDJSON).
    ///
    /// Each event is a self-contained JSON object on its own line, suitable
    /// for ingestion by log shippers or SIEM platforms.
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    // ── Warm-up ──────────────────────────────────────────────────────────────

    /// Discard log records more than two minutes older than the wall clock.
    ///
    /// Prevents a restart from re-processing the backlog already present in
    /// the access log. Off by default.
    #[arg(long = "skip-stale")]
    pub skip_stale: bool,
}
