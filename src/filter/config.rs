use std::time::Duration;

/// Built-in request-count limit applied when no configuration entry matches.
///
/// 128 weighted requests in a one-minute window is far above what a human
/// operating a browser generates, yet low enough to catch a single-source
/// flood within the window it starts in.
pub const DEFAULT_REQUEST_LIMIT: u64 = 128;

/// Built-in one-URI limit applied when no configuration entry matches.
///
/// Kept well below [`DEFAULT_REQUEST_LIMIT`] because hammering one URI is a
/// much stronger abuse signal than spreading the same volume across a site.
pub const DEFAULT_ONE_URI_LIMIT: u64 = 32;

/// Built-in block duration in seconds (one day) when no `block` entry matches.
pub const DEFAULT_BLOCK_SECS: u64 = 86_400;

/// Cadence for the tailer's wait loops: waiting for the access log to appear
/// and waiting for new data at end-of-file.
///
/// One second bounds how long a shutdown request can go unnoticed, since the
/// shutdown flag is checked before every sleep.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum interval between reload signals to the nginx master process.
///
/// Bot-set churn during an attack can otherwise trigger a reload on every
/// window close, and nginx reloads are not free.
pub const RELOAD_COOLDOWN_SECS: u64 = 60;

/// Warm-up staleness bound: records whose window is more than this far behind
/// the wall clock are discarded when `--skip-stale` is enabled, so a restart
/// does not re-process an old backlog.
pub const WARMUP_SKEW_SECS: i64 = 120;

/// Fixed-point scale for request weights. All per-address counters accumulate
/// centi-weights so the externally observable load is an exact integer
/// truncation, with no float drift across a large window.
pub const WEIGHT_SCALE: u64 = 100;

/// Centi-weight of an edge-served request (both upstream fields are `-`).
pub const WEIGHT_EDGE: u64 = 1;

/// Centi-weight of a request that reached an upstream.
pub const WEIGHT_DYNAMIC: u64 = 100;
