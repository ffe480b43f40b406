//! Structured logging for autofilter.
//!
//! Provides a [`Logger`] that writes events to stdout and to a size-rotated
//! log file. Output can be formatted as human-readable plain text or as
//! newline-delimited JSON (NDJSON) for log shippers.
//!
//! Configuration diagnostics go to a separate stderr stream ([`Logger::diag`])
//! so that parse problems and dry-run output stay visible even when the file
//! sink is the primary consumer of normal events.

use chrono::Local;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// The live log file rotates once it exceeds this size.
const ROTATE_BYTES: u64 = 1024 * 1024;

/// Number of rotated generations kept (`autofilter.log.1` … `.9`).
const ROTATE_KEEP: u32 = 9;

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds that autofilter can emit.
///
/// The `#[serde(tag = "event")]` attribute ensures JSON output includes an
/// `"event"` key so consumers can filter by type without inspecting structure.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// An access-log line failed to parse and was skipped.
    MalformedLine { snippet: &'a str },

    /// A one-minute window closed and was handed to detection.
    WindowClosed {
        window: &'a str,
        addrs:  usize,
        lines:  u64,
    },

    /// An offender crossed a threshold and entered the bot set.
    BotDetected {
        ip:          &'a str,
        country:     &'a str,
        load:        u64,
        block_until: &'a str,
        reason:      &'a str,
    },

    /// The access log was rotated underneath the tailer (inode change).
    LogRotated { path: &'a str },

    /// The nginx master process was signaled to reload.
    ReloadSignaled { pid: i32 },

    /// Session summary emitted on graceful shutdown.
    SessionSummary {
        duration_secs:   u64,
        lines_total:     u64,
        lines_malformed: u64,
        windows_closed:  u64,
        bots_added:      u64,
        reloads_sent:    u64,
    },
}

// ── Rotating file sink ───────────────────────────────────────────────────────

/// Append-mode log file that rotates through numbered generations once the
/// live file exceeds the size limit. Rotation shifts `.8` → `.9`, …,
/// `.1` → `.2`, live → `.1`, dropping the oldest generation.
struct RotatingFile {
    path:    PathBuf,
    writer:  BufWriter<File>,
    written: u64,
    limit:   u64,
}

impl RotatingFile {
    fn open(path: &Path) -> io::Result<Self> {
        Self::open_with_limit(path, ROTATE_BYTES)
    }

    fn open_with_limit(path: &Path, limit: u64) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            written,
            limit,
        })
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.written >= self.limit {
            self.rotate()?;
        }
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.written += line.len() as u64 + 1;
        Ok(())
    }

    fn generation(&self, n: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        for n in (1..ROTATE_KEEP).rev() {
            let from = self.generation(n);
            if from.exists() {
                let _ = fs::rename(&from, self.generation(n + 1));
            }
        }
        let _ = fs::rename(&self.path, self.generation(1));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.written = 0;
        Ok(())
    }
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared structured logger.
///
/// Constructed once in `main` and passed as an `Arc<Logger>` to every module
/// that needs to emit events. The internal `Mutex` serialises writes so a
/// line is never torn even if the signal handler races a log call.
pub struct Logger {
    /// Whether to format events as NDJSON instead of plain text.
    json: bool,
    /// Size-rotated file sink. `None` when no log file was configured.
    file: Option<Mutex<RotatingFile>>,
}

/// Type alias used throughout the codebase for convenience.
pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`     - Emit NDJSON instead of plain text when `true`.
    /// * `log_path` - If `Some`, open (or create) this file for rotated
    ///   appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, log_path: Option<&Path>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => Some(Mutex::new(RotatingFile::open(path)?)),
            None => None,
        };
        Ok(Self { json, file })
    }

    /// Logs a single [`Event`], writing to stdout and to the file sink.
    pub fn log(&self, event: &Event) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        let line = if self.json {
            // Serialise the event to a JSON Value so we can inject the timestamp.
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert(
                    "timestamp".to_string(),
                    serde_json::Value::String(timestamp.clone()),
                );
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, self.plain_text(event))
        };

        println!("{}", line);

        if let Some(mutex) = &self.file {
            if let Ok(mut sink) = mutex.lock() {
                let _ = sink.write_line(&line);
            }
        }
    }

    /// Writes one line to the configuration diagnostics stream (stderr).
    ///
    /// Used for config parse fallbacks and for dry-run detection output,
    /// which must not enter the normal event stream.
    pub fn diag(&self, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();
        eprintln!("[{}] [CONFIG] {}", timestamp, message);
    }

    /// Formats an [`Event`] as a human-readable plain-text string (no timestamp).
    fn plain_text(&self, event: &Event) -> String {
        match event {
            Event::Info { message } =>
                format!("[INFO] {}", message),

            Event::MalformedLine { snippet } =>
                format!("[SKIP] malformed line: {}", snippet),

            Event::WindowClosed { window, addrs, lines } =>
                format!("[WINDOW] {} closed: {} addrs, {} lines", window, addrs, lines),

            Event::BotDetected { ip, country, load, block_until, reason } =>
                format!(
                    "[BOT] {} ({}) load={} blocked until {} | {}",
                    ip, country, load, block_until, reason
                ),

            Event::LogRotated { path } =>
                format!("[ROTATE] {} reopened after rotation", path),

            Event::ReloadSignaled { pid } =>
                format!("[RELOAD] sent SIGHUP to nginx master pid {}", pid),

            Event::SessionSummary {
                duration_secs, lines_total, lines_malformed,
                windows_closed, bots_added, reloads_sent,
            } => format!(
                "[SUMMARY] duration={}s lines={} malformed={} windows={} bots={} reloads={}",
                duration_secs, lines_total, lines_malformed,
                windows_closed, bots_added, reloads_sent
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_output_carries_event_tag() {
        let event = Event::ReloadSignaled { pid: 1234 };
        let val = serde_json::to_value(&event).unwrap();
        assert_eq!(val["event"], "reload_signaled");
        assert_eq!(val["pid"], 1234);
    }

    #[test]
    fn rotation_shifts_generations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autofilter.log");
        let mut sink = RotatingFile::open_with_limit(&path, 64).unwrap();

        // Enough lines to trip the 64-byte limit several times.
        for i in 0..10 {
            sink.write_line(&format!("event number {i} with some padding text"))
                .unwrap();
        }

        assert!(path.exists());
        assert!(dir.path().join("autofilter.log.1").exists());
        assert!(dir.path().join("autofilter.log.2").exists());
        // The live file holds only what was written since the last rotation.
        assert!(fs::metadata(&path).unwrap().len() < 128);
    }

    #[test]
    fn reopen_resumes_byte_accounting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("autofilter.log");
        {
            let mut sink = RotatingFile::open_with_limit(&path, 1024).unwrap();
            sink.write_line("first run").unwrap();
        }
        let sink = RotatingFile::open_with_limit(&path, 1024).unwrap();
        assert_eq!(sink.written, fs::metadata(&path).unwrap().len());
    }
}
