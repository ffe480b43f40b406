//! Rotation-aware access-log tailer.
//!
//! Follows an append-only log file, surviving logrotate's rename-and-recreate
//! cycle: every time a read returns no data, the tailer compares the inode of
//! the path against the inode it opened, and reopens from offset 0 when they
//! diverge. The previous handle is dropped before the new one is installed.
//!
//! Cooperative shutdown: the flag is checked after every read and before
//! every sleep, so a termination signal is honored within one poll interval.

use crate::filter::config::POLL_INTERVAL;
use crate::filter::types::ShutdownFlag;
use crate::logger::{Event, SharedLogger};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::thread;

/// An open log handle bound to the inode it was opened against.
struct OpenLog {
    reader: BufReader<File>,
    inode:  u64,
}

impl OpenLog {
    fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let inode = file.metadata()?.ino();
        Ok(Self {
            reader: BufReader::new(file),
            inode,
        })
    }
}

/// Follows the access log, yielding complete lines with the terminator
/// stripped. Owned exclusively by the pipeline driver.
pub struct LogTailer {
    path:     PathBuf,
    open:     Option<OpenLog>,
    shutdown: ShutdownFlag,
    logger:   SharedLogger,
}

impl LogTailer {
    pub fn new(path: PathBuf, shutdown: ShutdownFlag, logger: SharedLogger) -> Self {
        Self {
            path,
            open: None,
            shutdown,
            logger,
        }
    }

    /// Blocks until the next complete line is available.
    ///
    /// Returns `None` only when shutdown was requested. A missing file is
    /// polled at one-second cadence until it appears; end-of-file sleeps one
    /// second unless the file was rotated, in which case the new file is
    /// opened and read from the start.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return None;
            }

            if self.open.is_none() {
                match OpenLog::open(&self.path) {
                    Ok(open) => self.open = Some(open),
                    Err(_) => {
                        // Not there yet (or momentarily gone mid-rotation).
                        self.sleep();
                        continue;
                    }
                }
            }

            let Some(open) = self.open.as_mut() else {
                continue;
            };
            let held_inode = open.inode;
            let mut line = String::new();
            let read = open.reader.read_line(&mut line);

            match read {
                Ok(0) => {
                    if self.path_inode() != Some(held_inode) {
                        // Rotated underneath us: drop the old handle first,
                        // then reopen at offset 0 on the next iteration.
                        self.open = None;
                        self.logger.log(&Event::LogRotated {
                            path: &self.path.display().to_string(),
                        });
                    } else {
                        self.sleep();
                    }
                }
                Ok(_) => {
                    while line.ends_with('\n') || line.ends_with('\r') {
                        line.pop();
                    }
                    return Some(line);
                }
                Err(_) => self.sleep(),
            }
        }
    }

    fn path_inode(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.ino())
    }

    fn sleep(&self) {
        if self.shutdown.load(Ordering::Relaxed) {
            return;
        }
        thread::sleep(POLL_INTERVAL);
    }
}
