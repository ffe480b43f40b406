//! Reload signaling toward the nginx master process.
//!
//! nginx only re-reads the bot artifact on reload, so after every store
//! write the controller decides whether a SIGHUP is warranted: the blocked
//! address set must actually have changed since the last published set, and
//! at least the cooldown interval must have passed since the last signal.

use crate::filter::config::RELOAD_COOLDOWN_SECS;
use crate::filter::types::BotMap;
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

pub struct ReloadController {
    pid_file:       PathBuf,
    last_reload:    u64,
    last_published: BTreeSet<String>,
}

impl ReloadController {
    pub fn new(pid_file: PathBuf) -> Self {
        Self {
            pid_file,
            last_reload: 0,
            last_published: BTreeSet::new(),
        }
    }

    /// Signals nginx when the bot set changed and the cooldown elapsed.
    ///
    /// Returns the signaled PID, or `None` when no signal was sent — whether
    /// because nothing changed, the cooldown is still running, or the PID
    /// file was missing/unreadable. State is only advanced on a delivered
    /// signal, so a skipped cycle is retried at the next window close.
    pub fn maybe_signal(&mut self, bots: &BotMap, now: u64) -> Option<i32> {
        let current: BTreeSet<String> = bots.keys().cloned().collect();
        if !self.should_signal(&current, now) {
            return None;
        }
        let pid = self.read_pid()?;
        if unsafe { libc::kill(pid, libc::SIGHUP) } != 0 {
            return None;
        }
        self.last_reload = now;
        self.last_published = current;
        Some(pid)
    }

    /// The publication predicate: cooldown elapsed AND set changed.
    fn should_signal(&self, current: &BTreeSet<String>, now: u64) -> bool {
        now.saturating_sub(self.last_reload) >= RELOAD_COOLDOWN_SECS
            && *current != self.last_published
    }

    /// First line of the PID file as a positive decimal PID.
    fn read_pid(&self) -> Option<i32> {
        let text = fs::read_to_string(&self.pid_file).ok()?;
        text.lines()
            .next()?
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::BotRecord;

    const NOW: u64 = 1_700_000_000;

    fn controller() -> ReloadController {
        ReloadController::new(PathBuf::from("/nonexistent/nginx.pid"))
    }

    fn set_of(addrs: &[&str]) -> BTreeSet<String> {
        addrs.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn first_change_signals_immediately() {
        let ctl = controller();
        assert!(ctl.should_signal(&set_of(&["1.2.3.4"]), NOW));
    }

    #[test]
    fn unchanged_set_never_signals() {
        let mut ctl = controller();
        ctl.last_published = set_of(&["1.2.3.4"]);
        ctl.last_reload = NOW - 999;
        assert!(!ctl.should_signal(&set_of(&["1.2.3.4"]), NOW));
    }

    #[test]
    fn cooldown_suppresses_even_a_changed_set() {
        let mut ctl = controller();
        ctl.last_reload = NOW - RELOAD_COOLDOWN_SECS + 1;
        assert!(!ctl.should_signal(&set_of(&["1.2.3.4"]), NOW));

        ctl.last_reload = NOW - RELOAD_COOLDOWN_SECS;
        assert!(ctl.should_signal(&set_of(&["1.2.3.4"]), NOW));
    }

    #[test]
    fn empty_initial_set_is_not_a_change() {
        let ctl = controller();
        assert!(!ctl.should_signal(&BTreeSet::new(), NOW));
    }

    #[test]
    fn missing_pid_file_skips_and_keeps_state() {
        let mut ctl = controller();
        let mut bots = BotMap::new();
        bots.insert(
            "1.2.3.4".to_string(),
            BotRecord {
                addr:        "1.2.3.4".to_string(),
                block_until: NOW + 60,
                country:     "UA".to_string(),
                load:        200,
                reason:      "REQUEST_COUNT from UNKNOWN REVERSE DOMAIN NAME".to_string(),
            },
        );

        assert!(ctl.maybe_signal(&bots, NOW).is_none());
        // Nothing was published, so the next cycle still sees a change.
        assert_eq!(ctl.last_reload, 0);
        assert!(ctl.last_published.is_empty());
    }

    #[test]
    fn pid_parsing_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nginx.pid");

        std::fs::write(&path, "not-a-pid\n").unwrap();
        assert!(ReloadController::new(path.clone()).read_pid().is_none());

        std::fs::write(&path, "-5\n").unwrap();
        assert!(ReloadController::new(path.clone()).read_pid().is_none());

        std::fs::write(&path, "12345\nsecond line ignored\n").unwrap();
        assert_eq!(ReloadController::new(path).read_pid(), Some(12345));
    }
}
