//! Shared activity and sentinel state for one iteration.
//!
//! Written by both stream pumps and the supervisor's polling loop, so every
//! access goes through one mutex. No await happens while the lock is held;
//! critical sections are single-field reads and writes.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Inner {
    last_activity: Instant,
    completion_seen: bool,
    usage_error_seen: bool,
}

/// Watchdog state shared between the two pumps and the polling loop
#[derive(Debug)]
pub struct WatchdogState {
    inner: Mutex<Inner>,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchdogState {
    /// Fresh state; the activity clock starts at construction time.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                last_activity: Instant::now(),
                completion_seen: false,
                usage_error_seen: false,
            }),
        }
    }

    /// Record output activity now.
    pub fn touch(&self) {
        self.inner.lock().expect("watchdog lock poisoned").last_activity = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.inner
            .lock()
            .expect("watchdog lock poisoned")
            .last_activity
            .elapsed()
    }

    /// Whether a heartbeat notice is due after `interval` of inactivity.
    /// A due check resets the activity clock, so one idle window yields
    /// exactly one firing and detection resumes afterwards.
    pub fn heartbeat_due(&self, interval: Duration) -> bool {
        let mut inner = self.inner.lock().expect("watchdog lock poisoned");
        if inner.last_activity.elapsed() >= interval {
            inner.last_activity = Instant::now();
            true
        } else {
            false
        }
    }

    /// Mark the completion sentinel as seen.
    pub fn mark_completion(&self) {
        self.inner.lock().expect("watchdog lock poisoned").completion_seen = true;
    }

    /// Mark the usage-error sentinel as seen.
    pub fn mark_usage_error(&self) {
        self.inner.lock().expect("watchdog lock poisoned").usage_error_seen = true;
    }

    /// Whether the completion sentinel has been seen.
    pub fn completion_seen(&self) -> bool {
        self.inner.lock().expect("watchdog lock poisoned").completion_seen
    }

    /// Whether the usage-error sentinel has been seen.
    pub fn usage_error_seen(&self) -> bool {
        self.inner.lock().expect("watchdog lock poisoned").usage_error_seen
    }
}
