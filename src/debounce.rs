//! Quiet-window gate between recorded detection events.
//!
//! One `DetectionDebouncer` is shared by both workers, so a recorded event on
//! either stream suppresses the other stream until the window has elapsed.
//! Whether that coupling is wanted has not been settled; it is kept as an
//! explicit shared object so splitting it per stream is a wiring change only.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(5);

/// What the very first gate check does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebounceStart {
    /// The window must elapse once before anything is allowed. The clock
    /// starts at `seed_at`, or at the first call if nothing seeded it.
    #[default]
    Seed,
    /// First call is allowed and starts the window.
    Open,
}

#[derive(Debug)]
pub struct DetectionDebouncer {
    window: Duration,
    start: DebounceStart,
    last_detection: Mutex<Option<Instant>>,
}

impl DetectionDebouncer {
    pub fn new(window: Duration) -> Self {
        Self::with_start(window, DebounceStart::Seed)
    }

    pub fn with_start(window: Duration, start: DebounceStart) -> Self {
        Self {
            window,
            start,
            last_detection: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn start(&self) -> DebounceStart {
        self.start
    }

    /// Start the clock at `now` if nothing has started it yet. A pipeline
    /// calls this when it comes up, so the first window runs from startup
    /// rather than from the first qualifying frame.
    pub fn seed_at(&self, now: Instant) {
        let mut last = self
            .last_detection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        last.get_or_insert(now);
    }

    /// Gate check against the current time.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Gate check at `now`.
    ///
    /// With `DebounceStart::Seed` the first call only seeds the clock and
    /// returns false. After that, returns true (and restarts the window at
    /// `now`) only when strictly more than `window` has passed since the
    /// last allowed call. The read and the update happen under one lock.
    pub fn allow_at(&self, now: Instant) -> bool {
        let mut last = self
            .last_detection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = *last else {
            *last = Some(now);
            return self.start == DebounceStart::Open;
        };
        if now.saturating_duration_since(previous) > self.window {
            *last = Some(now);
            true
        } else {
            false
        }
    }
}

impl Default for DetectionDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}
