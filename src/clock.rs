//! The `now()` seam
//!
//! Gauge methods accept an optional `at`; when it is omitted they consult
//! the thread-local clock configured here. The default is [`SystemClock`]
//! (wall-clock seconds since the Unix epoch); tests swap in a
//! [`ManualClock`] through [`override_clock`] so that omitted-`at` calls
//! stay deterministic.
//!
//! The clock is per-thread because the gauge graph itself is single
//! threaded; there is no global registry to synchronize.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::Seconds;

/// A source of the current time on the gauge time axis.
pub trait Clock {
    /// The current time in seconds.
    fn now(&self) -> Seconds;
}

/// Wall-clock seconds since the Unix epoch, at microsecond resolution.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Seconds {
        chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to. For deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    at: Cell<Seconds>,
}

impl ManualClock {
    /// Create a manual clock reading `at`.
    pub fn starting_at(at: Seconds) -> Rc<Self> {
        Rc::new(Self { at: Cell::new(at) })
    }

    /// Jump the clock to `at`.
    pub fn set(&self, at: Seconds) {
        self.at.set(at);
    }

    /// Advance the clock by `delta` seconds.
    pub fn advance(&self, delta: Seconds) {
        self.at.set(self.at.get() + delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Seconds {
        self.at.get()
    }
}

thread_local! {
    static CLOCK: RefCell<Rc<dyn Clock>> = RefCell::new(Rc::new(SystemClock));
}

/// Read the active clock.
pub fn now() -> Seconds {
    CLOCK.with(|clock| clock.borrow().now())
}

/// `at` if given, otherwise the active clock.
pub(crate) fn now_or(at: Option<Seconds>) -> Seconds {
    at.unwrap_or_else(now)
}

/// Replace the active clock for this thread until the returned guard drops.
#[must_use = "dropping the guard restores the previous clock immediately"]
pub fn override_clock(clock: Rc<dyn Clock>) -> ClockGuard {
    let previous = CLOCK.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), clock));
    ClockGuard { previous }
}

/// Restores the previously active clock when dropped.
pub struct ClockGuard {
    previous: Rc<dyn Clock>,
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        CLOCK.with(|slot| *slot.borrow_mut() = Rc::clone(&self.previous));
    }
}
