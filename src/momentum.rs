//! Momenta and the ordered event stream
//!
//! A [`Momentum`] is a time-bounded constant velocity. While alive it
//! contributes additively to the free slope of its gauge. The engine never
//! looks at momenta directly; it consumes the *event stream*: for every
//! momentum an `Add` event at `since` and, for finite lifetimes, a
//! `Remove` event at `until`, delivered in `(time, kind, momentum)`
//! lexicographic order between a synthesized opening and terminal
//! sentinel.
//!
//! Ordering uses the IEEE-754 total order throughout, and momentum
//! equality is bitwise, so `-0.0` and `0.0` velocities are distinct
//! momenta and removal always removes exactly what was added.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{GaugeError, Seconds, INF};

/// A constant velocity alive on `[since, until)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Momentum {
    velocity: f64,
    since: Seconds,
    until: Seconds,
}

impl Momentum {
    /// A momentum of `velocity` alive on `[since, until)`.
    ///
    /// The lifetime must be non-empty: `since < until`, unless one end is
    /// open (`since == -inf` or `until == +inf`).
    pub fn new(velocity: f64, since: Seconds, until: Seconds) -> Result<Self, GaugeError> {
        if since == -INF || until == INF || since < until {
            Ok(Self { velocity, since, until })
        } else {
            Err(GaugeError::InvalidMomentum { since, until })
        }
    }

    /// A momentum that is always alive.
    pub fn forever(velocity: f64) -> Self {
        Self { velocity, since: -INF, until: INF }
    }

    /// Velocity contributed while alive.
    #[inline]
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Start of the lifetime.
    #[inline]
    pub fn since(&self) -> Seconds {
        self.since
    }

    /// End of the lifetime.
    #[inline]
    pub fn until(&self) -> Seconds {
        self.until
    }

    /// The field bits, used for identity lookups.
    #[inline]
    pub(crate) fn bits(&self) -> [u64; 3] {
        [self.velocity.to_bits(), self.since.to_bits(), self.until.to_bits()]
    }
}

impl PartialEq for Momentum {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Momentum {}

/// Momenta order by `(until, since, velocity)` under the IEEE total
/// order, so a gauge's momentum set keeps soon-expiring momenta first.
impl Ord for Momentum {
    fn cmp(&self, other: &Self) -> Ordering {
        self.until
            .total_cmp(&other.until)
            .then(self.since.total_cmp(&other.since))
            .then(self.velocity.total_cmp(&other.velocity))
    }
}

impl PartialOrd for Momentum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// What happens to the working velocity set at an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// No transition; the opening and terminal sentinels.
    None = 0,
    /// A momentum's velocity joins the working set.
    Add = 1,
    /// A momentum's velocity leaves the working set.
    Remove = 2,
}

/// One entry of a gauge's event stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Event {
    pub time: Seconds,
    pub kind: EventKind,
    /// `None` only for the synthesized sentinels.
    pub momentum: Option<Momentum>,
}

impl Event {
    pub fn add(momentum: Momentum) -> Self {
        Self { time: momentum.since(), kind: EventKind::Add, momentum: Some(momentum) }
    }

    pub fn remove(momentum: Momentum) -> Self {
        Self { time: momentum.until(), kind: EventKind::Remove, momentum: Some(momentum) }
    }

    pub fn sentinel(time: Seconds) -> Self {
        Self { time, kind: EventKind::None, momentum: None }
    }

    /// Lexicographic `(time, kind, momentum)` order. At identical times
    /// `Add` precedes `Remove`; the `None` sentinels are synthesized at
    /// the ends of the stream and never stored, so their sorting first at
    /// equal times is deliberate and harmless.
    pub fn order(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then((self.kind as u8).cmp(&(other.kind as u8)))
            .then_with(|| match (&self.momentum, &other.momentum) {
                (Some(a), Some(b)) => a.cmp(b),
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
            })
    }
}
