//! The gauge entity
//!
//! A [`Gauge`] is a cheap cloneable handle onto shared state: the base
//! anchor, the momentum set with its event index, the two limits, the
//! cached determination, and the weak set of *dependents* (gauges that use
//! this one as a limit). Cloning a handle aliases the same gauge.
//!
//! ## Mutation discipline
//!
//! Every mutation clears the cached determination *first* and then
//! notifies dependents, so a callback that queries the mutated gauge never
//! observes a stale trajectory. Rebasing notifies dependents *before* the
//! base moves, handing them the new limit value explicitly; each dependent
//! re-anchors itself against its old view and the recursion terminates
//! because the limit graph is acyclic by construction.
//!
//! ## Ownership
//!
//! A limit reference is strong (`Limit::Gauge` keeps the limit alive, as a
//! user of the limit expects); the back-reference is weak. Cycle rejection
//! at install time is therefore also what keeps the reference graph
//! leak-free.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::clock;
use crate::determination::{self, Crossings, Determination, Vertex};
use crate::line::Line;
use crate::momentum::{Event, Momentum};
use crate::{GaugeError, Seconds, INF};

/// What to do when a mutation would leave the limit band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Policy {
    /// Refuse the mutation with [`GaugeError::OutOfRange`].
    Error = 0,
    /// Accept the new value unconditionally.
    Ok = 1,
    /// Accept while the gauge is in range, refuse once it is not: the
    /// band may be left at most once.
    Once = 2,
    /// Clamp the new value into the band.
    Clamp = 3,
}

/// One side of the band: a constant or another gauge's trajectory.
#[derive(Debug, Clone)]
pub enum Limit {
    /// A fixed boundary value; `±inf` leaves the side unbounded.
    Constant(f64),
    /// A moving boundary following another gauge.
    Gauge(Gauge),
}

impl Limit {
    /// The boundary value at `at` (`now` when omitted).
    pub fn value_at(&self, at: Option<Seconds>) -> f64 {
        match self {
            Limit::Constant(value) => *value,
            Limit::Gauge(gauge) => gauge.value_at(at),
        }
    }
}

impl From<f64> for Limit {
    fn from(value: f64) -> Self {
        Limit::Constant(value)
    }
}

impl From<&Gauge> for Limit {
    fn from(gauge: &Gauge) -> Self {
        Limit::Gauge(gauge.clone())
    }
}

impl From<Gauge> for Limit {
    fn from(gauge: Gauge) -> Self {
        Limit::Gauge(gauge)
    }
}

struct Core {
    base: Vertex,
    /// Ordered by `(until, since, velocity)`: soon-expiring first.
    momenta: Vec<Momentum>,
    /// Ordered add/remove transitions; entries whose momentum has been
    /// removed are pruned lazily on the next stream materialization.
    events: Vec<Event>,
    max: Limit,
    min: Limit,
    determination: Option<Rc<Determination>>,
    /// Gauges that use this one as a limit. Weak: membership grants no
    /// lifetime extension, dead entries are pruned on iteration.
    dependents: Vec<Weak<RefCell<Core>>>,
}

impl Core {
    fn insert_event(&mut self, event: Event) {
        let at = self.events.partition_point(|e| e.order(&event) != Ordering::Greater);
        self.events.insert(at, event);
    }
}

/// A scalar that evolves over time under momenta, clamped by two limits.
#[derive(Clone)]
pub struct Gauge {
    core: Rc<RefCell<Core>>,
}

impl Gauge {
    /// A gauge of `value` at `at` (`now` when omitted), bounded by `max`
    /// above and `min` below.
    ///
    /// Limit gauges are registered as dependencies but nothing is clamped
    /// or forgotten at birth; the base stays exactly `(at, value)` even
    /// when it lies outside the band.
    pub fn new(
        value: f64,
        max: impl Into<Limit>,
        min: impl Into<Limit>,
        at: Option<Seconds>,
    ) -> Gauge {
        let at = clock::now_or(at);
        let gauge = Gauge {
            core: Rc::new(RefCell::new(Core {
                base: Vertex { time: at, value },
                momenta: Vec::new(),
                events: Vec::new(),
                max: max.into(),
                min: min.into(),
                determination: None,
                dependents: Vec::new(),
            })),
        };
        let (max, min) = gauge.limits();
        for limit in [&max, &min] {
            if let Limit::Gauge(l) = limit {
                l.register_dependent(&gauge);
            }
        }
        gauge
    }

    /// Rebuild a gauge from persisted parts, re-registering it with any
    /// limit gauges.
    pub fn restore(
        base: Vertex,
        momenta: Vec<Momentum>,
        max: impl Into<Limit>,
        min: impl Into<Limit>,
    ) -> Gauge {
        let gauge = Gauge::new(base.value, max, min, Some(base.time));
        for momentum in momenta {
            gauge.add_momentum(momentum);
        }
        gauge
    }

    /// Whether two handles alias the same gauge.
    #[inline]
    pub fn ptr_eq(a: &Gauge, b: &Gauge) -> bool {
        Rc::ptr_eq(&a.core, &b.core)
    }

    /// The base anchor `(time, value)`.
    pub fn base(&self) -> Vertex {
        self.core.borrow().base
    }

    /// The live momenta, soon-expiring first.
    pub fn momenta(&self) -> Vec<Momentum> {
        self.core.borrow().momenta.clone()
    }

    /// The upper limit.
    pub fn max_limit(&self) -> Limit {
        self.core.borrow().max.clone()
    }

    /// The lower limit.
    pub fn min_limit(&self) -> Limit {
        self.core.borrow().min.clone()
    }

    fn limits(&self) -> (Limit, Limit) {
        let core = self.core.borrow();
        (core.max.clone(), core.min.clone())
    }

    /// The upper boundary value at `at`.
    pub fn max_at(&self, at: Option<Seconds>) -> f64 {
        self.max_limit().value_at(at)
    }

    /// The lower boundary value at `at`.
    pub fn min_at(&self, at: Option<Seconds>) -> f64 {
        self.min_limit().value_at(at)
    }

    // ------------------------------------------------------------------
    // Momenta
    // ------------------------------------------------------------------

    /// Attach `momentum` and return it (handy for a later
    /// [`remove_momentum`](Self::remove_momentum)).
    pub fn add_momentum(&self, momentum: Momentum) -> Momentum {
        {
            let mut core = self.core.borrow_mut();
            let at = core.momenta.partition_point(|m| m <= &momentum);
            core.momenta.insert(at, momentum);
            core.insert_event(Event::add(momentum));
            if momentum.until() < INF {
                core.insert_event(Event::remove(momentum));
            }
        }
        self.invalidate();
        momentum
    }

    /// Detach one momentum equal to `momentum`.
    pub fn remove_momentum(&self, momentum: Momentum) -> Result<(), GaugeError> {
        {
            let mut core = self.core.borrow_mut();
            let at = core
                .momenta
                .iter()
                .position(|m| *m == momentum)
                .ok_or(GaugeError::NotFound)?;
            core.momenta.remove(at);
        }
        self.invalidate();
        Ok(())
    }

    /// The ordered event stream the engine consumes: an opening sentinel
    /// at the base, every live transition, a terminal sentinel at `+inf`.
    /// Index entries of removed momenta are pruned here.
    fn momentum_events(&self) -> Vec<Event> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        let mut quota: HashMap<[u64; 3], usize> = HashMap::new();
        for m in &core.momenta {
            *quota.entry(m.bits()).or_insert(0) += 1;
        }
        let mut used: HashMap<([u64; 3], u8), usize> = HashMap::new();
        core.events.retain(|ev| {
            let m = ev.momentum.expect("stored events always carry a momentum");
            let allowed = quota.get(&m.bits()).copied().unwrap_or(0);
            let seen = used.entry((m.bits(), ev.kind as u8)).or_insert(0);
            if *seen < allowed {
                *seen += 1;
                true
            } else {
                false
            }
        });
        let mut out = Vec::with_capacity(core.events.len() + 2);
        out.push(Event::sentinel(core.base.time));
        out.extend(core.events.iter().copied());
        out.push(Event::sentinel(INF));
        out
    }

    // ------------------------------------------------------------------
    // Determination and invalidation
    // ------------------------------------------------------------------

    /// The trajectory from the base onward, computing and caching it on
    /// first use.
    pub fn determination(&self) -> Rc<Determination> {
        if let Some(det) = self.core.borrow().determination.clone() {
            return det;
        }
        let (base, (max, min)) = (self.base(), self.limits());
        debug!(base_time = base.time, base_value = base.value, "determining trajectory");
        let events = self.momentum_events();
        let ceil_lines = limit_lines(&max, base);
        let floor_lines = limit_lines(&min, base);
        let det = Rc::new(determination::determinate(base, &events, ceil_lines, floor_lines));
        self.core.borrow_mut().determination = Some(Rc::clone(&det));
        det
    }

    /// Drop the cached determination, transitively invalidating every
    /// dependent. The local cache clears before any dependent runs, so
    /// callbacks querying this gauge rebuild rather than reuse.
    pub fn invalidate(&self) {
        if self.core.borrow_mut().determination.take().is_some() {
            trace!("dropped cached determination");
        }
        for dependent in self.dependents() {
            dependent.on_limit_invalidated(self);
        }
    }

    fn on_limit_invalidated(&self, _limit: &Gauge) {
        self.invalidate();
    }

    fn register_dependent(&self, dependent: &Gauge) {
        let mut core = self.core.borrow_mut();
        let present = core
            .dependents
            .iter()
            .any(|w| w.upgrade().is_some_and(|rc| Rc::ptr_eq(&rc, &dependent.core)));
        if !present {
            core.dependents.push(Rc::downgrade(&dependent.core));
        }
    }

    fn deregister_dependent(&self, dependent: &Gauge) {
        self.core.borrow_mut().dependents.retain(|w| {
            w.upgrade().is_some_and(|rc| !Rc::ptr_eq(&rc, &dependent.core))
        });
    }

    /// Live dependents, with dead weak entries pruned.
    fn dependents(&self) -> Vec<Gauge> {
        let mut core = self.core.borrow_mut();
        core.dependents.retain(|w| w.strong_count() > 0);
        core.dependents
            .iter()
            .filter_map(Weak::upgrade)
            .map(|core| Gauge { core })
            .collect()
    }

    /// Whether this gauge's transitive limit chain contains `target`
    /// (a gauge trivially depends on itself).
    fn depends_on(&self, target: &Gauge) -> bool {
        if Gauge::ptr_eq(self, target) {
            return true;
        }
        let (max, min) = self.limits();
        for limit in [max, min] {
            if let Limit::Gauge(l) = limit {
                if l.depends_on(target) {
                    return true;
                }
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Limits
    // ------------------------------------------------------------------

    /// Replace the upper limit.
    pub fn set_max(&self, max: impl Into<Limit>, at: Option<Seconds>) -> Result<(), GaugeError> {
        self.set_range(Some(max.into()), None, at)
    }

    /// Replace the lower limit.
    pub fn set_min(&self, min: impl Into<Limit>, at: Option<Seconds>) -> Result<(), GaugeError> {
        self.set_range(None, Some(min.into()), at)
    }

    /// Replace either or both limits at `at`.
    ///
    /// A limit gauge that transitively depends on this gauge is rejected
    /// with [`GaugeError::BadArguments`]. If the gauge is currently in
    /// range its value is clamped into the new band, and the gauge is
    /// re-anchored at `at` (pulled back to the new limit gauge's base when
    /// that lies earlier, so the trajectory is never asked for times the
    /// boundary cannot answer).
    pub fn set_range(
        &self,
        max: Option<Limit>,
        min: Option<Limit>,
        at: Option<Seconds>,
    ) -> Result<(), GaugeError> {
        let at = clock::now_or(at);
        for candidate in [&max, &min] {
            if let Some(Limit::Gauge(l)) = candidate {
                if l.depends_on(self) {
                    return Err(GaugeError::BadArguments(
                        "a limit gauge must not depend on the gauge it bounds",
                    ));
                }
            }
        }

        let was_in_range = self.in_range(Some(at));
        let mut value = self.value_at(Some(at));
        let mut forget_until = at;
        let (old_max, old_min) = {
            let mut core = self.core.borrow_mut();
            let olds = (core.max.clone(), core.min.clone());
            if let Some(limit) = max {
                if let Limit::Gauge(l) = &limit {
                    forget_until = forget_until.min(l.base().time);
                }
                core.max = limit;
            }
            if let Some(limit) = min {
                if let Limit::Gauge(l) = &limit {
                    forget_until = forget_until.min(l.base().time);
                }
                core.min = limit;
            }
            olds
        };

        // Re-sync back-references: drop the old registrations, then
        // restore one for every side still naming a gauge.
        for old in [&old_max, &old_min] {
            if let Limit::Gauge(l) = old {
                l.deregister_dependent(self);
            }
        }
        let (cur_max, cur_min) = self.limits();
        for cur in [&cur_max, &cur_min] {
            if let Limit::Gauge(l) = cur {
                l.register_dependent(self);
            }
        }

        if was_in_range {
            value = self.clamp_to_limits(value, at);
        }
        self.forget_past(Some(value), Some(forget_until));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// The value at `at` (`now` when omitted).
    ///
    /// Once the trajectory has been in range from a time at or before the
    /// sampled segment, the reading is additionally clamped to the
    /// current band so rounding can never report a value past a limit.
    pub fn value_at(&self, at: Option<Seconds>) -> f64 {
        let at = clock::now_or(at);
        let det = self.determination();
        let sample = det.sample(at);
        let mut value = sample.value;
        if let (Some(anchor), Some(since)) = (sample.anchor, det.in_range_since()) {
            if since <= anchor {
                value = self.clamp_to_limits(value, at);
            }
        }
        value
    }

    /// The velocity at `at` (`now` when omitted).
    pub fn velocity_at(&self, at: Option<Seconds>) -> f64 {
        let at = clock::now_or(at);
        self.determination().velocity_at(at)
    }

    /// The eventual value: where the trajectory comes to rest, or `±inf`
    /// when it never does.
    pub fn goal(&self) -> f64 {
        self.determination().goal()
    }

    /// Whether the value is inside the band at `at` (`now` when omitted).
    pub fn in_range(&self, at: Option<Seconds>) -> bool {
        let at = clock::now_or(at);
        self.determination().in_range(at)
    }

    /// Times at which the trajectory crosses `target`, in order. The
    /// iterator snapshots the current determination; later mutations do
    /// not change an iterator already obtained.
    pub fn whenever(&self, target: f64) -> Crossings {
        self.determination().crossings(target)
    }

    /// The `nth` (0-indexed) time the trajectory crosses `target`.
    pub fn when(&self, target: f64, nth: usize) -> Result<Seconds, GaugeError> {
        let mut count = 0;
        for time in self.whenever(target) {
            if count == nth {
                return Ok(time);
            }
            count += 1;
        }
        Err(GaugeError::Unreachable { target, count, nth })
    }

    fn clamp_to_limits(&self, value: f64, at: Seconds) -> f64 {
        value.min(self.max_at(Some(at))).max(self.min_at(Some(at)))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add `delta` to the current value under `policy`, re-anchoring the
    /// gauge at `at`. Returns the value actually stored.
    pub fn incr(
        &self,
        delta: f64,
        policy: Policy,
        at: Option<Seconds>,
    ) -> Result<f64, GaugeError> {
        let at = clock::now_or(at);
        let previous = self.value_at(Some(at));
        let mut next = previous + delta;
        let resolved = match policy {
            Policy::Once => {
                if self.in_range(Some(at)) {
                    Policy::Ok
                } else {
                    Policy::Error
                }
            }
            other => other,
        };
        match resolved {
            Policy::Error => {
                // Only the limit in the direction of travel can refuse.
                if delta > 0.0 {
                    let limit = self.max_at(Some(at));
                    if next > limit {
                        return Err(GaugeError::OutOfRange { value: next, limit });
                    }
                } else if delta < 0.0 {
                    let limit = self.min_at(Some(at));
                    if next < limit {
                        return Err(GaugeError::OutOfRange { value: next, limit });
                    }
                }
            }
            Policy::Clamp => next = self.clamp_to_limits(next, at),
            Policy::Ok | Policy::Once => {}
        }
        self.forget_past(Some(next), Some(at));
        Ok(next)
    }

    /// Subtract `delta` from the current value under `policy`.
    pub fn decr(
        &self,
        delta: f64,
        policy: Policy,
        at: Option<Seconds>,
    ) -> Result<f64, GaugeError> {
        self.incr(-delta, policy, at)
    }

    /// Set the value to `value` under `policy`.
    pub fn set(&self, value: f64, policy: Policy, at: Option<Seconds>) -> Result<f64, GaugeError> {
        let at = clock::now_or(at);
        self.incr(value - self.value_at(Some(at)), policy, Some(at))
    }

    /// Force the value into the band at `at`.
    pub fn clamp(&self, at: Option<Seconds>) -> Result<f64, GaugeError> {
        let at = clock::now_or(at);
        let clamped = self.clamp_to_limits(self.value_at(Some(at)), at);
        self.set(clamped, Policy::Ok, Some(at))
    }

    // ------------------------------------------------------------------
    // Rebase family
    // ------------------------------------------------------------------

    /// Re-anchor at `(at, value)` (current value when omitted) and drop
    /// the first `drop_before` momenta. Dependents are notified before
    /// the base moves so they re-anchor against their old view of this
    /// limit with the new value in hand.
    fn rebase(&self, value: Option<f64>, at: Seconds, drop_before: usize) {
        let value = value.unwrap_or_else(|| self.value_at(Some(at)));
        trace!(at, value, drop_before, "rebasing");
        for dependent in self.dependents() {
            dependent.on_limit_rebased(self, value, at);
        }
        {
            let mut core = self.core.borrow_mut();
            core.base = Vertex { time: at, value };
            let cut = drop_before.min(core.momenta.len());
            core.momenta.drain(..cut);
        }
        self.invalidate();
    }

    /// Forget everything before `at`: momenta that cannot affect the
    /// future from `at` are dropped and the gauge is re-anchored there.
    /// The observable trajectory from `at` on is unchanged (up to
    /// floating point).
    pub fn forget_past(&self, value: Option<f64>, at: Option<Seconds>) {
        let at = clock::now_or(at);
        let drop_before = {
            let core = self.core.borrow();
            core.momenta.iter().take_while(|m| m.until() < at).count()
        };
        self.rebase(value, at, drop_before);
    }

    /// Drop every momentum and re-anchor at `(at, value)`.
    pub fn clear_momenta(&self, value: Option<f64>, at: Option<Seconds>) {
        let at = clock::now_or(at);
        let drop_before = self.core.borrow().momenta.len();
        self.rebase(value, at, drop_before);
    }

    /// A limit of this gauge rebased itself to `limit_value` at `at`:
    /// re-anchor here too, clamped to the moved boundary if currently in
    /// range.
    fn on_limit_rebased(&self, limit: &Gauge, limit_value: f64, at: Seconds) {
        let at = at.max(self.base().time);
        let mut value = self.value_at(Some(at));
        if self.in_range(Some(at)) {
            let (max, min) = self.limits();
            if let Limit::Gauge(l) = &max {
                if Gauge::ptr_eq(l, limit) {
                    value = value.min(limit_value);
                }
            }
            if let Limit::Gauge(l) = &min {
                if Gauge::ptr_eq(l, limit) {
                    value = value.max(limit_value);
                }
            }
        }
        self.forget_past(Some(value), Some(at));
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core.try_borrow() {
            Ok(core) => f
                .debug_struct("Gauge")
                .field("base", &core.base)
                .field("momenta", &core.momenta.len())
                .field("determined", &core.determination.is_some())
                .finish(),
            Err(_) => f.write_str("Gauge { <borrowed> }"),
        }
    }
}

/// The line sequence a limit contributes: a single open horizon for a
/// constant, or the limit gauge's determination re-expressed as segments
/// with a leading pad back to `base` and a tail carrying its final slope.
fn limit_lines(limit: &Limit, base: Vertex) -> Vec<Line> {
    match limit {
        Limit::Constant(value) => vec![Line::horizon(base.time, INF, *value)],
        Limit::Gauge(gauge) => {
            let det = gauge.determination();
            let verts = det.vertices();
            let mut lines = Vec::with_capacity(verts.len() + 1);
            let first = det.first();
            if base.time < first.time {
                lines.push(Line::horizon(base.time, first.time, first.value));
            }
            for pair in verts.windows(2) {
                lines.push(Line::segment(pair[0].time, pair[1].time, pair[0].value, pair[1].value));
            }
            let last = det.last();
            if det.tail_velocity() == 0.0 {
                lines.push(Line::horizon(last.time, INF, last.value));
            } else {
                lines.push(Line::ray(last.time, INF, last.value, det.tail_velocity()));
            }
            lines
        }
    }
}
