//! Determination: the computed trajectory and its engine
//!
//! A [`Determination`] is the piecewise-linear trajectory of a gauge from
//! its base onward: an ordered vertex sequence, the time from which the
//! value has been inside the limit band (`in_range_since`), and the
//! velocity in force after the last vertex (`tail_velocity`). Vertices are
//! always finite; an unbounded climb is represented by a non-zero tail
//! rather than a vertex at infinity, which would poison every later
//! interpolation with NaN.
//!
//! The engine walks the momentum event stream in time order while tracking
//! the boundary regime:
//!
//! - *free*: no limit involved, the slope is the plain momentum sum;
//! - *bounded*: the value sits beyond a limit, only momenta pushing back
//!   toward the band contribute;
//! - *overlapped*: the value is pinned to a limit whose own slope caps
//!   the movement until the free slope diverges away from it.
//!
//! Between events the engine looks for intersections of the current ray
//! with the active boundary lines, switching regimes where they cross. A
//! final safety net catches crossings that finite precision hid from the
//! intersection test.

use std::rc::Rc;

use tracing::trace;

use crate::boundary::{Boundary, Side};
use crate::line::Line;
use crate::momentum::{Event, EventKind};
use crate::{Seconds, INF};

/// One corner of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// Time of the corner.
    pub time: Seconds,
    /// Value at the corner.
    pub value: f64,
}

/// A raw (unclamped) reading off a determination.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sample {
    pub value: f64,
    pub velocity: f64,
    /// Time of the vertex anchoring the containing segment; `None` when
    /// the query precedes the trajectory.
    pub anchor: Option<Seconds>,
}

/// The computed trajectory of a gauge.
#[derive(Debug, Clone, PartialEq)]
pub struct Determination {
    vertices: Vec<Vertex>,
    in_range_since: Option<Seconds>,
    tail_velocity: f64,
}

impl Determination {
    fn empty() -> Self {
        Self { vertices: Vec::new(), in_range_since: None, tail_velocity: 0.0 }
    }

    /// Append a vertex. A repeat of the last vertex's time is a no-op;
    /// `in_range_since` latches the first in-range time and is never
    /// revised.
    fn push(&mut self, time: Seconds, value: f64, in_range: bool) {
        if let Some(last) = self.vertices.last() {
            if last.time == time {
                return;
            }
        }
        if in_range && self.in_range_since.is_none() {
            self.in_range_since = Some(time);
        }
        self.vertices.push(Vertex { time, value });
    }

    /// The trajectory corners in strictly increasing time order.
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// First corner; every determination has at least one.
    pub fn first(&self) -> Vertex {
        self.vertices[0]
    }

    /// Last corner.
    pub fn last(&self) -> Vertex {
        *self.vertices.last().expect("a determination has at least one vertex")
    }

    /// Earliest time from which the value was inside the limit band, if
    /// it ever was.
    pub fn in_range_since(&self) -> Option<Seconds> {
        self.in_range_since
    }

    /// The slope in force after the last corner. Zero for trajectories
    /// that come to rest.
    pub fn tail_velocity(&self) -> f64 {
        self.tail_velocity
    }

    /// Whether the value is inside the limit band at `at`.
    pub fn in_range(&self, at: Seconds) -> bool {
        self.in_range_since.is_some_and(|since| since <= at)
    }

    /// Raw value/velocity reading at `at`, without limit clamping.
    pub(crate) fn sample(&self, at: Seconds) -> Sample {
        let verts = &self.vertices;
        let x = verts.partition_point(|v| v.time <= at);
        if x == 0 {
            // Before the trajectory begins the base value holds still.
            return Sample { value: verts[0].value, velocity: 0.0, anchor: None };
        }
        if x == verts.len() {
            let last = self.last();
            let value = if self.tail_velocity == 0.0 {
                last.value
            } else {
                last.value + self.tail_velocity * (at - last.time)
            };
            return Sample { value, velocity: self.tail_velocity, anchor: Some(last.time) };
        }
        let a = verts[x - 1];
        let b = verts[x];
        let velocity = (b.value - a.value) / (b.time - a.time);
        Sample { value: a.value + velocity * (at - a.time), velocity, anchor: Some(a.time) }
    }

    /// Value at `at` without limit clamping.
    pub fn value_at(&self, at: Seconds) -> f64 {
        self.sample(at).value
    }

    /// Velocity at `at`.
    pub fn velocity_at(&self, at: Seconds) -> f64 {
        self.sample(at).velocity
    }

    /// The eventual value: the resting value for trajectories that stop,
    /// `±inf` for trajectories with a non-zero tail.
    pub fn goal(&self) -> f64 {
        if self.tail_velocity > 0.0 {
            INF
        } else if self.tail_velocity < 0.0 {
            -INF
        } else {
            self.last().value
        }
    }

    /// Times at which the trajectory crosses `target`, in order.
    pub(crate) fn crossings(self: Rc<Self>, target: f64) -> Crossings {
        Crossings {
            det: self,
            target,
            checked_start: false,
            pair: 0,
            tail_checked: false,
        }
    }
}

/// Lazy iterator over the times a determination crosses a target value.
///
/// Each segment contributes at most one crossing, counted half-open at
/// the segment start so a corner sitting exactly on the target is
/// reported once. The iterator snapshots the determination it was built
/// from; later gauge mutations do not retroactively change it.
pub struct Crossings {
    det: Rc<Determination>,
    target: f64,
    checked_start: bool,
    pair: usize,
    tail_checked: bool,
}

impl Iterator for Crossings {
    type Item = Seconds;

    fn next(&mut self) -> Option<Seconds> {
        let verts = self.det.vertices();
        if !self.checked_start {
            self.checked_start = true;
            if verts[0].value == self.target {
                return Some(verts[0].time);
            }
        }
        while self.pair + 1 < verts.len() {
            let (a, b) = (verts[self.pair], verts[self.pair + 1]);
            self.pair += 1;
            let rising = a.value < self.target && self.target <= b.value;
            let falling = a.value > self.target && self.target >= b.value;
            if rising || falling {
                let ratio = (self.target - a.value) / (b.value - a.value);
                return Some(a.time + ratio * (b.time - a.time));
            }
        }
        if !self.tail_checked {
            self.tail_checked = true;
            let tail = self.det.tail_velocity();
            let last = self.det.last();
            if (tail > 0.0 && last.value < self.target)
                || (tail < 0.0 && last.value > self.target)
            {
                return Some(last.time + (self.target - last.value) / tail);
            }
        }
        None
    }
}

fn walker<'a>(ceil: &'a Boundary, floor: &'a Boundary, side: Side) -> &'a Boundary {
    match side {
        Side::Ceiling => ceil,
        Side::Floor => floor,
    }
}

/// Build the determination for `base` under `events` and the two limit
/// trajectories. Total: always returns a finite vertex sequence.
pub(crate) fn determinate(
    base: Vertex,
    events: &[Event],
    ceil_lines: Vec<Line>,
    floor_lines: Vec<Line>,
) -> Determination {
    let mut det = Determination::empty();
    let mut since = base.time;
    let mut value = base.value;
    let mut velocity = 0.0_f64;
    let mut velocities: Vec<f64> = Vec::new();

    let mut ceil = Boundary::new(ceil_lines, Side::Ceiling);
    let mut floor = Boundary::new(floor_lines, Side::Floor);

    // `bound` names the walker the trajectory is pinned beyond or onto;
    // `overlapped` distinguishes riding the limit from sitting beyond it.
    let mut bound: Option<Side> = None;
    let mut overlapped = false;

    // Skip boundary lines that end before the base, then check whether
    // the base value already sits beyond a limit. The first violated
    // walker wins.
    for (side, b) in [(Side::Ceiling, &mut ceil), (Side::Floor, &mut floor)] {
        while b.line().until() <= since {
            b.step();
        }
        if bound.is_none() && b.cmp(b.line().guess(since), value) {
            bound = Some(side);
            overlapped = false;
            trace!(side = ?side, value, "base starts beyond a limit");
        }
    }

    'events: for ev in events {
        let until = ev.time.max(base.time);
        let mut again = true;
        let mut walked: Vec<Side> = Vec::with_capacity(2);
        while since < until {
            if again {
                again = false;
                walked.clear();
                match bound {
                    Some(side) => walked.push(side),
                    None => walked.extend([Side::Ceiling, Side::Floor]),
                }
            } else {
                // Advance whichever boundary ends soonest; once both
                // reach the event horizon this span is fully determined.
                if ceil.line().until() >= until && floor.line().until() >= until {
                    break;
                }
                let side = if ceil.line().until() <= floor.line().until() {
                    Side::Ceiling
                } else {
                    Side::Floor
                };
                match side {
                    Side::Ceiling => ceil.step(),
                    Side::Floor => floor.step(),
                }
                walked.clear();
                walked.push(side);
            }

            // Effective velocity under the current regime.
            velocity = match bound {
                None => velocities.iter().sum(),
                Some(side) if overlapped => {
                    let b = walker(&ceil, &floor, side);
                    b.best(velocities.iter().sum(), b.line().velocity())
                }
                Some(side) => {
                    // Beyond the limit only momenta that push back toward
                    // the band move the value.
                    let b = walker(&ceil, &floor, side);
                    velocities.iter().filter(|&&v| b.cmp(v, 0.0)).sum()
                }
            };

            // Release: the free slope diverges off the limit into the band.
            if overlapped {
                let side = bound.expect("overlapped implies a bound side");
                let b = walker(&ceil, &floor, side);
                if b.cmp(velocity, b.line().velocity()) {
                    trace!(time = since, side = ?side, "released from limit");
                    bound = None;
                    overlapped = false;
                    again = true;
                    continue;
                }
            }

            let line = Line::ray(since, until, value, velocity);

            if overlapped {
                let side = bound.expect("overlapped implies a bound side");
                let b = walker(&ceil, &floor, side);
                let bound_until = b.line().until().min(until);
                if bound_until == INF {
                    break;
                }
                // Ride the limit to the end of its current line.
                since = bound_until;
                value = b.line().value_at(bound_until);
                det.push(since, value, true);
                continue;
            }

            // Look for a crossing with each candidate boundary line.
            let mut pinned = false;
            for &side in &walked {
                let b = walker(&ceil, &floor, side);
                let Some((t, v)) = line.intersect(b.line()) else {
                    continue;
                };
                if t <= since {
                    continue;
                }
                trace!(time = t, value = v, side = ?side, "pinned to limit");
                bound = Some(side);
                overlapped = true;
                since = t;
                // Rounding must not leave the value on the wrong side.
                value = b.best(v, b.line().guess(t));
                det.push(since, value, true);
                again = true;
                pinned = true;
                break;
            }
            if pinned {
                continue;
            }

            // Safety net: a crossing the intersection test lost to
            // rounding still must not leak through the boundary.
            if bound.is_none() {
                for &side in &walked {
                    let b = walker(&ceil, &floor, side);
                    let bound_until = b.line().until().min(until);
                    if bound_until == INF || bound_until < since {
                        continue;
                    }
                    let boundary_value = b.line().value_at(bound_until);
                    if b.cmp_inv(line.value_at(bound_until), boundary_value) {
                        trace!(time = bound_until, side = ?side, "clamped an undetected crossing");
                        bound = Some(side);
                        overlapped = true;
                        since = bound_until;
                        value = boundary_value;
                        det.push(since, value, true);
                        break;
                    }
                }
            }
        }

        if until == INF {
            break 'events;
        }
        value += velocity * (until - since);
        det.push(until, value, bound.is_none() || overlapped);
        match (ev.kind, ev.momentum) {
            (EventKind::Add, Some(m)) => velocities.push(m.velocity()),
            (EventKind::Remove, Some(m)) => {
                let pos = velocities
                    .iter()
                    .position(|v| v.to_bits() == m.velocity().to_bits());
                debug_assert!(pos.is_some(), "removing a velocity that was never added");
                if let Some(pos) = pos {
                    velocities.remove(pos);
                }
            }
            _ => {}
        }
        since = until;
    }

    det.tail_velocity = velocity;
    det
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::momentum::Momentum;

    fn stream(base: Seconds, momenta: &[Momentum]) -> Vec<Event> {
        let mut events = Vec::new();
        for &m in momenta {
            events.push(Event::add(m));
            if m.until() < INF {
                events.push(Event::remove(m));
            }
        }
        events.sort_by(Event::order);
        let mut out = vec![Event::sentinel(base)];
        out.extend(events);
        out.push(Event::sentinel(INF));
        out
    }

    fn constant_band(base: Seconds, max: f64, min: f64) -> (Vec<Line>, Vec<Line>) {
        (
            vec![Line::horizon(base, INF, max)],
            vec![Line::horizon(base, INF, min)],
        )
    }

    fn times(det: &Determination) -> Vec<Seconds> {
        det.vertices().iter().map(|v| v.time).collect()
    }

    fn values(det: &Determination) -> Vec<f64> {
        det.vertices().iter().map(|v| v.value).collect()
    }

    #[test]
    fn free_rise_pins_to_the_ceiling() {
        let base = Vertex { time: 0.0, value: 0.0 };
        let (ceil, floor) = constant_band(0.0, 10.0, 0.0);
        let det = determinate(base, &stream(0.0, &[Momentum::forever(1.0)]), ceil, floor);
        assert_eq!(times(&det), vec![0.0, 10.0]);
        assert_eq!(values(&det), vec![0.0, 10.0]);
        assert_eq!(det.tail_velocity(), 0.0);
        assert_eq!(det.in_range_since(), Some(0.0));
        assert_eq!(det.value_at(5.0), 5.0);
        assert_eq!(det.value_at(100.0), 10.0);
    }

    #[test]
    fn expiring_momenta_fold_into_corners() {
        let base = Vertex { time: 0.0, value: 0.0 };
        let (ceil, floor) = constant_band(0.0, 10.0, 0.0);
        let momenta = [
            Momentum::new(2.0, 0.0, 3.0).unwrap(),
            Momentum::new(-1.0, 2.0, 6.0).unwrap(),
        ];
        let det = determinate(base, &stream(0.0, &momenta), ceil, floor);
        // +2 alone on [0,2), +2-1 on [2,3), -1 alone on [3,6), rest after.
        assert_eq!(times(&det), vec![0.0, 2.0, 3.0, 6.0]);
        assert_eq!(values(&det), vec![0.0, 4.0, 5.0, 2.0]);
        assert_eq!(det.tail_velocity(), 0.0);
        assert_eq!(det.value_at(4.0), 4.0);
        assert_eq!(det.value_at(9.0), 2.0);
    }

    #[test]
    fn unbounded_trajectory_keeps_a_tail() {
        let base = Vertex { time: 0.0, value: 10.0 };
        let (ceil, floor) = constant_band(0.0, INF, 0.0);
        let det = determinate(base, &stream(0.0, &[Momentum::forever(1.0)]), ceil, floor);
        assert_eq!(times(&det), vec![0.0]);
        assert_eq!(det.tail_velocity(), 1.0);
        assert_eq!(det.value_at(5.0), 15.0);
        assert_eq!(det.velocity_at(5.0), 1.0);
        assert_eq!(det.goal(), INF);
    }

    #[test]
    fn rides_a_moving_ceiling() {
        // The ceiling starts at 10 and rises at 1; the gauge rises at 2,
        // catches it at t=10, then is capped to the ceiling's slope.
        let base = Vertex { time: 0.0, value: 0.0 };
        let ceil = vec![Line::ray(0.0, INF, 10.0, 1.0)];
        let floor = vec![Line::horizon(0.0, INF, 0.0)];
        let det = determinate(base, &stream(0.0, &[Momentum::forever(2.0)]), ceil, floor);
        assert_eq!(times(&det), vec![0.0, 10.0]);
        assert_eq!(values(&det), vec![0.0, 20.0]);
        assert_eq!(det.tail_velocity(), 1.0);
        assert_eq!(det.value_at(20.0), 30.0);
    }

    #[test]
    fn base_beyond_the_ceiling_descends_into_the_band() {
        let base = Vertex { time: 0.0, value: 50.0 };
        let (ceil, floor) = constant_band(0.0, 10.0, 0.0);
        let det = determinate(base, &stream(0.0, &[Momentum::forever(-1.0)]), ceil, floor);
        assert_eq!(times(&det), vec![0.0, 40.0, 50.0]);
        assert_eq!(values(&det), vec![50.0, 10.0, 0.0]);
        // Out of range until the trajectory re-enters the band at t=40.
        assert_eq!(det.in_range_since(), Some(40.0));
        assert_eq!(det.tail_velocity(), 0.0);
    }

    #[test]
    fn base_beyond_the_ceiling_ignores_outward_momenta() {
        let base = Vertex { time: 0.0, value: 50.0 };
        let (ceil, floor) = constant_band(0.0, 10.0, 0.0);
        let det = determinate(base, &stream(0.0, &[Momentum::forever(5.0)]), ceil, floor);
        // An upward momentum cannot push further out; the value holds.
        assert_eq!(times(&det), vec![0.0]);
        assert_eq!(det.value_at(100.0), 50.0);
        assert_eq!(det.in_range_since(), None);
        assert_eq!(det.tail_velocity(), 0.0);
    }

    #[test]
    fn release_happens_when_the_free_slope_diverges() {
        // Pinned at the ceiling while +2 is alive; once it expires the
        // remaining -1 peels the value off the limit.
        let base = Vertex { time: 0.0, value: 8.0 };
        let (ceil, floor) = constant_band(0.0, 10.0, 0.0);
        let momenta = [
            Momentum::new(2.0, 0.0, 5.0).unwrap(),
            Momentum::forever(-1.0),
        ];
        let det = determinate(base, &stream(0.0, &momenta), ceil, floor);
        // +1 net until the ceiling at t=2, ride until t=5, then -1 down
        // to the floor at t=15.
        assert_eq!(times(&det), vec![0.0, 2.0, 5.0, 15.0]);
        assert_eq!(values(&det), vec![8.0, 10.0, 10.0, 0.0]);
        assert_eq!(det.tail_velocity(), 0.0);
    }

    #[test]
    fn moving_ceiling_with_corners_is_followed_line_by_line() {
        // Ceiling: flat 10 until t=2, down to 6 at t=4, flat after. The
        // gauge is pinned from t=1 and must ride every piece.
        let base = Vertex { time: 0.0, value: 9.0 };
        let ceil = vec![
            Line::horizon(0.0, 2.0, 10.0),
            Line::segment(2.0, 4.0, 10.0, 6.0),
            Line::horizon(4.0, INF, 6.0),
        ];
        let floor = vec![Line::horizon(0.0, INF, 0.0)];
        let det = determinate(base, &stream(0.0, &[Momentum::forever(1.0)]), ceil, floor);
        assert_eq!(times(&det), vec![0.0, 1.0, 2.0, 4.0]);
        assert_eq!(values(&det), vec![9.0, 10.0, 10.0, 6.0]);
        // Still pinned on the final flat piece.
        assert_eq!(det.tail_velocity(), 0.0);
        assert_eq!(det.value_at(3.0), 8.0);
    }

    #[test]
    fn crossings_walk_a_zigzag() {
        let base = Vertex { time: 0.0, value: 0.0 };
        let (ceil, floor) = constant_band(0.0, 10.0, 0.0);
        let momenta = [
            Momentum::new(1.0, 0.0, 2.0).unwrap(),
            Momentum::new(-1.0, 2.0, 4.0).unwrap(),
        ];
        let det = Rc::new(determinate(base, &stream(0.0, &momenta), ceil, floor));
        let hits: Vec<_> = Rc::clone(&det).crossings(0.5).collect();
        assert_eq!(hits, vec![0.5, 3.5]);
        // The start vertex itself counts when it sits on the target.
        let zero_hits: Vec<_> = det.crossings(0.0).take(2).collect();
        assert_eq!(zero_hits[0], 0.0);
    }

    #[test]
    fn crossings_reach_into_the_tail() {
        let base = Vertex { time: 0.0, value: 0.0 };
        let (ceil, floor) = constant_band(0.0, INF, 0.0);
        let det = Rc::new(determinate(
            base,
            &stream(0.0, &[Momentum::forever(2.0)]),
            ceil,
            floor,
        ));
        let hits: Vec<_> = det.crossings(10.0).collect();
        assert_eq!(hits, vec![5.0]);
    }

    #[test]
    fn sample_before_the_base_holds_still() {
        let base = Vertex { time: 5.0, value: 3.0 };
        let (ceil, floor) = constant_band(5.0, 10.0, 0.0);
        let det = determinate(base, &stream(5.0, &[Momentum::forever(1.0)]), ceil, floor);
        assert_eq!(det.value_at(0.0), 3.0);
        assert_eq!(det.velocity_at(0.0), 0.0);
    }
}
