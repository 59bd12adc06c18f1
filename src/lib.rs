//! Crate root: public surface, core aliases, and crate-wide invariants
//!
//! A *gauge* is a scalar that evolves continuously over time under zero or
//! more *momenta* (time-bounded constant velocities) while being clamped by
//! an upper and a lower *limit*. A limit is either a constant or another
//! gauge, so boundaries are piecewise-linear functions of time that can
//! themselves move. Everything observable about a gauge derives from its
//! *determination*: the deterministic piecewise-linear trajectory computed
//! from the base, the momenta, and the limit trajectories.
//!
//! ## Invariants
//!
//! - **Determinism.** A determination is a pure function of
//!   `(base, momenta, limit trajectories)`. Identical inputs produce
//!   identical vertex sequences; no wall-clock reads happen inside the
//!   engine. The clock seam in [`clock`] is consulted only when a caller
//!   omits an explicit `at`.
//! - **Laziness.** Determinations are computed on first query and cached.
//!   Every mutation clears the cache and transitively invalidates every
//!   gauge that uses this one as a limit, so a stale trajectory is never
//!   observable.
//! - **Acyclic limits.** Installing a limit that transitively depends on
//!   the gauge being configured is rejected with
//!   [`GaugeError::BadArguments`]. This keeps both the semantics and the
//!   reference graph (strong limit references, weak back-references) free
//!   of cycles.
//! - **Totality.** Determination construction always succeeds and yields a
//!   finite vertex sequence plus a tail velocity; failures surface only at
//!   the mutation and query call sites as precise [`GaugeError`] values.
//!
//! Times and values are IEEE-754 `f64`; `±∞` are meaningful inputs (eternal
//! momenta, unbounded limits). Cross-platform floating-point determinism is
//! not guaranteed beyond IEEE-754 arithmetic itself.
//!
//! ```
//! use gauge::{Gauge, Momentum, Policy};
//!
//! // An energy meter: starts at 2, recharges 1 unit/s, capped at 10.
//! let energy = Gauge::new(2.0, 10.0, 0.0, Some(0.0));
//! energy.add_momentum(Momentum::forever(1.0));
//! assert_eq!(energy.value_at(Some(3.0)), 5.0);
//! assert_eq!(energy.value_at(Some(60.0)), 10.0);
//! assert_eq!(energy.when(10.0, 0).unwrap(), 8.0);
//!
//! // Spend 4 now; the trajectory re-derives from the new base.
//! energy.decr(4.0, Policy::Error, Some(3.0)).unwrap();
//! assert_eq!(energy.value_at(Some(3.0)), 1.0);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms)]

/// Boundary walkers over one limit's ordered line sequence.
mod boundary;
/// The `now()` seam: clock trait, system/manual clocks, thread-local override.
pub mod clock;
/// Determination: the computed trajectory, its queries, and the engine.
pub mod determination;
/// Shared error categories for the whole crate.
mod error;
/// The gauge entity: base, momenta, limits, cache, dependents.
pub mod gauge;
/// Line primitives (horizon, ray, segment).
pub mod line;
/// Momentum records and the ordered event stream.
pub mod momentum;
/// Persistence seam: serde snapshot types and reconstruction.
pub mod snapshot;

/// Seconds on the gauge time axis. Wall-clock seconds when the system
/// clock is in effect, but any monotone `f64` axis works.
pub type Seconds = f64;

/// Positive infinity, the open end of eternal momenta and unbounded limits.
pub const INF: Seconds = f64::INFINITY;

pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::determination::{Crossings, Determination, Vertex};
pub use crate::error::GaugeError;
pub use crate::gauge::{Gauge, Limit, Policy};
pub use crate::momentum::{EventKind, Momentum};
pub use crate::snapshot::{LimitSnapshot, Snapshot};
