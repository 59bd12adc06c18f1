//! Shared error categories
//!
//! Every caller-visible failure in the crate is a [`GaugeError`]. The
//! determination engine itself is total and never fails; errors surface at
//! the mutation and query call sites. Internal invariant violations (a
//! boundary trajectory running dry, a momentum velocity missing from the
//! working set) are bugs and are guarded by assertions instead.

use crate::Seconds;

/// Failures signalled by gauge mutations and queries.
#[derive(Debug, thiserror::Error)]
pub enum GaugeError {
    /// A mutation would move the value past a limit it is not allowed to
    /// cross under the active [`Policy`](crate::Policy).
    #[error("value {value} is out of range (crossed limit {limit})")]
    OutOfRange {
        /// The value the mutation would have produced.
        value: f64,
        /// The limit the value would have crossed.
        limit: f64,
    },

    /// A momentum lifetime is empty: `since >= until` with neither end
    /// infinite.
    #[error("invalid momentum lifetime: since {since} >= until {until}")]
    InvalidMomentum {
        /// Requested start of the lifetime.
        since: Seconds,
        /// Requested end of the lifetime.
        until: Seconds,
    },

    /// `remove_momentum` was asked to remove a momentum the gauge does not
    /// hold.
    #[error("momentum is not a member of this gauge")]
    NotFound,

    /// `when` asked for a crossing the trajectory does not make.
    #[error("{}", unreachable_message(.target, .count, .nth))]
    Unreachable {
        /// The value whose crossing was requested.
        target: f64,
        /// How many times the trajectory actually crosses it.
        count: usize,
        /// The 0-indexed crossing that was requested.
        nth: usize,
    },

    /// Structurally invalid wiring: a cyclic limit installation, or a
    /// snapshot that names a limit gauge the caller did not supply.
    #[error("{0}")]
    BadArguments(&'static str),
}

fn unreachable_message(target: &f64, count: &usize, nth: &usize) -> String {
    if *count == 0 {
        format!("gauge never reaches {target}")
    } else {
        format!(
            "gauge reaches {target} only {count} time(s), crossing #{nth} was requested"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_distinguishes_never_from_too_few() {
        let never = GaugeError::Unreachable { target: 11.0, count: 0, nth: 0 };
        assert!(never.to_string().contains("never reaches 11"));

        let few = GaugeError::Unreachable { target: 5.0, count: 2, nth: 4 };
        let msg = few.to_string();
        assert!(msg.contains("only 2 time(s)"));
        assert!(msg.contains("#4"));
    }
}
