//! Boundary walkers
//!
//! A [`Boundary`] walks the ordered line sequence that forms one limit's
//! trajectory. The two sides differ only in their comparison direction:
//! a ceiling is violated when a candidate is *above* it (`cmp` is `<`,
//! "the boundary is below the candidate"), a floor when below (`cmp` is
//! `>`). `best` picks the admissible one of two candidates: the lower for
//! a ceiling, the higher for a floor.

use crate::line::Line;

/// Which side of the band a walker guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    /// The upper limit; `cmp` is `<` and `best` is `min`.
    Ceiling,
    /// The lower limit; `cmp` is `>` and `best` is `max`.
    Floor,
}

/// Iterator-with-state over one limit's line sequence.
#[derive(Debug)]
pub(crate) struct Boundary {
    lines: std::vec::IntoIter<Line>,
    line: Line,
    side: Side,
}

impl Boundary {
    /// Start walking `lines`, which must be non-empty and contiguous in
    /// time; the final line is expected to be open-ended.
    pub fn new(lines: Vec<Line>, side: Side) -> Self {
        let mut lines = lines.into_iter();
        let line = lines.next().expect("a limit trajectory has at least one line");
        Self { lines, line, side }
    }

    /// The line currently under the cursor.
    #[inline]
    pub fn line(&self) -> &Line {
        &self.line
    }

    /// Advance to the next line. The engine only steps past lines that
    /// end before the horizon of interest, so running dry is a bug.
    pub fn step(&mut self) {
        self.line = self
            .lines
            .next()
            .expect("stepped past the end of a limit trajectory");
    }

    /// `x < y` for a ceiling, `x > y` for a floor: "x is on the forbidden
    /// side of y".
    #[inline]
    pub fn cmp(&self, x: f64, y: f64) -> bool {
        match self.side {
            Side::Ceiling => x < y,
            Side::Floor => x > y,
        }
    }

    /// `cmp` or equal.
    #[inline]
    pub fn cmp_eq(&self, x: f64, y: f64) -> bool {
        x == y || self.cmp(x, y)
    }

    /// Strictly the opposite side of `cmp`.
    #[inline]
    pub fn cmp_inv(&self, x: f64, y: f64) -> bool {
        x != y && !self.cmp(x, y)
    }

    /// The admissible one of two candidates: `min` under a ceiling, `max`
    /// over a floor.
    #[inline]
    pub fn best(&self, x: f64, y: f64) -> f64 {
        match self.side {
            Side::Ceiling => x.min(y),
            Side::Floor => x.max(y),
        }
    }
}
