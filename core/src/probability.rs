//! Probability and log-probability arithmetic.
//!
//! Two numeric types coexist throughout the crate:
//!
//! - [`Probability`]: a plain probability in `[0, inf)`.
//! - [`LogProbability`]: the negative natural log of a probability. Lower
//!   score means more likely, so the comparison operators are reversed
//!   relative to the raw scores.
//!
//! All lattice and model arithmetic runs in the log domain. Sums of
//! probabilities use the numerically stable `min + log1p(exp(min - max))`
//! identity, either pairwise via `+` or in bulk via
//! [`ProbabilityAccumulator`].
//!
//! Floating point near-equality is measured in units of least precision
//! (ULP), see [`difference_ulp`] and [`is_nearly_equal`].

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Sub};

/// A plain probability value.
///
/// Valid values are finite and non-negative. Values above 1 are permitted,
/// they occur transiently as weighted evidence counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Probability(f64);

impl Probability {
    pub fn new(p: f64) -> Self {
        Probability(p)
    }

    pub fn probability(self) -> f64 {
        self.0
    }

    /// The negative natural log of this probability.
    ///
    /// Zero probabilities map to the saturated `impossible` score instead of
    /// infinity.
    pub fn score(self) -> f64 {
        debug_assert!(self.0.is_finite());
        if self.0 > 0.0 {
            -self.0.ln()
        } else {
            LogProbability::impossible().score()
        }
    }

    pub fn certain() -> Self {
        Probability(1.0)
    }

    pub fn impossible() -> Self {
        Probability(0.0)
    }

    pub fn is_valid(self) -> bool {
        self.0.is_finite() && self.0 >= 0.0
    }

    pub fn complement(self) -> Self {
        debug_assert!(self.is_valid());
        Probability(1.0 - self.0)
    }

    pub fn pow(self, e: f64) -> Self {
        Probability(self.0.powf(e))
    }
}

impl From<LogProbability> for Probability {
    fn from(s: LogProbability) -> Self {
        Probability(s.probability())
    }
}

/// A probability represented by its negative natural log ("score").
///
/// `certain` is score 0, `impossible` is a very large positive sentinel and
/// the invalid marker is the most negative finite value. Multiplication and
/// division of probabilities are score addition and subtraction; `+` is the
/// log-sum-exp of the two operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogProbability(f64);

impl LogProbability {
    pub fn from_score(s: f64) -> Self {
        LogProbability(s)
    }

    pub fn score(self) -> f64 {
        self.0
    }

    pub fn probability(self) -> f64 {
        (-self.0).exp()
    }

    pub fn certain() -> Self {
        LogProbability(0.0)
    }

    /// Saturated zero probability, roughly 7e10 in score terms.
    pub fn impossible() -> Self {
        LogProbability(-1.0e8 * f64::MIN_POSITIVE.ln())
    }

    /// The stability cutoff for log-sum-exp, `-ln(machine epsilon)`.
    pub fn epsilon() -> Self {
        LogProbability(-f64::EPSILON.ln())
    }

    /// Marker for uninitialised slots, distinct from every valid score.
    pub fn invalid() -> Self {
        LogProbability(-f64::MAX)
    }

    pub fn is_valid(self) -> bool {
        self.0.is_finite() && self.0 > -f64::MAX
    }

    /// `log(1 - p)` computed without leaving the log domain.
    pub fn complement(self) -> Self {
        debug_assert!(self.is_valid());
        LogProbability(-(-self.probability()).ln_1p())
    }

    /// Scales the underlying probability by the exponent `e`.
    pub fn pow(self, e: f64) -> Self {
        LogProbability(self.0 * e)
    }
}

/// Default-constructed slots hold a harmless out-of-band score, the same
/// convention the side maps rely on before synchronisation.
impl Default for LogProbability {
    fn default() -> Self {
        LogProbability(f64::MAX)
    }
}

impl From<Probability> for LogProbability {
    fn from(p: Probability) -> Self {
        LogProbability(p.score())
    }
}

/// Reversed with respect to raw scores: a smaller score is a greater
/// probability.
impl PartialOrd for LogProbability {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        other.0.partial_cmp(&self.0)
    }
}

/// Log-sum-exp of the two operands.
impl Add for LogProbability {
    type Output = LogProbability;

    fn add(self, o: LogProbability) -> LogProbability {
        debug_assert!(self.is_valid());
        debug_assert!(o.is_valid());
        // lo is the smaller score, i.e. the more likely operand
        let (lo, hi) = if self.0 > o.0 {
            (o.0, self.0)
        } else {
            (self.0, o.0)
        };
        if hi - lo < LogProbability::epsilon().0 {
            LogProbability(lo - (lo - hi).exp().ln_1p())
        } else {
            LogProbability(lo)
        }
    }
}

impl AddAssign for LogProbability {
    fn add_assign(&mut self, o: LogProbability) {
        *self = *self + o;
    }
}

/// Difference of the underlying probabilities. Only defined when `self` is
/// the more likely operand (`self.score() <= rhs.score()`).
impl Sub for LogProbability {
    type Output = LogProbability;

    fn sub(self, o: LogProbability) -> LogProbability {
        debug_assert!(self.is_valid());
        debug_assert!(o.is_valid());
        debug_assert!(self.0 <= o.0);
        if o.0 - self.0 > -(1.0 - f64::EPSILON).ln() {
            LogProbability(self.0 - (-(self.0 - o.0).exp()).ln_1p())
        } else {
            LogProbability(self.0)
        }
    }
}

impl Mul for LogProbability {
    type Output = LogProbability;

    fn mul(self, o: LogProbability) -> LogProbability {
        debug_assert!(self.is_valid());
        debug_assert!(o.is_valid());
        LogProbability(self.0 + o.0)
    }
}

impl MulAssign for LogProbability {
    fn mul_assign(&mut self, o: LogProbability) {
        debug_assert!(self.is_valid());
        debug_assert!(o.is_valid());
        self.0 += o.0;
    }
}

impl Div for LogProbability {
    type Output = LogProbability;

    fn div(self, o: LogProbability) -> LogProbability {
        debug_assert!(self.is_valid());
        debug_assert!(o.is_valid());
        LogProbability(self.0 - o.0)
    }
}

impl DivAssign for LogProbability {
    fn div_assign(&mut self, o: LogProbability) {
        debug_assert!(self.is_valid());
        debug_assert!(o.is_valid());
        self.0 -= o.0;
    }
}

/// Bulk log-sum-exp.
///
/// Keeps the currently best (smallest) score as the pivot and a vector of
/// the remaining scores; [`ProbabilityAccumulator::sum`] evaluates
/// `min - log1p(sum exp(min - s_i))` in one pass. Terms further than the
/// stability cutoff from the pivot contribute nothing and are skipped.
#[derive(Debug, Clone)]
pub struct ProbabilityAccumulator {
    min: f64,
    terms: Vec<f64>,
}

impl ProbabilityAccumulator {
    pub fn new() -> Self {
        ProbabilityAccumulator {
            min: LogProbability::impossible().score(),
            terms: Vec::new(),
        }
    }

    pub fn add(&mut self, s: LogProbability) {
        debug_assert!(s.is_valid());
        if self.min > s.score() {
            self.terms.push(self.min);
            self.min = s.score();
        } else {
            self.terms.push(s.score());
        }
    }

    pub fn clear(&mut self) {
        self.terms.clear();
        self.min = LogProbability::impossible().score();
    }

    pub fn sum(&self) -> LogProbability {
        let mut s = 0.0;
        for &t in &self.terms {
            if t - self.min < LogProbability::epsilon().score() {
                s += (self.min - t).exp();
            }
        }
        LogProbability::from_score(self.min - s.ln_1p())
    }
}

impl Default for ProbabilityAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of representable f64 values between `a` and `b`.
///
/// Bit patterns are remapped two's-complement style so that the integer
/// distance is monotone across the sign boundary.
pub fn difference_ulp(a: f64, b: f64) -> u64 {
    fn ordered(x: f64) -> i64 {
        let i = x.to_bits() as i64;
        if i < 0 {
            i64::MIN.wrapping_sub(i)
        } else {
            i
        }
    }
    let d = (ordered(a) as i128 - ordered(b) as i128).unsigned_abs();
    u64::try_from(d).unwrap_or(u64::MAX)
}

/// Near-equality with the tolerance given in ULPs.
pub fn is_nearly_equal(a: f64, b: f64, tolerance: u64) -> bool {
    difference_ulp(a, b) <= tolerance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_and_probability_round_trip() {
        let p = Probability::new(0.25);
        let s = LogProbability::from(p);
        assert!((s.score() - 0.25f64.ln().abs()).abs() < 1e-12);
        assert!((s.probability() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn ordering_is_reversed() {
        let likely = LogProbability::from_score(0.5);
        let unlikely = LogProbability::from_score(2.0);
        assert!(likely > unlikely);
        assert!(unlikely < likely);
        assert!(LogProbability::certain() > LogProbability::impossible());
    }

    #[test]
    fn sentinels() {
        assert!(LogProbability::impossible().score() > 7.0e10);
        assert!(!LogProbability::invalid().is_valid());
        assert!(LogProbability::impossible().is_valid());
        assert!((LogProbability::epsilon().score() - 36.04).abs() < 0.01);
    }

    #[test]
    fn add_is_log_sum_exp() {
        let a = LogProbability::from(Probability::new(0.25));
        let b = LogProbability::from(Probability::new(0.5));
        let sum = a + b;
        assert!(is_nearly_equal(sum.probability(), 0.75, 100));
    }

    #[test]
    fn add_with_huge_magnitude_gap_keeps_the_likely_operand() {
        let a = LogProbability::from_score(1.0);
        let b = LogProbability::from_score(500.0);
        assert_eq!((a + b).score(), 1.0);
        assert_eq!((b + a).score(), 1.0);
    }

    #[test]
    fn sub_removes_probability_mass() {
        let a = LogProbability::from(Probability::new(0.75));
        let b = LogProbability::from(Probability::new(0.25));
        let d = a - b;
        assert!(is_nearly_equal(d.probability(), 0.5, 100));
    }

    #[test]
    fn mul_and_div_are_score_addition_and_subtraction() {
        let a = LogProbability::from_score(1.5);
        let b = LogProbability::from_score(0.5);
        assert_eq!((a * b).score(), 2.0);
        assert_eq!((a / b).score(), 1.0);
    }

    #[test]
    fn complement_of_a_quarter() {
        let a = LogProbability::from(Probability::new(0.25));
        assert!(is_nearly_equal(a.complement().probability(), 0.75, 100));
    }

    #[test]
    fn accumulator_matches_direct_sum_within_100_ulps() {
        let probs = [0.125, 0.0625, 0.25, 1e-12, 0.03125, 0.2];
        let mut accu = ProbabilityAccumulator::new();
        let mut direct = 0.0;
        for &p in &probs {
            accu.add(LogProbability::from(Probability::new(p)));
            direct += p;
        }
        let sum = accu.sum();
        assert!(is_nearly_equal(sum.score(), -direct.ln(), 100));
    }

    #[test]
    fn accumulator_clear_resets_to_impossible() {
        let mut accu = ProbabilityAccumulator::new();
        accu.add(LogProbability::certain());
        accu.clear();
        assert_eq!(accu.sum().score(), LogProbability::impossible().score());
    }

    #[test]
    fn ulp_distance_of_adjacent_values_is_one() {
        let a = 1.0f64;
        let b = f64::from_bits(a.to_bits() + 1);
        assert_eq!(difference_ulp(a, b), 1);
        assert!(is_nearly_equal(a, b, 1));
        assert!(!is_nearly_equal(1.0, 1.0 + 1e-9, 100));
    }

    #[test]
    fn ulp_distance_crosses_the_sign_boundary() {
        let tiny = f64::from_bits(1);
        assert_eq!(difference_ulp(tiny, -tiny), 2);
    }
}
