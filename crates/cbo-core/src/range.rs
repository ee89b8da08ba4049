//! # Value Ranges
//!
//! A [`ValueRange`] summarizes the values of one column as a closed interval on the
//! double line plus an estimated number of distinct values inside it. Bounds may be
//! infinite (open-ended column), and the canonical *empty* range is
//! `(NaN, NaN, 0)`.
//!
//! ## NaN handling
//! Unknown quantities are NaN and propagate through arithmetic. `f64::max` and
//! `f64::min` silently drop a NaN operand, which would turn "unknown" into a
//! made-up value, so this module uses [`nan_max`]/[`nan_min`] (NaN wins) for
//! bound intersection and the `*_excluding_nan` variants where one known side is
//! a better answer than unknown.
//!
//! ## Overlap heuristics
//! When an interval is infinite, "fraction of the range covered" has no meaning.
//! [`OverlapHeuristics`] holds the constants used instead.

use serde::{Deserialize, Serialize};

/// Fallback overlap fractions for infinite intervals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapHeuristics {
    /// `self` is infinite, the intersection is finite.
    pub infinite_to_finite: f64,
    /// The intersection itself is infinite.
    pub infinite_to_infinite: f64,
}

impl Default for OverlapHeuristics {
    fn default() -> Self {
        Self {
            infinite_to_finite: 0.25,
            infinite_to_infinite: 0.5,
        }
    }
}

/// Larger of two values; NaN if either is NaN.
pub fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

/// Smaller of two values; NaN if either is NaN.
pub fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

/// Smaller of two values, ignoring a NaN operand. NaN only if both are NaN.
pub fn min_excluding_nan(a: f64, b: f64) -> f64 {
    a.min(b)
}

/// Larger of two values, ignoring a NaN operand. NaN only if both are NaN.
pub fn max_excluding_nan(a: f64, b: f64) -> f64 {
    a.max(b)
}

/// NaN-aware equality: two NaNs are the same unknown.
pub(crate) fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValueRange {
    low: f64,
    high: f64,
    distinct_values: f64,
}

impl PartialEq for ValueRange {
    fn eq(&self, other: &Self) -> bool {
        same_value(self.low, other.low)
            && same_value(self.high, other.high)
            && same_value(self.distinct_values, other.distinct_values)
    }
}

impl ValueRange {
    /// # Panics
    /// If `low > high`, if only one bound is NaN, or if `distinct_values` is negative.
    pub fn new(low: f64, high: f64, distinct_values: f64) -> Self {
        assert!(
            low <= high || (low.is_nan() && high.is_nan()),
            "low value must be less than or equal to high value or both must be NaN, got [{}, {}]",
            low,
            high
        );
        assert!(
            distinct_values >= 0.0 || distinct_values.is_nan(),
            "distinct values count should be non-negative, got {}",
            distinct_values
        );
        Self {
            low,
            high,
            distinct_values,
        }
    }

    pub fn empty() -> Self {
        Self {
            low: f64::NAN,
            high: f64::NAN,
            distinct_values: 0.0,
        }
    }

    /// Single point `[value, value]` with the given distinct-value estimate.
    pub fn point(value: f64, distinct_values: f64) -> Self {
        Self::new(value, value, distinct_values)
    }

    /// `(-∞, high]`. A NaN bound is unknown and leaves the range unbounded.
    pub fn at_most(high: f64, distinct_values: f64) -> Self {
        let high = if high.is_nan() { f64::INFINITY } else { high };
        Self::new(f64::NEG_INFINITY, high, distinct_values)
    }

    /// `[low, +∞)`. A NaN bound is unknown and leaves the range unbounded.
    pub fn at_least(low: f64, distinct_values: f64) -> Self {
        let low = if low.is_nan() { f64::NEG_INFINITY } else { low };
        Self::new(low, f64::INFINITY, distinct_values)
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn distinct_values(&self) -> f64 {
        self.distinct_values
    }

    pub fn is_empty(&self) -> bool {
        self.low.is_nan() && self.high.is_nan()
    }

    pub fn length(&self) -> f64 {
        self.high - self.low
    }

    fn contains_range(&self, other: &ValueRange) -> bool {
        self.low <= other.low && other.high <= self.high
    }

    /// Fraction of `self` that lies inside `other`, with the default heuristics.
    pub fn overlap_percent_with(&self, other: &ValueRange) -> f64 {
        self.overlap_percent_with_heuristics(other, &OverlapHeuristics::default())
    }

    pub fn overlap_percent_with_heuristics(
        &self,
        other: &ValueRange,
        heuristics: &OverlapHeuristics,
    ) -> f64 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        if other.contains_range(self) {
            return 1.0;
        }

        let length_of_intersect = self.high.min(other.high) - self.low.max(other.low);
        if length_of_intersect.is_infinite() {
            return heuristics.infinite_to_infinite;
        }
        if length_of_intersect == 0.0 {
            return 1.0 / nan_max(self.distinct_values, 1.0);
        }
        if length_of_intersect < 0.0 {
            return 0.0;
        }
        if self.length().is_infinite() {
            return heuristics.infinite_to_finite;
        }
        length_of_intersect / self.length()
    }

    pub fn intersect(&self, other: &ValueRange) -> ValueRange {
        self.intersect_with_heuristics(other, &OverlapHeuristics::default())
    }

    /// Intersection of two ranges; empty when they do not meet.
    ///
    /// Each side contributes `overlap × distinct_values` distinct values to the
    /// intersection; the estimate is the smaller (NaN-excluding) contribution,
    /// which keeps the operation symmetric.
    pub fn intersect_with_heuristics(
        &self,
        other: &ValueRange,
        heuristics: &OverlapHeuristics,
    ) -> ValueRange {
        let new_low = nan_max(self.low, other.low);
        let new_high = nan_min(self.high, other.high);
        if !(new_low <= new_high) {
            return ValueRange::empty();
        }
        let left = self.overlap_percent_with_heuristics(other, heuristics) * self.distinct_values;
        let right = other.overlap_percent_with_heuristics(self, heuristics) * other.distinct_values;
        ValueRange::new(new_low, new_high, min_excluding_nan(left, right))
    }

    /// Union of the two value sets: widest bounds, distinct values summed.
    pub fn add(&self, other: &ValueRange) -> ValueRange {
        let distinct_values = self.distinct_values + other.distinct_values;
        let low = min_excluding_nan(self.low, other.low);
        let high = max_excluding_nan(self.high, other.high);
        if low.is_nan() || high.is_nan() {
            return ValueRange {
                low: f64::NAN,
                high: f64::NAN,
                distinct_values,
            };
        }
        ValueRange {
            low,
            high,
            distinct_values,
        }
    }

    /// Bounds of `self`, `self.distinct_values − other.distinct_values`.
    ///
    /// The distinct count is not clamped and may come out negative; callers
    /// decide how to floor it.
    pub fn subtract(&self, other: &ValueRange) -> ValueRange {
        ValueRange {
            low: self.low,
            high: self.high,
            distinct_values: self.distinct_values - other.distinct_values,
        }
    }
}
