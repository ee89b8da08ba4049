//! # Statistics Estimates
//!
//! Estimates flow bottom-up through the plan: every node gets a
//! [`PlanNodeStatsEstimate`] (output row count plus per-symbol
//! [`ColumnStatsEstimate`]s) computed from its sources' estimates.
//!
//! ## Unknown vs. absent
//!
//! - A symbol *absent* from `column_statistics` means nobody produced statistics
//!   for it. Reading it yields [`ColumnStatsEstimate::UNKNOWN`].
//! - A symbol *present* with NaN fields means the value is known to be unknown
//!   (for example after an expression the calculator cannot model).
//!
//! NaN is an ordinary value here. Arithmetic on unknown inputs yields unknown
//! outputs, never an error.
//!
//! ## Immutability
//!
//! Estimates are values. Transformations return new estimates
//! ([`PlanNodeStatsEstimate::map_output_row_count`],
//! [`PlanNodeStatsEstimate::map_column_statistics`]) or go through the builders.
//!
//! ## Submodules
//!
//! - [`math`]: addition/difference of estimates (OR, NOT, symbol ≠ symbol).
//! - [`comparison`]: comparison predicates against literals and other symbols.
//! - [`filter`]: predicate-driven filter estimation.
//! - [`calculator`]: per-node dispatch.

pub mod calculator;
pub mod comparison;
pub mod filter;
pub mod math;

use crate::range::ValueRange;
use crate::symbol::{Symbol, TypeProvider};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Per-column estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatsEstimate {
    low_value: f64,
    high_value: f64,
    nulls_fraction: f64,
    average_row_size: f64,
    distinct_values_count: f64,
}

impl ColumnStatsEstimate {
    pub const UNKNOWN: ColumnStatsEstimate = ColumnStatsEstimate {
        low_value: f64::NAN,
        high_value: f64::NAN,
        nulls_fraction: f64::NAN,
        average_row_size: f64::NAN,
        distinct_values_count: f64::NAN,
    };

    pub fn builder() -> ColumnStatsEstimateBuilder {
        ColumnStatsEstimateBuilder {
            stats: Self::UNKNOWN,
        }
    }

    /// Builder pre-populated with this estimate.
    pub fn build_from(&self) -> ColumnStatsEstimateBuilder {
        ColumnStatsEstimateBuilder { stats: *self }
    }

    pub fn low_value(&self) -> f64 {
        self.low_value
    }

    pub fn high_value(&self) -> f64 {
        self.high_value
    }

    pub fn nulls_fraction(&self) -> f64 {
        self.nulls_fraction
    }

    pub fn average_row_size(&self) -> f64 {
        self.average_row_size
    }

    pub fn distinct_values_count(&self) -> f64 {
        self.distinct_values_count
    }

    /// Fraction of non-null values (NaN when nulls are unknown).
    pub fn values_fraction(&self) -> f64 {
        1.0 - self.nulls_fraction
    }

    /// Every field is unknown.
    pub fn is_unknown(&self) -> bool {
        self.low_value.is_nan()
            && self.high_value.is_nan()
            && self.nulls_fraction.is_nan()
            && self.average_row_size.is_nan()
            && self.distinct_values_count.is_nan()
    }

    pub fn statistics_range(&self) -> ValueRange {
        if self.low_value.is_nan() || self.high_value.is_nan() {
            return ValueRange::new(f64::NAN, f64::NAN, self.distinct_values_count);
        }
        ValueRange::new(self.low_value, self.high_value, self.distinct_values_count)
    }

    pub fn map_nulls_fraction(&self, f: impl FnOnce(f64) -> f64) -> Self {
        self.build_from().set_nulls_fraction(f(self.nulls_fraction)).build()
    }

    pub fn map_distinct_values_count(&self, f: impl FnOnce(f64) -> f64) -> Self {
        self.build_from()
            .set_distinct_values_count(f(self.distinct_values_count))
            .build()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnStatsEstimateBuilder {
    stats: ColumnStatsEstimate,
}

impl ColumnStatsEstimateBuilder {
    pub fn set_low_value(mut self, low_value: f64) -> Self {
        self.stats.low_value = low_value;
        self
    }

    pub fn set_high_value(mut self, high_value: f64) -> Self {
        self.stats.high_value = high_value;
        self
    }

    /// Take bounds and distinct-value count from a range.
    pub fn set_statistics_range(mut self, range: ValueRange) -> Self {
        self.stats.low_value = range.low();
        self.stats.high_value = range.high();
        self.stats.distinct_values_count = range.distinct_values();
        self
    }

    pub fn set_nulls_fraction(mut self, nulls_fraction: f64) -> Self {
        self.stats.nulls_fraction = nulls_fraction;
        self
    }

    pub fn set_average_row_size(mut self, average_row_size: f64) -> Self {
        self.stats.average_row_size = average_row_size;
        self
    }

    pub fn set_distinct_values_count(mut self, distinct_values_count: f64) -> Self {
        self.stats.distinct_values_count = distinct_values_count;
        self
    }

    /// Finish the estimate.
    ///
    /// Finite nulls fractions are clamped into `[0, 1]`. A column with an empty
    /// range and no distinct values holds nothing but NULLs, so an unknown
    /// nulls fraction becomes `1`.
    pub fn build(self) -> ColumnStatsEstimate {
        let mut stats = self.stats;
        if !stats.nulls_fraction.is_nan() {
            stats.nulls_fraction = stats.nulls_fraction.clamp(0.0, 1.0);
        } else if stats.low_value.is_nan()
            && stats.high_value.is_nan()
            && stats.distinct_values_count == 0.0
        {
            stats.nulls_fraction = 1.0;
        }
        debug_assert!(
            stats.low_value <= stats.high_value
                || stats.low_value.is_nan()
                || stats.high_value.is_nan(),
            "low value {} above high value {}",
            stats.low_value,
            stats.high_value
        );
        stats
    }
}

/// Estimate of a plan node's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNodeStatsEstimate {
    output_row_count: f64,
    column_statistics: HashMap<Symbol, ColumnStatsEstimate>,
}

impl PlanNodeStatsEstimate {
    /// Unknown row count, no column statistics.
    pub fn unknown() -> Self {
        Self {
            output_row_count: f64::NAN,
            column_statistics: HashMap::new(),
        }
    }

    pub fn builder() -> PlanNodeStatsEstimateBuilder {
        PlanNodeStatsEstimateBuilder {
            estimate: Self::unknown(),
        }
    }

    pub fn build_from(&self) -> PlanNodeStatsEstimateBuilder {
        PlanNodeStatsEstimateBuilder {
            estimate: self.clone(),
        }
    }

    pub fn output_row_count(&self) -> f64 {
        self.output_row_count
    }

    /// Statistics of `symbol`, [`ColumnStatsEstimate::UNKNOWN`] when absent.
    pub fn column_statistics(&self, symbol: &Symbol) -> ColumnStatsEstimate {
        self.column_statistics
            .get(symbol)
            .copied()
            .unwrap_or(ColumnStatsEstimate::UNKNOWN)
    }

    pub fn has_column_statistics(&self, symbol: &Symbol) -> bool {
        self.column_statistics.contains_key(symbol)
    }

    /// Symbols with an entry, in a stable order.
    pub fn symbols_with_known_statistics(&self) -> BTreeSet<Symbol> {
        self.column_statistics.keys().cloned().collect()
    }

    pub fn map_output_row_count(&self, f: impl FnOnce(f64) -> f64) -> Self {
        Self {
            output_row_count: f(self.output_row_count),
            column_statistics: self.column_statistics.clone(),
        }
    }

    /// Replace the statistics of `symbol` by `f(current)`; absent symbols start
    /// from [`ColumnStatsEstimate::UNKNOWN`].
    pub fn map_column_statistics(
        &self,
        symbol: &Symbol,
        f: impl FnOnce(ColumnStatsEstimate) -> ColumnStatsEstimate,
    ) -> Self {
        let mut column_statistics = self.column_statistics.clone();
        column_statistics.insert(symbol.clone(), f(self.column_statistics(symbol)));
        Self {
            output_row_count: self.output_row_count,
            column_statistics,
        }
    }

    /// Estimated bytes produced for `symbols`.
    ///
    /// A symbol's width is its average row size when known, else the fixed width
    /// of its type, else `default_width`. NULLs are counted as one byte.
    pub fn output_size_in_bytes(
        &self,
        symbols: &[Symbol],
        types: &TypeProvider,
        default_width: f64,
    ) -> f64 {
        let mut row_size = 0.0;
        for symbol in symbols {
            let stats = self.column_statistics(symbol);
            let width = if !stats.average_row_size.is_nan() {
                stats.average_row_size
            } else {
                types
                    .get(symbol)
                    .and_then(|t| t.fixed_width())
                    .unwrap_or(default_width)
            };
            let nulls = if stats.nulls_fraction.is_nan() {
                0.0
            } else {
                stats.nulls_fraction
            };
            row_size += nulls + (1.0 - nulls) * width;
        }
        self.output_row_count * row_size
    }
}

pub struct PlanNodeStatsEstimateBuilder {
    estimate: PlanNodeStatsEstimate,
}

impl PlanNodeStatsEstimateBuilder {
    pub fn set_output_row_count(mut self, output_row_count: f64) -> Self {
        self.estimate.output_row_count = output_row_count;
        self
    }

    pub fn add_column_statistics(mut self, symbol: Symbol, stats: ColumnStatsEstimate) -> Self {
        self.estimate.column_statistics.insert(symbol, stats);
        self
    }

    pub fn remove_column_statistics(mut self, symbol: &Symbol) -> Self {
        self.estimate.column_statistics.remove(symbol);
        self
    }

    pub fn build(self) -> PlanNodeStatsEstimate {
        self.estimate
    }
}
