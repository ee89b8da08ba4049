//! Filter estimates for single comparisons.
//!
//! ## Symbol against literal
//! The literal becomes a range: a point for `=`/`<>`, `(-∞, lit]` for `<`/`<=`,
//! `[lit, +∞)` for `>`/`>=`. A literal with no numeric value (a string, for
//! example) is "unknown" and widens to `(-∞, +∞)`. The symbol's range is
//! intersected with it, rows are scaled by the covered fraction times the
//! non-null fraction, and the symbol's statistics become the intersection with
//! no nulls.
//!
//! ## Symbol against symbol
//! Equality narrows both columns to the intersection of their ranges and keeps
//! `1 / max(ndv)` of the non-null pairs. Inequality is the complement of
//! equality. Ordering comparisons are unknown.

use super::math::difference_in_stats;
use super::{ColumnStatsEstimate, PlanNodeStatsEstimate};
use crate::expr::ComparisonOp;
use crate::range::{nan_max, OverlapHeuristics, ValueRange};
use crate::symbol::Symbol;

/// Estimate for a predicate the calculator cannot model: rows scaled by
/// `coefficient`, every known column becomes fully unknown.
pub fn unknown_filter_stats(input: &PlanNodeStatsEstimate, coefficient: f64) -> PlanNodeStatsEstimate {
    let mut builder = PlanNodeStatsEstimate::builder()
        .set_output_row_count(input.output_row_count() * coefficient);
    for symbol in input.symbols_with_known_statistics() {
        builder = builder.add_column_statistics(symbol, ColumnStatsEstimate::UNKNOWN);
    }
    builder.build()
}

#[derive(Debug, Clone, Copy)]
pub struct ComparisonStatsCalculator {
    pub heuristics: OverlapHeuristics,
    pub unknown_filter_coefficient: f64,
}

impl ComparisonStatsCalculator {
    pub fn new(heuristics: OverlapHeuristics, unknown_filter_coefficient: f64) -> Self {
        Self {
            heuristics,
            unknown_filter_coefficient,
        }
    }

    pub fn unknown(&self, input: &PlanNodeStatsEstimate) -> PlanNodeStatsEstimate {
        unknown_filter_stats(input, self.unknown_filter_coefficient)
    }

    /// `symbol <op> literal`, where `literal` is `None` when its value is not numeric.
    pub fn symbol_to_literal(
        &self,
        input: &PlanNodeStatsEstimate,
        symbol: &Symbol,
        literal: Option<f64>,
        op: ComparisonOp,
    ) -> PlanNodeStatsEstimate {
        let symbol_stats = input.column_statistics(symbol);
        if symbol_stats.is_unknown() {
            return self.unknown(input);
        }
        let literal = literal.filter(|value| !value.is_nan());
        match op {
            ComparisonOp::Equal => {
                self.range_comparison(input, symbol, &symbol_stats, literal_point(literal))
            }
            ComparisonOp::NotEqual => self.non_equality(input, symbol, &symbol_stats, literal),
            ComparisonOp::LessThan | ComparisonOp::LessThanOrEqual => {
                let range = ValueRange::at_most(literal.unwrap_or(f64::NAN), f64::NAN);
                self.range_comparison(input, symbol, &symbol_stats, range)
            }
            ComparisonOp::GreaterThan | ComparisonOp::GreaterThanOrEqual => {
                let range = ValueRange::at_least(literal.unwrap_or(f64::NAN), f64::NAN);
                self.range_comparison(input, symbol, &symbol_stats, range)
            }
            ComparisonOp::IsDistinctFrom => self.unknown(input),
        }
    }

    fn range_comparison(
        &self,
        input: &PlanNodeStatsEstimate,
        symbol: &Symbol,
        symbol_stats: &ColumnStatsEstimate,
        literal_range: ValueRange,
    ) -> PlanNodeStatsEstimate {
        let range = symbol_stats.statistics_range();
        let intersect = range.intersect_with_heuristics(&literal_range, &self.heuristics);
        let filter_factor = range.overlap_percent_with_heuristics(&intersect, &self.heuristics);
        let values_fraction = symbol_stats.values_fraction();

        let new_stats = ColumnStatsEstimate::builder()
            .set_average_row_size(symbol_stats.average_row_size())
            .set_statistics_range(intersect)
            .set_nulls_fraction(0.0)
            .build();
        input
            .map_output_row_count(|rows| clamp_factor(filter_factor * values_fraction) * rows)
            .map_column_statistics(symbol, |_| new_stats)
    }

    fn non_equality(
        &self,
        input: &PlanNodeStatsEstimate,
        symbol: &Symbol,
        symbol_stats: &ColumnStatsEstimate,
        literal: Option<f64>,
    ) -> PlanNodeStatsEstimate {
        let range = symbol_stats.statistics_range();
        let intersect = range.intersect_with_heuristics(&literal_point(literal), &self.heuristics);
        let filter_factor = 1.0 - range.overlap_percent_with_heuristics(&intersect, &self.heuristics);
        let values_fraction = symbol_stats.values_fraction();

        let mut distinct_values = symbol_stats.distinct_values_count() - 1.0;
        if distinct_values < 0.0 {
            distinct_values = 0.0;
        }
        let new_stats = symbol_stats
            .build_from()
            .set_nulls_fraction(0.0)
            .set_distinct_values_count(distinct_values)
            .build();
        input
            .map_output_row_count(|rows| clamp_factor(filter_factor * values_fraction) * rows)
            .map_column_statistics(symbol, |_| new_stats)
    }

    pub fn symbol_to_symbol(
        &self,
        input: &PlanNodeStatsEstimate,
        left: &Symbol,
        right: &Symbol,
        op: ComparisonOp,
    ) -> PlanNodeStatsEstimate {
        match op {
            ComparisonOp::Equal => self.symbol_equality(input, left, right),
            ComparisonOp::NotEqual => {
                difference_in_stats(input, &self.symbol_equality(input, left, right))
            }
            ComparisonOp::LessThan
            | ComparisonOp::LessThanOrEqual
            | ComparisonOp::GreaterThan
            | ComparisonOp::GreaterThanOrEqual
            | ComparisonOp::IsDistinctFrom => self.unknown(input),
        }
    }

    fn symbol_equality(
        &self,
        input: &PlanNodeStatsEstimate,
        left: &Symbol,
        right: &Symbol,
    ) -> PlanNodeStatsEstimate {
        let left_stats = input.column_statistics(left);
        let right_stats = input.column_statistics(right);
        if left_stats.distinct_values_count().is_nan() || right_stats.distinct_values_count().is_nan() {
            return self.unknown(input);
        }

        let left_range = left_stats.statistics_range();
        let right_range = right_stats.statistics_range();
        let intersect = left_range.intersect_with_heuristics(&right_range, &self.heuristics);

        let new_left = left_stats
            .build_from()
            .set_nulls_fraction(0.0)
            .set_statistics_range(intersect)
            .build();
        let new_right = right_stats
            .build_from()
            .set_nulls_fraction(0.0)
            .set_statistics_range(intersect)
            .build();

        let nulls_filter_factor = left_stats.values_fraction() * right_stats.values_fraction();
        let filter_factor =
            1.0 / nan_max(left_range.distinct_values(), right_range.distinct_values());

        input
            .map_output_row_count(|rows| rows * clamp_factor(filter_factor * nulls_filter_factor))
            .map_column_statistics(left, |_| new_left)
            .map_column_statistics(right, |_| new_right)
    }
}

fn literal_point(literal: Option<f64>) -> ValueRange {
    match literal {
        Some(value) => ValueRange::point(value, 1.0),
        None => ValueRange::new(f64::NEG_INFINITY, f64::INFINITY, 1.0),
    }
}

/// A filter never produces more rows than it reads.
fn clamp_factor(factor: f64) -> f64 {
    if factor > 1.0 {
        1.0
    } else {
        factor
    }
}
