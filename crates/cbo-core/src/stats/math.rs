//! Arithmetic over plan-node estimates.
//!
//! Used to derive estimates for disjunctions (`a + b − (a ∧ b)`), negations
//! (`input − p`) and symbol inequality (`input − (x = y)`). Row counts add or
//! subtract; nulls fraction and average row size are weighted by row counts;
//! `0 / 0` gives NaN.

use super::{ColumnStatsEstimate, PlanNodeStatsEstimate};
use crate::range::ValueRange;

/// Sum of two estimates over disjoint row sets.
pub fn add_stats(left: &PlanNodeStatsEstimate, right: &PlanNodeStatsEstimate) -> PlanNodeStatsEstimate {
    let left_rows = left.output_row_count();
    let right_rows = right.output_row_count();
    let new_row_count = left_rows + right_rows;

    let mut builder = PlanNodeStatsEstimate::builder().set_output_row_count(new_row_count);
    let symbols = left
        .symbols_with_known_statistics()
        .into_iter()
        .chain(right.symbols_with_known_statistics());
    for symbol in symbols {
        let stats = add_column_stats(
            &left.column_statistics(&symbol),
            left_rows,
            &right.column_statistics(&symbol),
            right_rows,
            new_row_count,
        );
        builder = builder.add_column_statistics(symbol, stats);
    }
    builder.build()
}

fn add_column_stats(
    left: &ColumnStatsEstimate,
    left_rows: f64,
    right: &ColumnStatsEstimate,
    right_rows: f64,
    new_row_count: f64,
) -> ColumnStatsEstimate {
    let sum = left.statistics_range().add(&right.statistics_range());
    let nulls = left.nulls_fraction() * left_rows + right.nulls_fraction() * right_rows;
    let total_size = left_rows * left.average_row_size() + right_rows * right.average_row_size();

    ColumnStatsEstimate::builder()
        .set_statistics_range(sum)
        .set_average_row_size(total_size / new_row_count)
        .set_nulls_fraction(nulls / new_row_count)
        .build()
}

/// `left − right`, where `right` describes a subset of `left`'s rows.
///
/// Column ranges are shrunk with [`ValueRange::subtract`].
pub fn difference_in_stats(
    left: &PlanNodeStatsEstimate,
    right: &PlanNodeStatsEstimate,
) -> PlanNodeStatsEstimate {
    difference_with_range_strategy(left, right, |l, r| l.subtract(r))
}

/// `left − right`, keeping `left`'s column ranges untouched.
pub fn difference_in_non_range_stats(
    left: &PlanNodeStatsEstimate,
    right: &PlanNodeStatsEstimate,
) -> PlanNodeStatsEstimate {
    difference_with_range_strategy(left, right, |l, _| *l)
}

fn difference_with_range_strategy(
    left: &PlanNodeStatsEstimate,
    right: &PlanNodeStatsEstimate,
    range_strategy: impl Fn(&ValueRange, &ValueRange) -> ValueRange,
) -> PlanNodeStatsEstimate {
    let left_rows = left.output_row_count();
    let right_rows = right.output_row_count();
    let new_row_count = left_rows - right_rows;

    let mut builder = PlanNodeStatsEstimate::builder().set_output_row_count(new_row_count);
    let symbols = left
        .symbols_with_known_statistics()
        .into_iter()
        .chain(right.symbols_with_known_statistics());
    for symbol in symbols {
        let left_stats = left.column_statistics(&symbol);
        let right_stats = right.column_statistics(&symbol);
        let range = range_strategy(
            &left_stats.statistics_range(),
            &right_stats.statistics_range(),
        );
        let nulls = left_stats.nulls_fraction() * left_rows - right_stats.nulls_fraction() * right_rows;
        let total_size =
            left_rows * left_stats.average_row_size() - right_rows * right_stats.average_row_size();
        // the subtracted side may overestimate its distinct values
        let mut distinct_values =
            left_stats.distinct_values_count() - right_stats.distinct_values_count();
        if distinct_values < 0.0 {
            distinct_values = 0.0;
        }

        let stats = ColumnStatsEstimate::builder()
            .set_distinct_values_count(distinct_values)
            .set_low_value(range.low())
            .set_high_value(range.high())
            .set_average_row_size(total_size / new_row_count)
            .set_nulls_fraction(nulls / new_row_count)
            .build();
        builder = builder.add_column_statistics(symbol, stats);
    }
    builder.build()
}
