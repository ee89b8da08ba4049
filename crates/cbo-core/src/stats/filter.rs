//! Filter estimation: how a predicate changes a plan-node estimate.
//!
//! The predicate is walked structurally:
//!
//! | predicate            | estimate                                             |
//! |----------------------|------------------------------------------------------|
//! | `TRUE`               | input                                                |
//! | `FALSE`, `NULL`      | zero rows                                            |
//! | `a AND b`            | `b` applied to the estimate of `a`                   |
//! | `a OR b`             | `a + b − (a AND b)`, capped at the input row count   |
//! | `NOT p`              | `input − p`, ranges kept                             |
//! | `x IS [NOT] NULL`    | nulls fraction of `x`, unknown if that is unknown    |
//! | `x BETWEEN a AND b`  | `x >= a AND x <= b`, open end of `x` cut first       |
//! | `x IN (..)`          | disjunction of equalities                            |
//! | comparisons          | see [`super::comparison`]                            |
//! | anything else        | unknown: rows × `unknown_filter_coefficient`         |

use super::comparison::ComparisonStatsCalculator;
use super::math::{add_stats, difference_in_non_range_stats, difference_in_stats};
use super::{ColumnStatsEstimate, PlanNodeStatsEstimate};
use crate::config::OptimizerConfig;
use crate::expr::{ComparisonOp, Expr, ScalarValue};
use crate::range::{nan_min, ValueRange};

#[derive(Debug, Clone, Copy)]
pub struct FilterStatsCalculator {
    comparisons: ComparisonStatsCalculator,
}

impl FilterStatsCalculator {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            comparisons: ComparisonStatsCalculator::new(
                config.overlap_heuristics,
                config.unknown_filter_coefficient,
            ),
        }
    }

    /// Estimate of the rows of `input` satisfying `predicate`.
    pub fn filter_stats(&self, input: &PlanNodeStatsEstimate, predicate: &Expr) -> PlanNodeStatsEstimate {
        match predicate {
            Expr::Literal(ScalarValue::Boolean(true)) => input.clone(),
            Expr::Literal(ScalarValue::Boolean(false)) | Expr::Literal(ScalarValue::Null) => {
                zero_rows(input)
            }
            Expr::And(items) => items
                .iter()
                .fold(input.clone(), |acc, item| self.filter_stats(&acc, item)),
            Expr::Or(items) => self.disjunction(input, items),
            Expr::Not(inner) => {
                difference_in_non_range_stats(input, &self.filter_stats(input, inner))
            }
            Expr::IsNull(inner) => match inner.as_symbol() {
                Some(symbol) if input.column_statistics(symbol).nulls_fraction().is_nan() => {
                    self.comparisons.unknown(input)
                }
                Some(symbol) => {
                    let stats = input.column_statistics(symbol);
                    let nulls = stats.nulls_fraction();
                    let new_stats = ColumnStatsEstimate::builder()
                        .set_average_row_size(stats.average_row_size())
                        .set_statistics_range(ValueRange::empty())
                        .set_nulls_fraction(1.0)
                        .build();
                    input
                        .map_output_row_count(|rows| rows * nulls)
                        .map_column_statistics(symbol, |_| new_stats)
                }
                None => self.comparisons.unknown(input),
            },
            Expr::IsNotNull(inner) => match inner.as_symbol() {
                Some(symbol) if input.column_statistics(symbol).nulls_fraction().is_nan() => {
                    self.comparisons.unknown(input)
                }
                Some(symbol) => {
                    let stats = input.column_statistics(symbol);
                    let values_fraction = stats.values_fraction();
                    input
                        .map_output_row_count(|rows| rows * values_fraction)
                        .map_column_statistics(symbol, |s| {
                            s.build_from().set_nulls_fraction(0.0).build()
                        })
                }
                None => self.comparisons.unknown(input),
            },
            Expr::Between { value, min, max } => {
                let lower = Expr::comparison(
                    ComparisonOp::GreaterThanOrEqual,
                    (**value).clone(),
                    (**min).clone(),
                );
                let upper = Expr::comparison(
                    ComparisonOp::LessThanOrEqual,
                    (**value).clone(),
                    (**max).clone(),
                );
                // cut the open end of a half-open column first, so that the
                // estimate does not depend on which end is open
                let upper_first = value.as_symbol().is_some_and(|symbol| {
                    let stats = input.column_statistics(symbol);
                    stats.high_value() == f64::INFINITY && stats.low_value().is_finite()
                });
                let bounds = if upper_first {
                    vec![upper, lower]
                } else {
                    vec![lower, upper]
                };
                self.filter_stats(input, &Expr::And(bounds))
            }
            Expr::InList { value, list } => {
                let equalities: Vec<Expr> = list
                    .iter()
                    .map(|item| Expr::eq((**value).clone(), item.clone()))
                    .collect();
                self.disjunction(input, &equalities)
            }
            Expr::Comparison { op, left, right } => self.comparison(input, *op, left, right),
            Expr::Symbol(_)
            | Expr::Literal(_)
            | Expr::Arithmetic { .. }
            | Expr::Function { .. } => self.comparisons.unknown(input),
        }
    }

    fn comparison(
        &self,
        input: &PlanNodeStatsEstimate,
        op: ComparisonOp,
        left: &Expr,
        right: &Expr,
    ) -> PlanNodeStatsEstimate {
        match (left, right) {
            (Expr::Symbol(l), Expr::Symbol(r)) => self.comparisons.symbol_to_symbol(input, l, r, op),
            (Expr::Symbol(symbol), Expr::Literal(literal)) => {
                if literal.is_null() {
                    return zero_rows(input);
                }
                self.comparisons
                    .symbol_to_literal(input, symbol, literal.as_f64(), op)
            }
            (Expr::Literal(_), Expr::Symbol(_)) => self.comparison(input, op.flip(), right, left),
            _ => self.comparisons.unknown(input),
        }
    }

    fn disjunction(&self, input: &PlanNodeStatsEstimate, items: &[Expr]) -> PlanNodeStatsEstimate {
        let Some((first, rest)) = items.split_first() else {
            return zero_rows(input);
        };
        let input_rows = input.output_row_count();
        let mut acc = self.filter_stats(input, first);
        for item in rest {
            let right = self.filter_stats(input, item);
            // rows matching both the disjunction so far and `item`
            let both = self.filter_stats(&acc, item);
            let union = difference_in_stats(&add_stats(&acc, &right), &both);
            acc = union.map_output_row_count(|rows| nan_min(rows, input_rows));
        }
        acc
    }
}

/// No row survives; every known column becomes empty.
fn zero_rows(input: &PlanNodeStatsEstimate) -> PlanNodeStatsEstimate {
    let mut builder = PlanNodeStatsEstimate::builder().set_output_row_count(0.0);
    for symbol in input.symbols_with_known_statistics() {
        let stats = input.column_statistics(&symbol);
        builder = builder.add_column_statistics(
            symbol,
            ColumnStatsEstimate::builder()
                .set_average_row_size(stats.average_row_size())
                .set_statistics_range(ValueRange::empty())
                .set_nulls_fraction(0.0)
                .build(),
        );
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;

    fn input() -> PlanNodeStatsEstimate {
        PlanNodeStatsEstimate::builder()
            .set_output_row_count(1000.0)
            .add_column_statistics(
                Symbol::new("x"),
                ColumnStatsEstimate::builder()
                    .set_low_value(-10.0)
                    .set_high_value(10.0)
                    .set_distinct_values_count(40.0)
                    .set_nulls_fraction(0.25)
                    .set_average_row_size(4.0)
                    .build(),
            )
            .build()
    }

    fn calculator() -> FilterStatsCalculator {
        FilterStatsCalculator::new(&OptimizerConfig::default())
    }

    fn x() -> Expr {
        Expr::symbol("x")
    }

    #[test]
    fn test_boolean_literals() {
        let calc = calculator();
        assert_eq!(calc.filter_stats(&input(), &Expr::boolean(true)), input());
        let none = calc.filter_stats(&input(), &Expr::boolean(false));
        assert_eq!(none.output_row_count(), 0.0);
        assert_eq!(none.column_statistics(&Symbol::new("x")).distinct_values_count(), 0.0);
        assert_eq!(calc.filter_stats(&input(), &Expr::null()).output_row_count(), 0.0);
    }

    #[test]
    fn test_literal_on_left_is_flipped() {
        let calc = calculator();
        let a = calc.filter_stats(
            &input(),
            &Expr::comparison(ComparisonOp::LessThan, Expr::bigint(0), x()),
        );
        let b = calc.filter_stats(
            &input(),
            &Expr::comparison(ComparisonOp::GreaterThan, x(), Expr::bigint(0)),
        );
        assert_eq!(a, b);
        assert_eq!(a.output_row_count(), 375.0);
    }

    #[test]
    fn test_or_does_not_exceed_input() {
        let calc = calculator();
        let predicate = Expr::Or(vec![
            Expr::comparison(ComparisonOp::GreaterThan, x(), Expr::bigint(-100)),
            Expr::comparison(ComparisonOp::LessThan, x(), Expr::bigint(100)),
        ]);
        let out = calc.filter_stats(&input(), &predicate);
        assert!(out.output_row_count() <= 1000.0);
        assert!((out.output_row_count() - 750.0).abs() < 1e-9);
    }

    #[test]
    fn test_in_list_counts_each_value() {
        let calc = calculator();
        let out = calc.filter_stats(
            &input(),
            &Expr::in_list(x(), vec![Expr::bigint(1), Expr::bigint(2)]),
        );
        let single = calc.filter_stats(&input(), &Expr::eq(x(), Expr::bigint(1)));
        assert!((out.output_row_count() - 2.0 * single.output_row_count()).abs() < 1e-9);
    }

    #[test]
    fn test_not_is_complement() {
        let calc = calculator();
        let p = Expr::comparison(ComparisonOp::LessThan, x(), Expr::double(2.5));
        let yes = calc.filter_stats(&input(), &p);
        let no = calc.filter_stats(&input(), &Expr::not(p));
        assert!((yes.output_row_count() + no.output_row_count() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_unsupported_expression_is_unknown() {
        let calc = calculator();
        let out = calc.filter_stats(
            &input(),
            &Expr::eq(Expr::function("abs", vec![x()]), Expr::bigint(1)),
        );
        assert_eq!(out.output_row_count(), 500.0);
        assert!(out.column_statistics(&Symbol::new("x")).is_unknown());
    }

    #[test]
    fn test_null_checks_without_statistics_are_unknown() {
        let calc = calculator();
        for predicate in [
            Expr::is_null(Expr::symbol("w")),
            Expr::is_not_null(Expr::symbol("w")),
        ] {
            let out = calc.filter_stats(&input(), &predicate);
            assert_eq!(out.output_row_count(), 500.0);
        }
    }

    #[test]
    fn test_comparison_with_null_literal() {
        let calc = calculator();
        let out = calc.filter_stats(&input(), &Expr::eq(x(), Expr::null()));
        assert_eq!(out.output_row_count(), 0.0);
    }
}
