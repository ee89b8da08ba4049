//! # Expression Canonicalization
//!
//! Rewrites scalar expressions into one canonical spelling so that equivalent
//! predicates and projections compare (and hash) equal in the memo.
//!
//! ## Canonical form
//!
//! Applied bottom-up, each node after its children:
//!
//! - **Constant folding**: comparisons and arithmetic between literals, `IS [NOT]
//!   NULL` on a literal, and `NOT` of a literal are evaluated. Integer overflow
//!   and division (or modulus) by zero are left unfolded so the runtime error
//!   still happens at execution. A comparison with a `NULL` literal is `NULL`.
//! - **Operand order**: a literal on the left of a comparison moves to the right
//!   with the operator flipped (`5 < x` → `x > 5`). Operands of symmetric
//!   comparisons and of commutative arithmetic are sorted, literals last.
//! - **Negation**: `NOT` is pushed into comparisons (`NOT a < b` → `a >= b`) and
//!   `IS [NOT] NULL`; `NOT NOT e` → `e`.
//! - **Connectives**: nested `AND`/`OR` are flattened, neutral elements dropped,
//!   absorbing elements short-circuit, duplicates removed (first occurrence wins).
//! - Function names are lower-cased.
//!
//! Canonicalization is idempotent.
//!
//! ## Rules
//!
//! [`CanonicalizeProjectExpressions`], [`CanonicalizeFilterExpressions`] and
//! [`CanonicalizeTableScanExpressions`] apply it to the expressions of one node
//! and fire only when something changed.

use cbo_core::expr::{ArithmeticOp, ComparisonOp, Expr, ScalarValue, FALSE_LITERAL, TRUE_LITERAL};
use cbo_core::pattern::Pattern;
use cbo_core::plan::{FilterNode, PlanNode, ProjectNode, TableScanNode};
use cbo_core::rule::{Rule, RuleContext};
use std::cmp::Ordering;

pub fn canonicalize_expression(expr: &Expr) -> Expr {
    match expr {
        Expr::Symbol(_) | Expr::Literal(_) => expr.clone(),
        Expr::Comparison { op, left, right } => comparison(
            *op,
            canonicalize_expression(left),
            canonicalize_expression(right),
        ),
        Expr::Arithmetic { op, left, right } => arithmetic(
            *op,
            canonicalize_expression(left),
            canonicalize_expression(right),
        ),
        Expr::Not(inner) => negate(canonicalize_expression(inner)),
        Expr::IsNull(inner) => match canonicalize_expression(inner) {
            Expr::Literal(value) => Expr::boolean(value.is_null()),
            other => Expr::is_null(other),
        },
        Expr::IsNotNull(inner) => match canonicalize_expression(inner) {
            Expr::Literal(value) => Expr::boolean(!value.is_null()),
            other => Expr::is_not_null(other),
        },
        Expr::Between { value, min, max } => Expr::between(
            canonicalize_expression(value),
            canonicalize_expression(min),
            canonicalize_expression(max),
        ),
        Expr::InList { value, list } => Expr::in_list(
            canonicalize_expression(value),
            list.iter().map(canonicalize_expression).collect(),
        ),
        Expr::And(items) => connective(true, items.iter().map(canonicalize_expression)),
        Expr::Or(items) => connective(false, items.iter().map(canonicalize_expression)),
        Expr::Function { name, args } => Expr::Function {
            name: name.to_lowercase(),
            args: args.iter().map(canonicalize_expression).collect(),
        },
    }
}

/// Sort key putting literals after everything else.
fn operand_key(e: &Expr) -> (bool, &Expr) {
    (e.is_literal(), e)
}

fn compare_literals(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    use ScalarValue::*;
    match (left, right) {
        (Bigint(_) | Double(_), Bigint(_) | Double(_)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Date(a), Date(b)) => Some(a.cmp(b)),
        (Varchar(a), Varchar(b)) => Some(a.cmp(b)),
        (Boolean(a), Boolean(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn fold_comparison(op: ComparisonOp, left: &ScalarValue, right: &ScalarValue) -> Option<Expr> {
    if op == ComparisonOp::IsDistinctFrom {
        return match (left.is_null(), right.is_null()) {
            (true, true) => Some(Expr::boolean(false)),
            (true, false) | (false, true) => Some(Expr::boolean(true)),
            (false, false) => compare_literals(left, right).map(|o| Expr::boolean(o != Ordering::Equal)),
        };
    }
    if left.is_null() || right.is_null() {
        return Some(Expr::null());
    }
    let ordering = compare_literals(left, right)?;
    let result = match op {
        ComparisonOp::Equal => ordering == Ordering::Equal,
        ComparisonOp::NotEqual | ComparisonOp::IsDistinctFrom => ordering != Ordering::Equal,
        ComparisonOp::LessThan => ordering == Ordering::Less,
        ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
        ComparisonOp::GreaterThan => ordering == Ordering::Greater,
        ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
    };
    Some(Expr::boolean(result))
}

fn comparison(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
    match (&left, &right) {
        (Expr::Literal(l), Expr::Literal(r)) => {
            if let Some(folded) = fold_comparison(op, l, r) {
                return folded;
            }
        }
        (Expr::Literal(l), _) if l.is_null() && op != ComparisonOp::IsDistinctFrom => {
            return Expr::null();
        }
        (_, Expr::Literal(r)) if r.is_null() && op != ComparisonOp::IsDistinctFrom => {
            return Expr::null();
        }
        _ => {}
    }

    if op.is_symmetric() {
        if operand_key(&right) < operand_key(&left) {
            return Expr::comparison(op, right, left);
        }
    } else if left.is_literal() && !right.is_literal() {
        return Expr::comparison(op.flip(), right, left);
    }
    Expr::comparison(op, left, right)
}

fn fold_arithmetic(op: ArithmeticOp, left: &ScalarValue, right: &ScalarValue) -> Option<Expr> {
    use ScalarValue::*;
    match (left, right) {
        (Null, _) | (_, Null) => Some(Expr::null()),
        (Bigint(a), Bigint(b)) => {
            let value = match op {
                ArithmeticOp::Add => a.checked_add(*b),
                ArithmeticOp::Subtract => a.checked_sub(*b),
                ArithmeticOp::Multiply => a.checked_mul(*b),
                ArithmeticOp::Divide => a.checked_div(*b),
                ArithmeticOp::Modulus => a.checked_rem(*b),
            }?;
            Some(Expr::Literal(Bigint(value)))
        }
        (Bigint(_) | Double(_), Bigint(_) | Double(_)) => {
            let (a, b) = (left.as_f64()?, right.as_f64()?);
            if matches!(op, ArithmeticOp::Divide | ArithmeticOp::Modulus) && b == 0.0 {
                return None;
            }
            let value = match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Subtract => a - b,
                ArithmeticOp::Multiply => a * b,
                ArithmeticOp::Divide => a / b,
                ArithmeticOp::Modulus => a % b,
            };
            value
                .is_finite()
                .then(|| Expr::double(value))
        }
        _ => None,
    }
}

fn arithmetic(op: ArithmeticOp, left: Expr, right: Expr) -> Expr {
    if let (Expr::Literal(l), Expr::Literal(r)) = (&left, &right) {
        if let Some(folded) = fold_arithmetic(op, l, r) {
            return folded;
        }
    }
    if op.is_commutative() && operand_key(&right) < operand_key(&left) {
        return Expr::arithmetic(op, right, left);
    }
    Expr::arithmetic(op, left, right)
}

/// `NOT expr` for an already canonical `expr`.
fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Literal(ScalarValue::Boolean(b)) => Expr::boolean(!b),
        Expr::Literal(ScalarValue::Null) => Expr::null(),
        Expr::Not(inner) => *inner,
        Expr::IsNull(inner) => Expr::IsNotNull(inner),
        Expr::IsNotNull(inner) => Expr::IsNull(inner),
        Expr::Comparison { op, left, right } => match op.negate() {
            Some(negated) => Expr::Comparison {
                op: negated,
                left,
                right,
            },
            None => Expr::not(Expr::Comparison { op, left, right }),
        },
        other => Expr::not(other),
    }
}

/// Flattened `AND` (`conjunction`) or `OR` of canonical items.
fn connective(conjunction: bool, items: impl Iterator<Item = Expr>) -> Expr {
    let (neutral, absorbing) = if conjunction {
        (TRUE_LITERAL, FALSE_LITERAL)
    } else {
        (FALSE_LITERAL, TRUE_LITERAL)
    };

    let mut flat: Vec<Expr> = Vec::new();
    for item in items {
        let nested = match item {
            Expr::And(nested) if conjunction => nested,
            Expr::Or(nested) if !conjunction => nested,
            other => vec![other],
        };
        for e in nested {
            if e == absorbing {
                return absorbing;
            }
            if e != neutral && !flat.contains(&e) {
                flat.push(e);
            }
        }
    }

    match flat.len() {
        0 => neutral,
        1 => flat.remove(0),
        _ if conjunction => Expr::And(flat),
        _ => Expr::Or(flat),
    }
}

pub struct CanonicalizeProjectExpressions;

impl Rule for CanonicalizeProjectExpressions {
    fn name(&self) -> &str {
        "CanonicalizeProjectExpressions"
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn apply(&self, node: &PlanNode, _ctx: &mut RuleContext<'_>) -> Option<PlanNode> {
        let PlanNode::Project(project) = node else {
            return None;
        };
        let assignments = project.assignments.rewrite(canonicalize_expression);
        if assignments == project.assignments {
            return None;
        }
        Some(PlanNode::Project(ProjectNode {
            assignments,
            ..project.clone()
        }))
    }
}

pub struct CanonicalizeFilterExpressions;

impl Rule for CanonicalizeFilterExpressions {
    fn name(&self) -> &str {
        "CanonicalizeFilterExpressions"
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn apply(&self, node: &PlanNode, _ctx: &mut RuleContext<'_>) -> Option<PlanNode> {
        let PlanNode::Filter(filter) = node else {
            return None;
        };
        let predicate = canonicalize_expression(&filter.predicate);
        if predicate == filter.predicate {
            return None;
        }
        Some(PlanNode::Filter(FilterNode {
            predicate,
            ..filter.clone()
        }))
    }
}

pub struct CanonicalizeTableScanExpressions;

impl Rule for CanonicalizeTableScanExpressions {
    fn name(&self) -> &str {
        "CanonicalizeTableScanExpressions"
    }

    fn pattern(&self) -> Pattern {
        Pattern::table_scan()
    }

    fn apply(&self, node: &PlanNode, _ctx: &mut RuleContext<'_>) -> Option<PlanNode> {
        let PlanNode::TableScan(scan) = node else {
            return None;
        };
        let constraint = scan.original_constraint.as_ref()?;
        let canonical = canonicalize_expression(constraint);
        if canonical == *constraint {
            return None;
        }
        Some(PlanNode::TableScan(TableScanNode {
            original_constraint: Some(canonical),
            ..scan.clone()
        }))
    }
}
