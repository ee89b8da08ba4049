//! # Scalar Expressions
//!
//! Row-level computations that appear inside plan nodes: filter predicates,
//! projection assignments, join residual filters and table-scan constraints.
//!
//! ## Symbols, not columns
//! Expressions reference their inputs through [`Symbol`]s. A symbol is only
//! meaningful relative to the outputs of the node's sources; plan validation
//! checks that every referenced symbol is actually produced below.
//!
//! ## Ordering
//! `Expr` derives `Ord`. The ordering has no SQL meaning; it gives
//! canonicalization a total order for sorting commutative operands and lets
//! expressions live in `BTreeSet`s (join-graph conjunct sets, for example).
//!
//! ## Conjuncts
//! Predicates are frequently handled as a flat list of conjuncts. Use
//! [`Expr::extract_conjuncts`] to split and [`combine_conjuncts`] to join.

use crate::symbol::Symbol;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Constant values.
///
/// Doubles are wrapped in `OrderedFloat` so that literals can be hashed and
/// compared, which the memo needs for structural deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Bigint(i64),
    Double(OrderedFloat<f64>),
    Varchar(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl ScalarValue {
    /// Numeric view of the value on the double line used by value ranges.
    ///
    /// Only numeric and date literals have one; strings and booleans do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Bigint(v) => Some(*v as f64),
            ScalarValue::Double(v) => Some(v.into_inner()),
            ScalarValue::Date(v) => Some(*v as f64),
            ScalarValue::Null | ScalarValue::Boolean(_) | ScalarValue::Varchar(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "NULL"),
            ScalarValue::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            ScalarValue::Bigint(v) => write!(f, "{}", v),
            ScalarValue::Double(v) => write!(f, "{:?}", v.into_inner()),
            ScalarValue::Varchar(s) => write!(f, "'{}'", s.replace('\'', "''")),
            ScalarValue::Date(d) => write!(f, "DATE {}", d),
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    IsDistinctFrom,
}

impl ComparisonOp {
    /// Operator to use when the operands are swapped: `a < b` ⇔ `b > a`.
    pub fn flip(self) -> Self {
        match self {
            ComparisonOp::LessThan => ComparisonOp::GreaterThan,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::GreaterThan => ComparisonOp::LessThan,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThanOrEqual,
            op @ (ComparisonOp::Equal | ComparisonOp::NotEqual | ComparisonOp::IsDistinctFrom) => op,
        }
    }

    /// Logical negation, when it is again a single comparison.
    ///
    /// `IS DISTINCT FROM` has no single-operator negation here.
    pub fn negate(self) -> Option<Self> {
        match self {
            ComparisonOp::Equal => Some(ComparisonOp::NotEqual),
            ComparisonOp::NotEqual => Some(ComparisonOp::Equal),
            ComparisonOp::LessThan => Some(ComparisonOp::GreaterThanOrEqual),
            ComparisonOp::LessThanOrEqual => Some(ComparisonOp::GreaterThan),
            ComparisonOp::GreaterThan => Some(ComparisonOp::LessThanOrEqual),
            ComparisonOp::GreaterThanOrEqual => Some(ComparisonOp::LessThan),
            ComparisonOp::IsDistinctFrom => None,
        }
    }

    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            ComparisonOp::Equal | ComparisonOp::NotEqual | ComparisonOp::IsDistinctFrom
        )
    }

    fn sql(self) -> &'static str {
        match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "<>",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
            ComparisonOp::IsDistinctFrom => "IS DISTINCT FROM",
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
}

impl ArithmeticOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, ArithmeticOp::Add | ArithmeticOp::Multiply)
    }

    fn sql(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulus => "%",
        }
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a column produced by a source.
    Symbol(Symbol),
    Literal(ScalarValue),
    Comparison {
        op: ComparisonOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    /// `value BETWEEN min AND max` (inclusive on both ends).
    Between {
        value: Box<Expr>,
        min: Box<Expr>,
        max: Box<Expr>,
    },
    InList {
        value: Box<Expr>,
        list: Vec<Expr>,
    },
    /// Conjunction, stored flat.
    And(Vec<Expr>),
    /// Disjunction, stored flat.
    Or(Vec<Expr>),
    Function {
        name: String,
        args: Vec<Expr>,
    },
}

/// Function names whose result may differ between two evaluations on the same row.
const NON_DETERMINISTIC_FUNCTIONS: &[&str] = &["random", "rand", "uuid", "shuffle"];

pub const TRUE_LITERAL: Expr = Expr::Literal(ScalarValue::Boolean(true));
pub const FALSE_LITERAL: Expr = Expr::Literal(ScalarValue::Boolean(false));

impl Expr {
    pub fn symbol(name: &str) -> Expr {
        Expr::Symbol(Symbol::new(name))
    }

    pub fn bigint(v: i64) -> Expr {
        Expr::Literal(ScalarValue::Bigint(v))
    }

    pub fn double(v: f64) -> Expr {
        Expr::Literal(ScalarValue::Double(OrderedFloat(v)))
    }

    pub fn varchar(v: &str) -> Expr {
        Expr::Literal(ScalarValue::Varchar(v.to_string()))
    }

    pub fn boolean(v: bool) -> Expr {
        Expr::Literal(ScalarValue::Boolean(v))
    }

    pub fn null() -> Expr {
        Expr::Literal(ScalarValue::Null)
    }

    pub fn comparison(op: ComparisonOp, left: Expr, right: Expr) -> Expr {
        Expr::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::comparison(ComparisonOp::Equal, left, right)
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expr, right: Expr) -> Expr {
        Expr::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Not(Box::new(expr))
    }

    pub fn is_null(expr: Expr) -> Expr {
        Expr::IsNull(Box::new(expr))
    }

    pub fn is_not_null(expr: Expr) -> Expr {
        Expr::IsNotNull(Box::new(expr))
    }

    pub fn between(value: Expr, min: Expr, max: Expr) -> Expr {
        Expr::Between {
            value: Box::new(value),
            min: Box::new(min),
            max: Box::new(max),
        }
    }

    pub fn in_list(value: Expr, list: Vec<Expr>) -> Expr {
        Expr::InList {
            value: Box::new(value),
            list,
        }
    }

    pub fn function(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.to_string(),
            args,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Expr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&ScalarValue> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    /// Direct children of this expression, in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Symbol(_) | Expr::Literal(_) => vec![],
            Expr::Comparison { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
                vec![left, right]
            }
            Expr::Not(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => vec![e],
            Expr::Between { value, min, max } => vec![value, min, max],
            Expr::InList { value, list } => {
                let mut out = vec![value.as_ref()];
                out.extend(list.iter());
                out
            }
            Expr::And(items) | Expr::Or(items) => items.iter().collect(),
            Expr::Function { args, .. } => args.iter().collect(),
        }
    }

    /// All symbols referenced anywhere in this expression.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        if let Expr::Symbol(s) = self {
            out.insert(s.clone());
            return;
        }
        for child in self.children() {
            child.collect_symbols(out);
        }
    }

    /// False when any function call in the tree may return different values
    /// for the same input row.
    pub fn is_deterministic(&self) -> bool {
        if let Expr::Function { name, .. } = self {
            let lower = name.to_ascii_lowercase();
            if NON_DETERMINISTIC_FUNCTIONS.contains(&lower.as_str()) {
                return false;
            }
        }
        self.children().iter().all(|c| c.is_deterministic())
    }

    /// Split a predicate into its top-level conjuncts: `a AND (b AND c)` → `[a, b, c]`.
    pub fn extract_conjuncts(&self) -> Vec<Expr> {
        match self {
            Expr::And(items) => items.iter().flat_map(|e| e.extract_conjuncts()).collect(),
            other => vec![other.clone()],
        }
    }
}

/// Join a list of conjuncts back into one predicate.
///
/// An empty list is `TRUE`; a single conjunct is returned as is.
pub fn combine_conjuncts(conjuncts: impl IntoIterator<Item = Expr>) -> Expr {
    let mut items: Vec<Expr> = conjuncts
        .into_iter()
        .flat_map(|e| e.extract_conjuncts())
        .filter(|e| *e != TRUE_LITERAL)
        .collect();
    match items.len() {
        0 => TRUE_LITERAL,
        1 => items.remove(0),
        _ => Expr::And(items),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
            for (i, e) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, "{}", sep)?;
                }
                write!(f, "{}", e)?;
            }
            Ok(())
        }
        match self {
            Expr::Symbol(s) => write!(f, "{}", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Comparison { op, left, right } => write!(f, "({} {} {})", left, op.sql(), right),
            Expr::Arithmetic { op, left, right } => write!(f, "({} {} {})", left, op.sql(), right),
            Expr::Not(e) => write!(f, "(NOT {})", e),
            Expr::IsNull(e) => write!(f, "({} IS NULL)", e),
            Expr::IsNotNull(e) => write!(f, "({} IS NOT NULL)", e),
            Expr::Between { value, min, max } => {
                write!(f, "({} BETWEEN {} AND {})", value, min, max)
            }
            Expr::InList { value, list } => {
                write!(f, "({} IN (", value)?;
                join(f, list, ", ")?;
                write!(f, "))")
            }
            Expr::And(items) => {
                write!(f, "(")?;
                join(f, items, " AND ")?;
                write!(f, ")")
            }
            Expr::Or(items) => {
                write!(f, "(")?;
                join(f, items, " OR ")?;
                write!(f, ")")
            }
            Expr::Function { name, args } => {
                write!(f, "{}(", name)?;
                join(f, args, ", ")?;
                write!(f, ")")
            }
        }
    }
}
