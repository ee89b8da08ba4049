//! # Plan Nodes
//!
//! The relational plan the optimizer rewrites. [`PlanNode`] is a closed sum type;
//! every consumer (statistics, cost, validation, rules) dispatches with an
//! exhaustive `match`, so adding a node kind is a compile error everywhere it
//! needs handling.
//!
//! ## Outputs
//! Every node produces an ordered list of [`Symbol`]s. Rules may reorder outputs
//! but never change the *set* of outputs of a memo group.
//!
//! ## Group references
//! Inside the memo, children are [`PlanNode::GroupReference`]s pointing at another
//! equivalence group. A reference carries the output symbols of its group so that
//! a node's own outputs and validity can be computed without the memo.
//!
//! ## Join graphs
//! [`JoinGraphNode`] is a search-time node produced by flattening inner joins. It is
//! never part of a final plan. Its equality ignores source order and conjunct
//! order; see [`JoinGraphNode`].

use crate::catalog::{ColumnHandle, TableRef};
use crate::expr::{combine_conjuncts, Expr};
use crate::memo::GroupId;
use crate::symbol::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a plan node. Unique per query, not part of structural equality
/// inside the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanNodeId(pub u64);

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default, Clone)]
pub struct PlanNodeIdAllocator {
    next: u64,
}

impl PlanNodeIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> PlanNodeId {
        let id = PlanNodeId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

/// How the two join inputs are spread over workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DistributionType {
    /// Both sides hash-partitioned on the join keys.
    Partitioned,
    /// Build side broadcast to every probe worker.
    Replicated,
}

/// `left = right` where `left` comes from the join's left input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EquiJoinClause {
    pub left: Symbol,
    pub right: Symbol,
}

impl EquiJoinClause {
    pub fn new(left: impl Into<Symbol>, right: impl Into<Symbol>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn flip(&self) -> Self {
        Self {
            left: self.right.clone(),
            right: self.left.clone(),
        }
    }

    pub fn to_expression(&self) -> Expr {
        Expr::eq(self.left.to_expr(), self.right.to_expr())
    }
}

impl fmt::Display for EquiJoinClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.left, self.right)
    }
}

/// Ordered `symbol := expression` list of a projection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignments {
    entries: Vec<(Symbol, Expr)>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// `s := s` for every symbol.
    pub fn identity<'a>(symbols: impl IntoIterator<Item = &'a Symbol>) -> Self {
        Self {
            entries: symbols.into_iter().map(|s| (s.clone(), s.to_expr())).collect(),
        }
    }

    /// Add or overwrite an assignment.
    pub fn put(&mut self, symbol: Symbol, expr: Expr) {
        match self.entries.iter_mut().find(|(s, _)| *s == symbol) {
            Some(entry) => entry.1 = expr,
            None => self.entries.push((symbol, expr)),
        }
    }

    pub fn with(mut self, symbol: impl Into<Symbol>, expr: Expr) -> Self {
        self.put(symbol.into(), expr);
        self
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&Expr> {
        self.entries.iter().find(|(s, _)| s == symbol).map(|(_, e)| e)
    }

    pub fn outputs(&self) -> Vec<Symbol> {
        self.entries.iter().map(|(s, _)| s.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Symbol, Expr)> {
        self.entries.iter()
    }

    pub fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.entries.iter().map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only the assignments whose output symbol satisfies `keep`.
    pub fn filter(&self, mut keep: impl FnMut(&Symbol) -> bool) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(s, _)| keep(s))
                .cloned()
                .collect(),
        }
    }

    /// Rewrite every expression, keeping output symbols and order.
    pub fn rewrite(&self, mut f: impl FnMut(&Expr) -> Expr) -> Self {
        Self {
            entries: self.entries.iter().map(|(s, e)| (s.clone(), f(e))).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregation {
    pub function: AggregateFunction,
    pub arguments: Vec<Symbol>,
    pub distinct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableScanNode {
    pub id: PlanNodeId,
    pub table: TableRef,
    pub output_symbols: Vec<Symbol>,
    pub assignments: BTreeMap<Symbol, ColumnHandle>,
    /// Predicate pushed into the connector; may be absent.
    pub original_constraint: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValuesNode {
    pub id: PlanNodeId,
    pub output_symbols: Vec<Symbol>,
    pub rows: Vec<Vec<Expr>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterNode {
    pub id: PlanNodeId,
    pub source: Box<PlanNode>,
    pub predicate: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectNode {
    pub id: PlanNodeId,
    pub source: Box<PlanNode>,
    pub assignments: Assignments,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinNode {
    pub id: PlanNodeId,
    pub join_type: JoinType,
    pub left: Box<PlanNode>,
    pub right: Box<PlanNode>,
    pub criteria: Vec<EquiJoinClause>,
    pub output_symbols: Vec<Symbol>,
    /// Residual (non-equi) filter evaluated on joined rows.
    pub filter: Option<Expr>,
    pub distribution_type: Option<DistributionType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationNode {
    pub id: PlanNodeId,
    pub source: Box<PlanNode>,
    pub group_by: Vec<Symbol>,
    pub aggregations: Vec<(Symbol, Aggregation)>,
}

/// `UNION ALL`. `inputs[i][j]` is the symbol of source `i` feeding `outputs[j]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnionNode {
    pub id: PlanNodeId,
    pub sources: Vec<PlanNode>,
    pub outputs: Vec<Symbol>,
    pub inputs: Vec<Vec<Symbol>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimitNode {
    pub id: PlanNodeId,
    pub source: Box<PlanNode>,
    pub count: u64,
}

/// Flattened tree of inner joins: a set of sources joined by a set of conjuncts.
///
/// Two join graphs are equal when they have the same *set* of output symbols,
/// the same *set* of conjuncts (equi clauses rendered as `left = right`, plus
/// filter conjuncts, with `a = b` and `b = a` taken as one) and the same *set*
/// of source ids. A source's id is its memo
/// group when it is a group reference, its plan node id otherwise.
#[derive(Debug, Clone)]
pub struct JoinGraphNode {
    pub id: PlanNodeId,
    pub sources: Vec<PlanNode>,
    pub criteria: Vec<EquiJoinClause>,
    pub filters: Vec<Expr>,
    pub output_symbols: Vec<Symbol>,
}

/// Identity of a join-graph source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceId {
    Group(GroupId),
    Node(PlanNodeId),
}

impl JoinGraphNode {
    /// Every join predicate of the graph as a set of conjuncts.
    pub fn conjuncts(&self) -> BTreeSet<Expr> {
        self.criteria
            .iter()
            .map(EquiJoinClause::to_expression)
            .chain(self.filters.iter().flat_map(Expr::extract_conjuncts))
            .collect()
    }

    pub fn source_ids(&self) -> BTreeSet<SourceId> {
        self.sources
            .iter()
            .map(|s| match s {
                PlanNode::GroupReference(r) => SourceId::Group(r.group),
                other => SourceId::Node(other.id()),
            })
            .collect()
    }

    pub fn output_symbol_set(&self) -> BTreeSet<Symbol> {
        self.output_symbols.iter().cloned().collect()
    }

    /// All filters combined into one predicate (`TRUE` when there are none).
    pub fn filter(&self) -> Expr {
        combine_conjuncts(self.filters.iter().cloned())
    }
}

impl JoinGraphNode {
    /// Conjuncts with symbol-to-symbol comparisons in one orientation, so that
    /// `a = b` and `b = a` compare equal.
    fn oriented_conjuncts(&self) -> BTreeSet<Expr> {
        self.conjuncts().into_iter().map(orient).collect()
    }
}

fn orient(conjunct: Expr) -> Expr {
    match conjunct {
        Expr::Comparison { op, left, right }
            if op.is_symmetric()
                && left.as_symbol().is_some()
                && right.as_symbol().is_some()
                && right < left =>
        {
            Expr::Comparison {
                op,
                left: right,
                right: left,
            }
        }
        other => other,
    }
}

impl PartialEq for JoinGraphNode {
    fn eq(&self, other: &Self) -> bool {
        self.output_symbol_set() == other.output_symbol_set()
            && self.oriented_conjuncts() == other.oriented_conjuncts()
            && self.source_ids() == other.source_ids()
    }
}

impl Eq for JoinGraphNode {}

impl Hash for JoinGraphNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.output_symbol_set().hash(state);
        self.oriented_conjuncts().hash(state);
        self.source_ids().hash(state);
    }
}

/// Placeholder for the representative node of a memo group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupReference {
    pub id: PlanNodeId,
    pub group: GroupId,
    pub output_symbols: Vec<Symbol>,
}

/// Discriminant of a [`PlanNode`], used for rule pattern matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanNodeKind {
    TableScan,
    Values,
    Filter,
    Project,
    Join,
    Aggregation,
    Union,
    Limit,
    JoinGraph,
    GroupReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PlanNode {
    TableScan(TableScanNode),
    Values(ValuesNode),
    Filter(FilterNode),
    Project(ProjectNode),
    Join(JoinNode),
    Aggregation(AggregationNode),
    Union(UnionNode),
    Limit(LimitNode),
    JoinGraph(JoinGraphNode),
    GroupReference(GroupReference),
}

impl PlanNode {
    pub fn id(&self) -> PlanNodeId {
        match self {
            PlanNode::TableScan(n) => n.id,
            PlanNode::Values(n) => n.id,
            PlanNode::Filter(n) => n.id,
            PlanNode::Project(n) => n.id,
            PlanNode::Join(n) => n.id,
            PlanNode::Aggregation(n) => n.id,
            PlanNode::Union(n) => n.id,
            PlanNode::Limit(n) => n.id,
            PlanNode::JoinGraph(n) => n.id,
            PlanNode::GroupReference(n) => n.id,
        }
    }

    pub fn kind(&self) -> PlanNodeKind {
        match self {
            PlanNode::TableScan(_) => PlanNodeKind::TableScan,
            PlanNode::Values(_) => PlanNodeKind::Values,
            PlanNode::Filter(_) => PlanNodeKind::Filter,
            PlanNode::Project(_) => PlanNodeKind::Project,
            PlanNode::Join(_) => PlanNodeKind::Join,
            PlanNode::Aggregation(_) => PlanNodeKind::Aggregation,
            PlanNode::Union(_) => PlanNodeKind::Union,
            PlanNode::Limit(_) => PlanNodeKind::Limit,
            PlanNode::JoinGraph(_) => PlanNodeKind::JoinGraph,
            PlanNode::GroupReference(_) => PlanNodeKind::GroupReference,
        }
    }

    pub fn output_symbols(&self) -> Vec<Symbol> {
        match self {
            PlanNode::TableScan(n) => n.output_symbols.clone(),
            PlanNode::Values(n) => n.output_symbols.clone(),
            PlanNode::Filter(n) => n.source.output_symbols(),
            PlanNode::Project(n) => n.assignments.outputs(),
            PlanNode::Join(n) => n.output_symbols.clone(),
            PlanNode::Aggregation(n) => n
                .group_by
                .iter()
                .cloned()
                .chain(n.aggregations.iter().map(|(s, _)| s.clone()))
                .collect(),
            PlanNode::Union(n) => n.outputs.clone(),
            PlanNode::Limit(n) => n.source.output_symbols(),
            PlanNode::JoinGraph(n) => n.output_symbols.clone(),
            PlanNode::GroupReference(n) => n.output_symbols.clone(),
        }
    }

    pub fn output_symbol_set(&self) -> BTreeSet<Symbol> {
        self.output_symbols().into_iter().collect()
    }

    pub fn sources(&self) -> Vec<&PlanNode> {
        match self {
            PlanNode::TableScan(_) | PlanNode::Values(_) | PlanNode::GroupReference(_) => vec![],
            PlanNode::Filter(n) => vec![&n.source],
            PlanNode::Project(n) => vec![&n.source],
            PlanNode::Join(n) => vec![&n.left, &n.right],
            PlanNode::Aggregation(n) => vec![&n.source],
            PlanNode::Union(n) => n.sources.iter().collect(),
            PlanNode::Limit(n) => vec![&n.source],
            PlanNode::JoinGraph(n) => n.sources.iter().collect(),
        }
    }

    /// Same node with its sources replaced, in [`PlanNode::sources`] order.
    ///
    /// # Panics
    /// If the number of children differs from the number of sources.
    pub fn replace_children(&self, children: Vec<PlanNode>) -> PlanNode {
        assert_eq!(
            children.len(),
            self.sources().len(),
            "wrong number of children for plan node {}",
            self.id()
        );
        let mut children = children.into_iter();
        let mut next = |current: &PlanNode| {
            Box::new(children.next().unwrap_or_else(|| current.clone()))
        };
        match self {
            PlanNode::TableScan(_) | PlanNode::Values(_) | PlanNode::GroupReference(_) => {
                self.clone()
            }
            PlanNode::Filter(n) => PlanNode::Filter(FilterNode {
                source: next(n.source.as_ref()),
                ..n.clone()
            }),
            PlanNode::Project(n) => PlanNode::Project(ProjectNode {
                source: next(n.source.as_ref()),
                ..n.clone()
            }),
            PlanNode::Join(n) => {
                let left = next(n.left.as_ref());
                let right = next(n.right.as_ref());
                PlanNode::Join(JoinNode {
                    left,
                    right,
                    ..n.clone()
                })
            }
            PlanNode::Aggregation(n) => PlanNode::Aggregation(AggregationNode {
                source: next(n.source.as_ref()),
                ..n.clone()
            }),
            PlanNode::Union(n) => PlanNode::Union(UnionNode {
                sources: n.sources.iter().map(|s| *next(s)).collect(),
                ..n.clone()
            }),
            PlanNode::Limit(n) => PlanNode::Limit(LimitNode {
                source: next(n.source.as_ref()),
                ..n.clone()
            }),
            PlanNode::JoinGraph(n) => PlanNode::JoinGraph(JoinGraphNode {
                sources: n.sources.iter().map(|s| *next(s)).collect(),
                ..n.clone()
            }),
        }
    }

    /// Same node with a different id (children untouched).
    pub fn with_id(&self, id: PlanNodeId) -> PlanNode {
        let mut node = self.clone();
        match &mut node {
            PlanNode::TableScan(n) => n.id = id,
            PlanNode::Values(n) => n.id = id,
            PlanNode::Filter(n) => n.id = id,
            PlanNode::Project(n) => n.id = id,
            PlanNode::Join(n) => n.id = id,
            PlanNode::Aggregation(n) => n.id = id,
            PlanNode::Union(n) => n.id = id,
            PlanNode::Limit(n) => n.id = id,
            PlanNode::JoinGraph(n) => n.id = id,
            PlanNode::GroupReference(n) => n.id = id,
        }
        node
    }

    /// Render the subtree as an indented multi-line string.
    pub fn display(&self, indent: usize) -> String {
        let mut out = String::new();
        self.write_tree(&mut out, indent);
        out
    }

    fn write_tree(&self, out: &mut String, indent: usize) {
        out.push_str(&"  ".repeat(indent));
        out.push_str(&self.to_string());
        out.push('\n');
        for source in self.sources() {
            source.write_tree(out, indent + 1);
        }
    }
}

fn symbol_list(symbols: &[Symbol]) -> String {
    symbols
        .iter()
        .map(Symbol::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One-line description of the node itself (no children).
impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanNode::TableScan(n) => {
                write!(f, "TableScan[{}, outputs=[{}]", n.table, symbol_list(&n.output_symbols))?;
                if let Some(c) = &n.original_constraint {
                    write!(f, ", constraint={}", c)?;
                }
                write!(f, "]")
            }
            PlanNode::Values(n) => write!(
                f,
                "Values[outputs=[{}], rows={}]",
                symbol_list(&n.output_symbols),
                n.rows.len()
            ),
            PlanNode::Filter(n) => write!(f, "Filter[{}]", n.predicate),
            PlanNode::Project(n) => {
                let assignments: Vec<String> = n
                    .assignments
                    .iter()
                    .map(|(s, e)| format!("{} := {}", s, e))
                    .collect();
                write!(f, "Project[{}]", assignments.join(", "))
            }
            PlanNode::Join(n) => {
                let criteria: Vec<String> = n.criteria.iter().map(|c| c.to_string()).collect();
                write!(f, "Join[{:?}, criteria=[{}]", n.join_type, criteria.join(", "))?;
                if let Some(filter) = &n.filter {
                    write!(f, ", filter={}", filter)?;
                }
                if let Some(d) = n.distribution_type {
                    write!(f, ", distribution={:?}", d)?;
                }
                write!(f, "]")
            }
            PlanNode::Aggregation(n) => {
                let aggs: Vec<String> = n
                    .aggregations
                    .iter()
                    .map(|(s, a)| format!("{} := {:?}({})", s, a.function, symbol_list(&a.arguments)))
                    .collect();
                write!(
                    f,
                    "Aggregation[group_by=[{}], {}]",
                    symbol_list(&n.group_by),
                    aggs.join(", ")
                )
            }
            PlanNode::Union(n) => write!(f, "Union[outputs=[{}]]", symbol_list(&n.outputs)),
            PlanNode::Limit(n) => write!(f, "Limit[{}]", n.count),
            PlanNode::JoinGraph(n) => {
                let conjuncts: Vec<String> = n.conjuncts().iter().map(|e| e.to_string()).collect();
                write!(
                    f,
                    "JoinGraph[sources={}, conjuncts=[{}]]",
                    n.sources.len(),
                    conjuncts.join(", ")
                )
            }
            PlanNode::GroupReference(n) => write!(f, "GroupReference[{}]", n.group),
        }
    }
}
