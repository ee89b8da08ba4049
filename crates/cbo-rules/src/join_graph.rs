//! Flattening of inner-join trees into a [`JoinGraphNode`].
//!
//! A tree of inner joins is one n-ary join whose sources may be combined in any
//! order. The builder walks down from a join, through the memo, absorbing every
//! inner join whose residual filter is deterministic; anything else becomes an
//! opaque source and is kept as the group reference it was found as.
//!
//! ```text
//! Join[a = c]                     JoinGraph
//!   Join[a = b]          →          sources  [A, B, C]
//!     A      B                      criteria [a = b, a = c]
//!   C
//! ```

use cbo_core::expr::Expr;
use cbo_core::memo::Lookup;
use cbo_core::plan::{EquiJoinClause, JoinGraphNode, JoinNode, JoinType, PlanNode, PlanNodeId};

/// Whether `join` may be absorbed into a join graph.
pub fn is_reorderable(join: &JoinNode) -> bool {
    join.join_type == JoinType::Inner
        && join.filter.as_ref().map_or(true, Expr::is_deterministic)
}

struct JoinGraphBuilder<'a> {
    lookup: &'a dyn Lookup,
    sources: Vec<PlanNode>,
    criteria: Vec<EquiJoinClause>,
    filters: Vec<Expr>,
}

impl JoinGraphBuilder<'_> {
    fn flatten(&mut self, node: &PlanNode) {
        match self.lookup.resolve(node) {
            PlanNode::Join(join) if is_reorderable(join) => self.absorb(join),
            _ => self.sources.push(node.clone()),
        }
    }

    fn absorb(&mut self, join: &JoinNode) {
        self.flatten(&join.left);
        self.flatten(&join.right);
        self.criteria.extend(join.criteria.iter().cloned());
        if let Some(filter) = &join.filter {
            self.filters.extend(filter.extract_conjuncts());
        }
    }
}

/// Join graph of the inner-join tree rooted at `join`, producing the join's
/// output symbols.
///
/// `join` itself is absorbed unconditionally; callers check
/// [`is_reorderable`] first.
pub fn build_join_graph(join: &JoinNode, lookup: &dyn Lookup, id: PlanNodeId) -> JoinGraphNode {
    let mut builder = JoinGraphBuilder {
        lookup,
        sources: Vec::new(),
        criteria: Vec::new(),
        filters: Vec::new(),
    };
    builder.absorb(join);
    JoinGraphNode {
        id,
        sources: builder.sources,
        criteria: builder.criteria,
        filters: builder.filters,
        output_symbols: join.output_symbols.clone(),
    }
}
