//! # Rule Patterns
//!
//! Each rule declares the node shapes it can transform. The optimizer checks the
//! pattern before calling [`crate::rule::Rule::apply`], so a rule never sees a
//! node it does not understand.
//!
//! Patterns only look at the node itself. Children inside the memo are group
//! references; a rule that cares about a child resolves it through the
//! [`crate::memo::Lookup`] in its context.

use crate::plan::{PlanNode, PlanNodeKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Any node.
    Any,
    /// A node of one kind.
    TypeOf(PlanNodeKind),
    /// A node matching at least one alternative.
    OneOf(Vec<Pattern>),
}

impl Pattern {
    pub fn type_of(kind: PlanNodeKind) -> Self {
        Pattern::TypeOf(kind)
    }

    pub fn one_of(kinds: impl IntoIterator<Item = PlanNodeKind>) -> Self {
        Pattern::OneOf(kinds.into_iter().map(Pattern::TypeOf).collect())
    }

    pub fn table_scan() -> Self {
        Pattern::TypeOf(PlanNodeKind::TableScan)
    }

    pub fn filter() -> Self {
        Pattern::TypeOf(PlanNodeKind::Filter)
    }

    pub fn project() -> Self {
        Pattern::TypeOf(PlanNodeKind::Project)
    }

    pub fn join() -> Self {
        Pattern::TypeOf(PlanNodeKind::Join)
    }

    pub fn join_graph() -> Self {
        Pattern::TypeOf(PlanNodeKind::JoinGraph)
    }

    pub fn aggregation() -> Self {
        Pattern::TypeOf(PlanNodeKind::Aggregation)
    }

    pub fn matches(&self, node: &PlanNode) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::TypeOf(kind) => node.kind() == *kind,
            Pattern::OneOf(alternatives) => alternatives.iter().any(|p| p.matches(node)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanNodeId, ValuesNode};

    fn values() -> PlanNode {
        PlanNode::Values(ValuesNode {
            id: PlanNodeId(0),
            output_symbols: vec![],
            rows: vec![],
        })
    }

    #[test]
    fn test_type_of() {
        assert!(Pattern::type_of(PlanNodeKind::Values).matches(&values()));
        assert!(!Pattern::join().matches(&values()));
        assert!(Pattern::Any.matches(&values()));
    }

    #[test]
    fn test_one_of() {
        let pattern = Pattern::one_of([PlanNodeKind::Join, PlanNodeKind::Values]);
        assert!(pattern.matches(&values()));
        assert!(!Pattern::one_of([PlanNodeKind::Join, PlanNodeKind::JoinGraph]).matches(&values()));
        assert!(!Pattern::OneOf(vec![]).matches(&values()));
    }
}
