//! End-to-end join reordering through the iterative optimizer.
//!
//! Tables carry row counts only, so every join clause is estimated with the
//! unknown-filter coefficient and every value is 8 bytes wide. That keeps the
//! expected costs easy to derive by hand:
//!
//! - join local cost: `cpu = left + right + output`, `memory = right`,
//!   `network = left + right` (bytes)
//! - total: `cpu + memory + 10 × network`
//!
//! ## What These Tests Verify
//! - A join graph over three equal tables nests two sources first and keeps the
//!   first of two equally cheap orders
//! - A written join order is replaced when a strictly cheaper one exists
//! - Outer joins are opaque to reordering
//! - The rule is skipped when the session disables it

use cbo_core::catalog::{InMemoryMetadata, TableRef, TableStatistics};
use cbo_core::config::OptimizerConfig;
use cbo_core::cost::DefaultCostCalculator;
use cbo_core::optimizer::IterativeOptimizer;
use cbo_core::plan::{DistributionType, EquiJoinClause, JoinNode, JoinType, PlanNode};
use cbo_core::plan_builder::PlanBuilder;
use cbo_core::stats::calculator::DefaultStatsCalculator;
use cbo_core::symbol::{Symbol, Type};
use cbo_core::validate::validate_plan;
use cbo_core::Session;
use cbo_rules::default_rule_registry;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

struct Scenario {
    builder: PlanBuilder,
    metadata: InMemoryMetadata,
}

impl Scenario {
    fn new() -> Self {
        init_tracing();
        Self {
            builder: PlanBuilder::new(),
            metadata: InMemoryMetadata::new(),
        }
    }

    /// Scan of a single-column table with `rows` rows.
    fn table(&mut self, name: &str, rows: f64) -> (Symbol, PlanNode) {
        let table = TableRef::new("tiny", name);
        self.metadata.add_table(&table, TableStatistics::new(rows));
        let symbol = self.builder.symbol(&format!("{name}1"), Type::Bigint);
        let scan = self.builder.table_scan(table, &[(symbol.clone(), "k")]);
        (symbol, scan)
    }

    fn optimize(mut self, plan: PlanNode, session: &Session) -> PlanNode {
        let optimizer = IterativeOptimizer::new(
            Arc::new(default_rule_registry()),
            Arc::new(DefaultStatsCalculator::new(Arc::new(self.metadata))),
            Arc::new(DefaultCostCalculator::new()),
        );
        let (symbols, ids) = self.builder.allocators();
        let optimized = optimizer
            .optimize(plan, session, symbols, ids)
            .expect("optimization succeeds");
        validate_plan(&optimized).expect("optimized plan is valid");
        optimized
    }
}

fn as_join(node: &PlanNode) -> &JoinNode {
    match node {
        PlanNode::Join(join) => join,
        other => panic!("expected a join, got:\n{other}"),
    }
}

fn scanned_table(node: &PlanNode) -> &str {
    match node {
        PlanNode::TableScan(scan) => &scan.table.name,
        other => panic!("expected a table scan, got:\n{other}"),
    }
}

fn clause(left: &Symbol, right: &Symbol) -> EquiJoinClause {
    EquiJoinClause::new(left.clone(), right.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_join_graph_nests_first_two_sources() {
    let mut s = Scenario::new();
    let (a1, a) = s.table("a", 1000.0);
    let (b1, b) = s.table("b", 1000.0);
    let (c1, c) = s.table("c", 1000.0);
    let graph = s.builder.join_graph(
        vec![a, b, c],
        vec![clause(&a1, &b1), clause(&b1, &c1), clause(&a1, &c1)],
        vec![],
        vec![a1.clone(), b1.clone(), c1.clone()],
    );

    let plan = s.optimize(graph, &Session::default());

    // (a ⋈ b) ⋈ c and (a ⋈ c) ⋈ b cost the same; a ⋈ (b ⋈ c) reads the
    // intermediate result on the right and costs more
    let top = as_join(&plan);
    assert_eq!(top.distribution_type, Some(DistributionType::Partitioned));
    assert_eq!(top.criteria, vec![clause(&b1, &c1), clause(&a1, &c1)]);
    assert_eq!(top.output_symbols, vec![a1.clone(), b1.clone(), c1]);
    assert_eq!(scanned_table(&top.right), "c");

    let bottom = as_join(&top.left);
    assert_eq!(bottom.criteria, vec![clause(&a1, &b1)]);
    assert_eq!(scanned_table(&bottom.left), "a");
    assert_eq!(scanned_table(&bottom.right), "b");
}

#[test]
fn test_join_tree_is_replaced_by_cheaper_order() {
    let mut s = Scenario::new();
    let (a1, a) = s.table("a", 100.0);
    let (b1, b) = s.table("b", 10.0);
    let (c1, c) = s.table("c", 1000.0);
    // (a ⋈ c) ⋈ b: the large table joins first
    let ac = s.builder.join(JoinType::Inner, a, c, vec![clause(&a1, &c1)], None);
    let acb = s.builder.join(JoinType::Inner, ac, b, vec![clause(&a1, &b1)], None);

    let plan = s.optimize(acb, &Session::default());

    let top = as_join(&plan);
    assert_eq!(top.distribution_type, Some(DistributionType::Partitioned));
    assert_eq!(top.output_symbols, vec![a1.clone(), c1.clone(), b1.clone()]);
    assert_eq!(top.criteria, vec![clause(&a1, &c1)]);
    assert_eq!(scanned_table(&top.right), "c");

    let bottom = as_join(&top.left);
    assert_eq!(bottom.criteria, vec![clause(&a1, &b1)]);
    assert_eq!(scanned_table(&bottom.left), "a");
    assert_eq!(scanned_table(&bottom.right), "b");
}

#[test]
fn test_outer_join_is_not_reordered() {
    let mut s = Scenario::new();
    let (a1, a) = s.table("a", 100.0);
    let (b1, b) = s.table("b", 10.0);
    let (c1, c) = s.table("c", 1000.0);
    let ab = s.builder.join(JoinType::Left, a, b, vec![clause(&a1, &b1)], None);
    let abc = s.builder.join(JoinType::Inner, ab, c, vec![clause(&a1, &c1)], None);

    let plan = s.optimize(abc, &Session::default());

    // two sources: the outer join and c, already in the only possible order
    let top = as_join(&plan);
    assert_eq!(top.distribution_type, None);
    let outer = as_join(&top.left);
    assert_eq!(outer.join_type, JoinType::Left);
    assert_eq!(scanned_table(&top.right), "c");
}

#[test]
fn test_reordering_disabled_by_session() {
    let mut s = Scenario::new();
    let (a1, a) = s.table("a", 100.0);
    let (b1, b) = s.table("b", 10.0);
    let (c1, c) = s.table("c", 1000.0);
    let ac = s.builder.join(JoinType::Inner, a, c, vec![clause(&a1, &c1)], None);
    let acb = s.builder.join(JoinType::Inner, ac, b, vec![clause(&a1, &b1)], None);
    let session = Session::new(
        "no-reorder",
        OptimizerConfig::from_json(r#"{ "join_reordering_enabled": false }"#).unwrap(),
    );

    let plan = s.optimize(acb, &session);

    let top = as_join(&plan);
    assert_eq!(top.distribution_type, None);
    assert_eq!(scanned_table(&top.right), "b");
    let bottom = as_join(&top.left);
    assert_eq!(scanned_table(&bottom.left), "a");
    assert_eq!(scanned_table(&bottom.right), "c");
}
