//! Structural plan validation.
//!
//! [`validate_plan`] checks that every node only references symbols its
//! sources produce. The optimizer runs it on the input plan and on every
//! rule candidate; a failure names the offending node.

use crate::error::{OptimizerError, Result};
use crate::plan::PlanNode;
use crate::symbol::Symbol;
use std::collections::BTreeSet;

pub fn validate_plan(plan: &PlanNode) -> Result<()> {
    for source in plan.sources() {
        validate_plan(source)?;
    }
    validate_node(plan)
}

fn invalid(node: &PlanNode, message: String) -> OptimizerError {
    OptimizerError::InvalidPlan {
        node: node.id(),
        message,
    }
}

fn require(
    node: &PlanNode,
    what: &str,
    required: impl IntoIterator<Item = Symbol>,
    available: &BTreeSet<Symbol>,
) -> Result<()> {
    let missing: Vec<String> = required
        .into_iter()
        .filter(|s| !available.contains(s))
        .map(|s| s.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(invalid(
            node,
            format!("{} references unknown symbols [{}]", what, missing.join(", ")),
        ))
    }
}

fn validate_node(node: &PlanNode) -> Result<()> {
    let outputs = node.output_symbols();
    if outputs.iter().collect::<BTreeSet<_>>().len() != outputs.len() {
        return Err(invalid(node, "duplicate output symbols".to_string()));
    }

    match node {
        PlanNode::TableScan(scan) => {
            let assigned: BTreeSet<Symbol> = scan.assignments.keys().cloned().collect();
            require(node, "table scan output", scan.output_symbols.iter().cloned(), &assigned)
        }
        PlanNode::Values(values) => {
            let width = values.output_symbols.len();
            match values.rows.iter().position(|row| row.len() != width) {
                Some(i) => Err(invalid(
                    node,
                    format!(
                        "values row {} has {} columns, expected {}",
                        i,
                        values.rows[i].len(),
                        width
                    ),
                )),
                None => Ok(()),
            }
        }
        PlanNode::Filter(filter) => require(
            node,
            "filter predicate",
            filter.predicate.symbols(),
            &filter.source.output_symbol_set(),
        ),
        PlanNode::Project(project) => {
            let available = project.source.output_symbol_set();
            project
                .assignments
                .iter()
                .try_for_each(|(symbol, expr)| {
                    require(node, &format!("assignment {}", symbol), expr.symbols(), &available)
                })
        }
        PlanNode::Join(join) => {
            let left = join.left.output_symbol_set();
            let right = join.right.output_symbol_set();
            require(
                node,
                "join criteria (left side)",
                join.criteria.iter().map(|c| c.left.clone()),
                &left,
            )?;
            require(
                node,
                "join criteria (right side)",
                join.criteria.iter().map(|c| c.right.clone()),
                &right,
            )?;
            let both: BTreeSet<Symbol> = left.union(&right).cloned().collect();
            require(node, "join output", join.output_symbols.iter().cloned(), &both)?;
            match &join.filter {
                Some(filter) => require(node, "join filter", filter.symbols(), &both),
                None => Ok(()),
            }
        }
        PlanNode::Aggregation(agg) => {
            let available = agg.source.output_symbol_set();
            require(node, "grouping key", agg.group_by.iter().cloned(), &available)?;
            require(
                node,
                "aggregation argument",
                agg.aggregations
                    .iter()
                    .flat_map(|(_, a)| a.arguments.iter().cloned()),
                &available,
            )
        }
        PlanNode::Union(union) => {
            if union.inputs.len() != union.sources.len() {
                return Err(invalid(
                    node,
                    format!(
                        "union has {} sources but {} input mappings",
                        union.sources.len(),
                        union.inputs.len()
                    ),
                ));
            }
            for (i, (source, inputs)) in union.sources.iter().zip(&union.inputs).enumerate() {
                if inputs.len() != union.outputs.len() {
                    return Err(invalid(
                        node,
                        format!(
                            "union input {} maps {} symbols onto {} outputs",
                            i,
                            inputs.len(),
                            union.outputs.len()
                        ),
                    ));
                }
                require(
                    node,
                    &format!("union input {}", i),
                    inputs.iter().cloned(),
                    &source.output_symbol_set(),
                )?;
            }
            Ok(())
        }
        PlanNode::JoinGraph(graph) => {
            let available: BTreeSet<Symbol> = graph
                .sources
                .iter()
                .flat_map(|s| s.output_symbols())
                .collect();
            require(node, "join graph output", graph.output_symbols.iter().cloned(), &available)?;
            require(
                node,
                "join graph criteria",
                graph
                    .criteria
                    .iter()
                    .flat_map(|c| [c.left.clone(), c.right.clone()]),
                &available,
            )?;
            require(
                node,
                "join graph filter",
                graph.filters.iter().flat_map(|f| f.symbols()),
                &available,
            )
        }
        PlanNode::Limit(_) | PlanNode::GroupReference(_) => Ok(()),
    }
}
