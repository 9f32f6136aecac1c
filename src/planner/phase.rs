//! Execution phases
//!
//! A phase is a unit of work shipped to one or more nodes: collecting
//! shards, merging their output, joining two inputs or fetching documents.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::projection::{output_types_of, Projection};
use crate::analyze::{OrderBy, Routing, ShardLocation, Symbol, WhereClause};
use crate::types::DataType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectPhase {
    pub job_id: Uuid,
    pub phase_id: u32,
    pub name: String,
    pub routing: Routing,
    pub where_clause: WhereClause,
    pub to_collect: Vec<Symbol>,
    pub projections: Vec<Projection>,
    pub order_by: Option<OrderBy>,
    /// Rows a single shard has to produce at most
    pub limit: Option<usize>,
    /// Shard readers stay open so a later fetch can resolve documents
    pub keep_context_for_fetcher: bool,
}

impl CollectPhase {
    pub fn execution_nodes(&self) -> BTreeSet<String> {
        self.routing.nodes().into_iter().collect()
    }

    pub fn output_types(&self) -> Vec<DataType> {
        let collected = self.to_collect.iter().map(Symbol::value_type).collect();
        output_types_of(collected, &self.projections)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePhase {
    pub job_id: Uuid,
    pub phase_id: u32,
    pub name: String,
    pub input_types: Vec<DataType>,
    pub num_upstreams: usize,
    pub projections: Vec<Projection>,
    /// Empty means the merge runs wherever the handler decides
    pub execution_nodes: BTreeSet<String>,
    /// Set when upstream rows arrive sorted and must be merged in order
    pub order_by: Option<OrderBy>,
}

impl MergePhase {
    pub fn is_sorted(&self) -> bool {
        self.order_by.is_some()
    }

    pub fn output_types(&self) -> Vec<DataType> {
        output_types_of(self.input_types.clone(), &self.projections)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestedLoopPhase {
    pub job_id: Uuid,
    pub phase_id: u32,
    pub name: String,
    pub left_types: Vec<DataType>,
    pub right_types: Vec<DataType>,
    pub projections: Vec<Projection>,
    pub execution_nodes: BTreeSet<String>,
}

impl NestedLoopPhase {
    pub fn output_types(&self) -> Vec<DataType> {
        let joined = self
            .left_types
            .iter()
            .chain(self.right_types.iter())
            .cloned()
            .collect();
        output_types_of(joined, &self.projections)
    }
}

/// Document lookup for previously collected shards. It has no execution
/// nodes of its own and never streams rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPhase {
    pub job_id: Uuid,
    pub phase_id: u32,
    pub collect_phase_ids: Vec<u32>,
    pub reader_nodes: BTreeMap<u32, String>,
    pub reader_shards: BTreeMap<u32, ShardLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionPhase {
    Collect(CollectPhase),
    Merge(MergePhase),
    NestedLoop(NestedLoopPhase),
    Fetch(FetchPhase),
}

impl ExecutionPhase {
    pub fn phase_id(&self) -> u32 {
        match self {
            ExecutionPhase::Collect(p) => p.phase_id,
            ExecutionPhase::Merge(p) => p.phase_id,
            ExecutionPhase::NestedLoop(p) => p.phase_id,
            ExecutionPhase::Fetch(p) => p.phase_id,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ExecutionPhase::Collect(_) => "CollectPhase",
            ExecutionPhase::Merge(_) => "MergePhase",
            ExecutionPhase::NestedLoop(_) => "NestedLoopPhase",
            ExecutionPhase::Fetch(_) => "FetchPhase",
        }
    }

    pub fn projections(&self) -> &[Projection] {
        match self {
            ExecutionPhase::Collect(p) => &p.projections,
            ExecutionPhase::Merge(p) => &p.projections,
            ExecutionPhase::NestedLoop(p) => &p.projections,
            ExecutionPhase::Fetch(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{TableIdent, TableInfo};
    use crate::planner::builder::ProjectionBuilder;

    #[test]
    fn test_collect_output_types_follow_projections() {
        let mut routing = Routing::new();
        routing.add("n1", "t", 0);
        routing.add("n2", "t", 1);
        let table = TableInfo::builder(TableIdent::new("doc", "t"), routing.clone())
            .add("a", DataType::Long)
            .add("b", DataType::String)
            .build();
        let a = Symbol::Reference(table.reference("a").unwrap());
        let b = Symbol::Reference(table.reference("b").unwrap());
        let to_collect = vec![a, b.clone()];

        let phase = CollectPhase {
            job_id: Uuid::new_v4(),
            phase_id: 1,
            name: "collect".to_string(),
            routing,
            where_clause: WhereClause::match_all(),
            projections: vec![ProjectionBuilder::top_n(&to_collect, None, 0, Some(3), Some(&[b]))],
            to_collect,
            order_by: None,
            limit: Some(3),
            keep_context_for_fetcher: false,
        };
        assert_eq!(phase.output_types(), vec![DataType::String]);
        assert_eq!(phase.execution_nodes().len(), 2);
    }

    #[test]
    fn test_nested_loop_types_concatenate() {
        let phase = NestedLoopPhase {
            job_id: Uuid::new_v4(),
            phase_id: 4,
            name: "nested-loop".to_string(),
            left_types: vec![DataType::Long],
            right_types: vec![DataType::String, DataType::Boolean],
            projections: vec![],
            execution_nodes: BTreeSet::new(),
        };
        assert_eq!(
            phase.output_types(),
            vec![DataType::Long, DataType::String, DataType::Boolean]
        );
        assert_eq!(ExecutionPhase::NestedLoop(phase).kind_name(), "NestedLoopPhase");
    }
}
