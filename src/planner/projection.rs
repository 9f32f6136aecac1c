//! Declarative projections
//!
//! A projection describes one row transformation step. Lists of projections
//! are applied in order; each one turns the column types of its input into
//! the column types of its output.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::analyze::{OrderBy, Reference, RowGranularity, ShardLocation, Symbol};
use crate::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateMode {
    /// Raw input rows in, final values out
    IterFinal,
    /// Raw input rows in, partial states out
    IterPartial,
    /// Partial states in, final values out
    PartialFinal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// One of count, sum, min, max, avg
    pub function: String,
    /// `None` counts rows
    pub input: Option<Symbol>,
    pub return_type: DataType,
    pub mode: AggregateMode,
}

impl Aggregation {
    pub fn new(
        function: &str,
        input: Option<Symbol>,
        return_type: DataType,
        mode: AggregateMode,
    ) -> Self {
        Self {
            function: function.to_lowercase(),
            input,
            return_type,
            mode,
        }
    }

    pub fn output_type(&self) -> DataType {
        match self.mode {
            AggregateMode::IterPartial => self.partial_type(),
            AggregateMode::IterFinal | AggregateMode::PartialFinal => self.return_type.clone(),
        }
    }

    /// Type of the intermediate state shipped between shard and node
    pub fn partial_type(&self) -> DataType {
        match self.function.as_str() {
            "count" => DataType::Long,
            "avg" => DataType::Array(Box::new(DataType::Double)),
            _ => self.return_type.clone(),
        }
    }
}

/// Resolves output columns by document id after the result was bounded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchProjection {
    pub collect_phase_id: u32,
    /// Column of the input row holding the encoded `_docid`
    pub doc_id_column: usize,
    pub collect_symbols: Vec<Symbol>,
    /// Evaluated against the input row plus the fetched document
    pub output_symbols: Vec<Symbol>,
    pub partitioned_by: Vec<Reference>,
    pub execution_nodes: BTreeSet<String>,
    pub is_limited: bool,
    pub reader_nodes: BTreeMap<u32, String>,
    pub reader_shards: BTreeMap<u32, ShardLocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowDefinition {
    pub partition_by: Vec<Symbol>,
    pub order_by: Option<OrderBy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProjectionKind {
    Filter {
        condition: Symbol,
    },
    TopN {
        offset: usize,
        limit: Option<usize>,
        order_by: Option<OrderBy>,
        outputs: Vec<Symbol>,
    },
    /// Sorted merge of everything received from the upstreams
    Merge {
        order_by: OrderBy,
    },
    Fetch(FetchProjection),
    Aggregation {
        group_keys: Vec<Symbol>,
        aggregations: Vec<Aggregation>,
    },
    /// Appends one column per window function
    Window {
        definition: WindowDefinition,
        functions: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    kind: ProjectionKind,
    granularity: RowGranularity,
}

impl Projection {
    pub fn new(kind: ProjectionKind) -> Self {
        Self {
            kind,
            granularity: RowGranularity::Cluster,
        }
    }

    pub fn filter(condition: Symbol) -> Self {
        Self::new(ProjectionKind::Filter { condition })
    }

    pub fn top_n(
        offset: usize,
        limit: Option<usize>,
        order_by: Option<OrderBy>,
        outputs: Vec<Symbol>,
    ) -> Self {
        Self::new(ProjectionKind::TopN {
            offset,
            limit,
            order_by,
            outputs,
        })
    }

    pub fn merge(order_by: OrderBy) -> Self {
        Self::new(ProjectionKind::Merge { order_by })
    }

    pub fn fetch(fetch: FetchProjection) -> Self {
        Self::new(ProjectionKind::Fetch(fetch))
    }

    pub fn aggregation(group_keys: Vec<Symbol>, aggregations: Vec<Aggregation>) -> Self {
        Self::new(ProjectionKind::Aggregation {
            group_keys,
            aggregations,
        })
    }

    pub fn window(definition: WindowDefinition, functions: Vec<String>) -> Self {
        Self::new(ProjectionKind::Window {
            definition,
            functions,
        })
    }

    pub fn with_granularity(mut self, granularity: RowGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Run this projection once per shard instead of on the merging node
    pub fn on_shard(self) -> Self {
        self.with_granularity(RowGranularity::Shard)
    }

    pub fn kind(&self) -> &ProjectionKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut ProjectionKind {
        &mut self.kind
    }

    pub fn required_granularity(&self) -> RowGranularity {
        self.granularity
    }

    pub fn is_shard_level(&self) -> bool {
        self.granularity == RowGranularity::Shard
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            ProjectionKind::Filter { .. } => "filter",
            ProjectionKind::TopN { .. } => "topN",
            ProjectionKind::Merge { .. } => "merge",
            ProjectionKind::Fetch(_) => "fetch",
            ProjectionKind::Aggregation { .. } => "aggregation",
            ProjectionKind::Window { .. } => "window",
        }
    }

    pub fn output_types(&self, input: &[DataType]) -> Vec<DataType> {
        match &self.kind {
            ProjectionKind::Filter { .. } | ProjectionKind::Merge { .. } => input.to_vec(),
            ProjectionKind::TopN { outputs, .. } => {
                outputs.iter().map(Symbol::value_type).collect()
            }
            ProjectionKind::Fetch(fetch) => fetch
                .output_symbols
                .iter()
                .map(Symbol::value_type)
                .collect(),
            ProjectionKind::Aggregation {
                group_keys,
                aggregations,
            } => group_keys
                .iter()
                .map(Symbol::value_type)
                .chain(aggregations.iter().map(Aggregation::output_type))
                .collect(),
            ProjectionKind::Window { functions, .. } => {
                let mut types = input.to_vec();
                types.extend(functions.iter().map(|_| DataType::Long));
                types
            }
        }
    }
}

/// Fold `input` through every projection of the list
pub fn output_types_of(input: Vec<DataType>, projections: &[Projection]) -> Vec<DataType> {
    projections
        .iter()
        .fold(input, |types, projection| projection.output_types(&types))
}
