//! Analyzed query model
//!
//! Everything in here is produced by the analysis layer and consumed
//! read-only by the planner and the execution engine.

pub mod query_spec;
pub mod relation;
pub mod symbol;
pub mod table;

pub use query_spec::{OrderBy, QuerySpec, WhereClause};
pub use relation::{AnalyzedRelation, QueriedDocTable};
pub use symbol::{Function, Reference, ReferenceIdent, Symbol};
pub use table::{
    sys_columns, ColumnIdent, RowGranularity, Routing, ShardId, ShardLocation, TableIdent,
    TableInfo, TableInfoBuilder,
};
