use std::sync::Arc;

use super::query_spec::QuerySpec;
use super::table::TableInfo;

/// A query against exactly one document table
#[derive(Debug, Clone)]
pub struct QueriedDocTable {
    table: Arc<TableInfo>,
    query_spec: QuerySpec,
}

impl QueriedDocTable {
    pub fn new(table: Arc<TableInfo>, query_spec: QuerySpec) -> Self {
        Self { table, query_spec }
    }

    pub fn table(&self) -> &TableInfo {
        &self.table
    }

    pub fn table_arc(&self) -> Arc<TableInfo> {
        Arc::clone(&self.table)
    }

    pub fn query_spec(&self) -> &QuerySpec {
        &self.query_spec
    }
}

/// Relations handed over by the analyzer
#[derive(Debug, Clone)]
pub enum AnalyzedRelation {
    QueriedDocTable(QueriedDocTable),
    /// Select over several sources (joins); never planned as query-then-fetch
    MultiSource {
        sources: Vec<QueriedDocTable>,
        query_spec: QuerySpec,
    },
}

impl AnalyzedRelation {
    pub fn query_spec(&self) -> &QuerySpec {
        match self {
            AnalyzedRelation::QueriedDocTable(table) => table.query_spec(),
            AnalyzedRelation::MultiSource { query_spec, .. } => query_spec,
        }
    }
}
