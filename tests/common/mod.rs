//! Common test utilities for query execution tests
//!
//! Provides shared helper functions for:
//! - Creating a seeded in-memory sharded table
//! - Planning selects with the query-then-fetch consumer
//! - Running plans with the local job executor

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use shardquery::analyze::{
    AnalyzedRelation, QueriedDocTable, QuerySpec, Symbol, TableIdent, TableInfo,
};
use shardquery::planner::{ConsumerContext, PlannerContext};
use shardquery::{
    DataType, ExecResult, ExecutionSettings, LocalJobExecutor, MemoryCluster, Plan,
    QueryThenFetchConsumer, Row,
};

pub const COORDINATOR: &str = "coordinator";

pub fn test_settings() -> ExecutionSettings {
    ExecutionSettings {
        node_id: COORDINATOR.to_string(),
        fetch_batch_size: 4,
        ..ExecutionSettings::default()
    }
}

/// A `doc.users` table with 4 shards on 2 nodes
pub struct TestTable {
    pub cluster: Arc<MemoryCluster>,
    pub table: Arc<TableInfo>,
}

impl TestTable {
    pub fn column(&self, name: &str) -> Symbol {
        Symbol::Reference(self.table.reference(name).expect("unknown column"))
    }

    pub fn plan(&self, spec: QuerySpec) -> ExecResult<Option<Plan>> {
        self.plan_with(spec, test_settings())
    }

    pub fn plan_with(&self, spec: QuerySpec, settings: ExecutionSettings) -> ExecResult<Option<Plan>> {
        let relation =
            AnalyzedRelation::QueriedDocTable(QueriedDocTable::new(Arc::clone(&self.table), spec));
        let mut ctx = ConsumerContext::new(PlannerContext::new(settings));
        QueryThenFetchConsumer::plan(&relation, &mut ctx)
    }

    pub async fn run(&self, spec: QuerySpec) -> ExecResult<Vec<Row>> {
        let plan = self.plan(spec)?.expect("query-then-fetch should apply");
        LocalJobExecutor::new(test_settings(), Arc::clone(&self.cluster))
            .execute(&plan)
            .await
    }
}

pub fn users() -> Vec<Value> {
    vec![
        json!({"name": "Alice", "age": 30, "dept": "eng"}),
        json!({"name": "Bob", "age": 25, "dept": "eng"}),
        json!({"name": "Charlie", "age": 35, "dept": "sales"}),
        json!({"name": "Diana", "age": 28, "dept": "marketing"}),
        json!({"name": "Eve", "age": 41, "dept": "sales"}),
        json!({"name": "Frank", "age": 22, "dept": "eng"}),
        json!({"name": "Grace", "age": 33, "dept": "marketing"}),
        json!({"name": "Heidi", "age": 29, "dept": "eng"}),
    ]
}

pub fn create_seeded_table() -> TestTable {
    let ident = TableIdent::new("doc", "users");
    let cluster = Arc::new(MemoryCluster::new());
    let routing = cluster
        .create_table(&ident, &["node-a", "node-b"], 4)
        .expect("Failed to create table");
    for user in users() {
        let id = user["name"].as_str().unwrap().to_lowercase();
        cluster.insert(&ident, &id, user).unwrap();
    }

    let table = TableInfo::builder(ident, routing)
        .add("name", DataType::String)
        .add("age", DataType::Long)
        .add("dept", DataType::String)
        .build();
    TestTable {
        cluster,
        table: Arc::new(table),
    }
}

pub fn names(rows: &[Row]) -> Vec<&str> {
    rows.iter().map(|r| r[0].as_str().unwrap()).collect()
}
