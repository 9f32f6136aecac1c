use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::query_spec::OrderBy;
use super::symbol::{Reference, ReferenceIdent};
use crate::error::{ExecError, ExecResult};
use crate::types::DataType;

/// Identifies a specific shard of an index
pub type ShardId = u16;

/// Granularity at which a value or projection operates. Ordered from the
/// coarsest to the finest level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowGranularity {
    Cluster,
    Node,
    Shard,
    Doc,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableIdent {
    pub schema: String,
    pub name: String,
}

impl TableIdent {
    pub const DEFAULT_SCHEMA: &'static str = "doc";

    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    pub fn fqn(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Name of the physical index backing the table
    pub fn index_name(&self) -> String {
        if self.schema == Self::DEFAULT_SCHEMA {
            self.name.clone()
        } else {
            self.fqn()
        }
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnIdent {
    pub name: String,
    pub path: Vec<String>,
}

impl ColumnIdent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: Vec::new(),
        }
    }

    pub fn with_path(name: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }

    /// Dotted name, e.g. `address.city`
    pub fn fqn(&self) -> String {
        if self.path.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.path.join("."))
        }
    }

    pub fn is_system_column(&self) -> bool {
        self.name.starts_with('_')
    }
}

impl fmt::Display for ColumnIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqn())
    }
}

/// Columns every document table exposes
pub mod sys_columns {
    use super::ColumnIdent;
    use crate::types::DataType;

    pub const DOCID: &str = "_docid";
    pub const SCORE: &str = "_score";
    pub const VERSION: &str = "_version";
    pub const ID: &str = "_id";
    pub const DOC: &str = "_doc";

    pub fn all() -> Vec<(ColumnIdent, DataType)> {
        vec![
            (ColumnIdent::new(DOCID), DataType::Long),
            (ColumnIdent::new(SCORE), DataType::Double),
            (ColumnIdent::new(VERSION), DataType::Long),
            (ColumnIdent::new(ID), DataType::String),
            (ColumnIdent::new(DOC), DataType::Object),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardLocation {
    pub node: String,
    pub index: String,
    pub shard: ShardId,
}

impl fmt::Display for ShardLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.node, self.index, self.shard)
    }
}

/// Where the shards of a table live: node id -> index name -> shard ids
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    locations: BTreeMap<String, BTreeMap<String, Vec<ShardId>>>,
}

impl Routing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: impl Into<String>, index: impl Into<String>, shard: ShardId) {
        let shards = self
            .locations
            .entry(node.into())
            .or_default()
            .entry(index.into())
            .or_default();
        if !shards.contains(&shard) {
            shards.push(shard);
            shards.sort_unstable();
        }
    }

    pub fn nodes(&self) -> Vec<String> {
        self.locations.keys().cloned().collect()
    }

    pub fn shards_on(&self, node: &str) -> Vec<ShardLocation> {
        self.locations
            .get(node)
            .map(|indices| {
                indices
                    .iter()
                    .flat_map(|(index, shards)| {
                        shards.iter().map(move |shard| ShardLocation {
                            node: node.to_string(),
                            index: index.clone(),
                            shard: *shard,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_shards(&self) -> Vec<ShardLocation> {
        self.locations
            .keys()
            .flat_map(|node| self.shards_on(node))
            .collect()
    }

    pub fn shard_count(&self) -> usize {
        self.locations
            .values()
            .flat_map(|indices| indices.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shard_count() == 0
    }
}

/// Catalog information about a document table
#[derive(Debug, Clone)]
pub struct TableInfo {
    ident: TableIdent,
    columns: Vec<Reference>,
    partitioned_by: Vec<ColumnIdent>,
    references: BTreeMap<ColumnIdent, Reference>,
    number_of_shards: u16,
    routing: Routing,
}

impl TableInfo {
    pub fn builder(ident: TableIdent, routing: Routing) -> TableInfoBuilder {
        TableInfoBuilder::new(ident, routing)
    }

    pub fn ident(&self) -> &TableIdent {
        &self.ident
    }

    /// User defined columns, in declaration order
    pub fn columns(&self) -> &[Reference] {
        &self.columns
    }

    pub fn number_of_shards(&self) -> u16 {
        self.number_of_shards
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn get_reference(&self, column: &ColumnIdent) -> Option<&Reference> {
        self.references.get(column)
    }

    /// Look up a top-level column by name
    pub fn reference(&self, name: &str) -> ExecResult<Reference> {
        self.get_reference(&ColumnIdent::new(name))
            .cloned()
            .ok_or_else(|| {
                ExecError::Validation(format!(
                    "Column '{}' unknown in table '{}'",
                    name, self.ident
                ))
            })
    }

    pub fn is_partitioned_by(&self, column: &ColumnIdent) -> bool {
        self.partitioned_by.contains(column)
    }

    pub fn partitioned_by_columns(&self) -> Vec<Reference> {
        self.partitioned_by
            .iter()
            .filter_map(|c| self.references.get(c).cloned())
            .collect()
    }

    pub fn validate_order_by(&self, order_by: &OrderBy) -> ExecResult<()> {
        for symbol in order_by.symbols() {
            let data_type = symbol.value_type();
            if !data_type.is_orderable() {
                return Err(ExecError::Validation(format!(
                    "Cannot ORDER BY '{}': invalid data type '{}'",
                    symbol, data_type
                )));
            }
        }
        Ok(())
    }
}

pub struct TableInfoBuilder {
    ident: TableIdent,
    routing: Routing,
    columns: Vec<Reference>,
    partitioned_by: Vec<ColumnIdent>,
    number_of_shards: Option<u16>,
}

impl TableInfoBuilder {
    pub fn new(ident: TableIdent, routing: Routing) -> Self {
        Self {
            ident,
            routing,
            columns: Vec::new(),
            partitioned_by: Vec::new(),
            number_of_shards: None,
        }
    }

    pub fn add(mut self, column: &str, data_type: DataType) -> Self {
        self.columns.push(Reference::new(
            ReferenceIdent::new(self.ident.clone(), ColumnIdent::new(column)),
            RowGranularity::Doc,
            data_type,
        ));
        self
    }

    /// Add a column whose value is derived from the partition a row lives in
    pub fn add_partitioned(mut self, column: &str, data_type: DataType) -> Self {
        let ident = ColumnIdent::new(column);
        self.columns.push(Reference::new(
            ReferenceIdent::new(self.ident.clone(), ident.clone()),
            RowGranularity::Shard,
            data_type,
        ));
        self.partitioned_by.push(ident);
        self
    }

    pub fn number_of_shards(mut self, shards: u16) -> Self {
        self.number_of_shards = Some(shards);
        self
    }

    pub fn build(self) -> TableInfo {
        let mut references = BTreeMap::new();
        for (column, data_type) in sys_columns::all() {
            let reference = Reference::new(
                ReferenceIdent::new(self.ident.clone(), column.clone()),
                RowGranularity::Doc,
                data_type,
            );
            references.insert(column, reference);
        }
        for column in &self.columns {
            references.insert(column.ident.column.clone(), column.clone());
        }
        let number_of_shards = self
            .number_of_shards
            .unwrap_or_else(|| self.routing.shard_count().max(1) as u16);

        TableInfo {
            ident: self.ident,
            columns: self.columns,
            partitioned_by: self.partitioned_by,
            references,
            number_of_shards,
            routing: self.routing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::symbol::Symbol;

    fn routing() -> Routing {
        let mut routing = Routing::new();
        routing.add("n1", "users", 0);
        routing.add("n1", "users", 1);
        routing.add("n2", "users", 2);
        routing
    }

    #[test]
    fn test_routing_shards() {
        let routing = routing();
        assert_eq!(routing.nodes(), vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(routing.shard_count(), 3);
        let on_n1 = routing.shards_on("n1");
        assert_eq!(on_n1.len(), 2);
        assert_eq!(on_n1[1].to_string(), "n1/users/1");
        assert!(routing.shards_on("n3").is_empty());
    }

    #[test]
    fn test_builder_adds_system_columns() {
        let table = TableInfo::builder(TableIdent::new("doc", "users"), routing())
            .add("name", DataType::String)
            .add_partitioned("day", DataType::Long)
            .build();

        assert_eq!(table.number_of_shards(), 3);
        assert!(table.get_reference(&ColumnIdent::new("_docid")).is_some());
        assert_eq!(table.columns().len(), 2);
        assert!(table.is_partitioned_by(&ColumnIdent::new("day")));
        assert_eq!(table.partitioned_by_columns().len(), 1);
        assert!(table.reference("missing").is_err());
    }

    #[test]
    fn test_validate_order_by_rejects_objects() {
        let table = TableInfo::builder(TableIdent::new("doc", "users"), routing())
            .add("name", DataType::String)
            .add("details", DataType::Object)
            .build();

        let ok = OrderBy::asc(Symbol::Reference(table.reference("name").unwrap()));
        assert!(table.validate_order_by(&ok).is_ok());

        let bad = OrderBy::asc(Symbol::Reference(table.reference("details").unwrap()));
        assert!(matches!(
            table.validate_order_by(&bad),
            Err(ExecError::Validation(_))
        ));
    }
}
