//! Collect sources
//!
//! An in-memory sharded document store with the two collaborators the
//! engine consumes: a [`ShardCollector`] that pushes the matching rows of
//! one shard into a projector, and a [`DocFetcher`] that resolves encoded
//! document ids after the result was bounded.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use super::input::{evaluate, evaluate_all, to_bool, DocumentContext};
use super::projectors::Projector;
use super::sort::RowComparator;
use crate::analyze::{Routing, ShardId, ShardLocation, TableIdent};
use crate::error::{ExecError, ExecResult};
use crate::planner::phase::CollectPhase;

/// A stored document as seen by a shard reader
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    /// Position of the document inside its shard
    pub local_doc_id: u32,
    pub version: i64,
    pub score: f64,
    pub source: Value,
}

/// Pack a reader id and a shard-local doc id into one `_docid` value
pub fn encode_doc_id(reader_id: u32, local_doc_id: u32) -> i64 {
    ((reader_id as i64) << 32) | local_doc_id as i64
}

pub fn decode_doc_id(doc_id: i64) -> (u32, u32) {
    ((doc_id >> 32) as u32, (doc_id & 0xFFFF_FFFF) as u32)
}

/// Resolves documents by reader id and shard-local doc id. Documents that
/// no longer exist are left out of the returned map.
pub trait DocFetcher: Send + Sync {
    fn fetch(&self, reader_id: u32, doc_ids: &[u32]) -> ExecResult<HashMap<u32, Value>>;
}

/// Pushes the rows of one shard into a projector
pub trait ShardCollector: Send + Sync {
    /// Returns the number of rows pushed. Stops early when the downstream
    /// asks for no more rows. Does not report completion to `downstream`.
    fn collect_shard(
        &self,
        location: &ShardLocation,
        reader_id: u32,
        phase: &CollectPhase,
        downstream: &Projector,
    ) -> ExecResult<u64>;
}

#[derive(Debug, Default)]
struct ShardDocs {
    docs: Vec<Document>,
    /// `_id` to local doc id
    ids: HashMap<String, u32>,
}

/// Documents of one shard
#[derive(Debug)]
pub struct MemoryShard {
    location: ShardLocation,
    docs: RwLock<ShardDocs>,
}

impl MemoryShard {
    pub fn new(location: ShardLocation) -> Self {
        Self {
            location,
            docs: RwLock::new(ShardDocs::default()),
        }
    }

    pub fn location(&self) -> &ShardLocation {
        &self.location
    }

    /// Insert or replace a document. Replacing keeps the local doc id and
    /// bumps the version.
    pub fn upsert(&self, id: &str, source: Value) -> u32 {
        let mut shard = self.docs.write();
        let ShardDocs { docs, ids } = &mut *shard;
        if let Some(&local_doc_id) = ids.get(id) {
            let doc = &mut docs[local_doc_id as usize];
            doc.version += 1;
            doc.source = source;
            return local_doc_id;
        }
        let local_doc_id = docs.len() as u32;
        ids.insert(id.to_string(), local_doc_id);
        docs.push(Document {
            id: id.to_string(),
            local_doc_id,
            version: 1,
            score: 1.0,
            source,
        });
        local_doc_id
    }

    pub fn get(&self, local_doc_id: u32) -> Option<Document> {
        self.docs.read().docs.get(local_doc_id as usize).cloned()
    }

    /// Point-in-time copy of every document
    pub fn snapshot(&self) -> Vec<Document> {
        self.docs.read().docs.clone()
    }

    pub fn len(&self) -> usize {
        self.docs.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sharded tables spread over a set of logical nodes, all held in memory
#[derive(Debug, Default)]
pub struct MemoryCluster {
    tables: RwLock<BTreeMap<String, Vec<Arc<MemoryShard>>>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the shards of a table, assigning shard `i` to
    /// `nodes[i % nodes.len()]`, and return their routing.
    pub fn create_table(
        &self,
        ident: &TableIdent,
        nodes: &[&str],
        number_of_shards: u16,
    ) -> ExecResult<Routing> {
        if nodes.is_empty() || number_of_shards == 0 {
            return Err(ExecError::Configuration(format!(
                "Table {} needs at least one node and one shard",
                ident
            )));
        }
        let index = ident.index_name();
        let mut tables = self.tables.write();
        if tables.contains_key(&index) {
            return Err(ExecError::Configuration(format!(
                "Table {} already exists",
                ident
            )));
        }

        let mut routing = Routing::new();
        let shards = (0..number_of_shards)
            .map(|shard| {
                let node = nodes[shard as usize % nodes.len()];
                routing.add(node, index.clone(), shard);
                Arc::new(MemoryShard::new(ShardLocation {
                    node: node.to_string(),
                    index: index.clone(),
                    shard,
                }))
            })
            .collect();
        tables.insert(index, shards);
        tracing::debug!("Created table {} with {} shards", ident, number_of_shards);
        Ok(routing)
    }

    /// Route a document to its shard by id and store it there
    pub fn insert(&self, ident: &TableIdent, id: &str, source: Value) -> ExecResult<ShardLocation> {
        let tables = self.tables.read();
        let shards = tables
            .get(&ident.index_name())
            .ok_or_else(|| ExecError::Execution(format!("Unknown table {}", ident)))?;
        let shard = &shards[route(id, shards.len() as u16) as usize];
        shard.upsert(id, source);
        Ok(shard.location().clone())
    }

    pub fn shard(&self, location: &ShardLocation) -> ExecResult<Arc<MemoryShard>> {
        self.tables
            .read()
            .get(&location.index)
            .and_then(|shards| shards.get(location.shard as usize))
            .filter(|shard| shard.location() == location)
            .cloned()
            .ok_or_else(|| ExecError::Execution(format!("Shard {} is not available", location)))
    }

    pub fn document_count(&self, ident: &TableIdent) -> usize {
        self.tables
            .read()
            .get(&ident.index_name())
            .map(|shards| shards.iter().map(|s| s.len()).sum())
            .unwrap_or(0)
    }
}

/// Shard a document id belongs to
pub fn route(id: &str, number_of_shards: u16) -> ShardId {
    if number_of_shards == 0 {
        return 0;
    }
    (seahash::hash(id.as_bytes()) % number_of_shards as u64) as ShardId
}

/// Evaluates the where clause and the collect symbols of a collect phase
/// against the documents of a [`MemoryCluster`] shard. Applies the
/// per-shard order and limit before pushing.
pub struct DocCollector {
    cluster: Arc<MemoryCluster>,
}

impl DocCollector {
    pub fn new(cluster: Arc<MemoryCluster>) -> Self {
        Self { cluster }
    }
}

impl ShardCollector for DocCollector {
    fn collect_shard(
        &self,
        location: &ShardLocation,
        reader_id: u32,
        phase: &CollectPhase,
        downstream: &Projector,
    ) -> ExecResult<u64> {
        if phase.where_clause.is_no_match() {
            return Ok(0);
        }
        let shard = self.cluster.shard(location)?;
        let comparator = phase.order_by.as_ref().map(RowComparator::new);

        let mut rows = Vec::new();
        for doc in shard.snapshot() {
            let ctx = DocumentContext::new(&doc, reader_id);
            if let Some(query) = phase.where_clause.query() {
                if !to_bool(&evaluate(query, &ctx)?) {
                    continue;
                }
            }
            let keys = match &phase.order_by {
                Some(order_by) => evaluate_all(order_by.symbols(), &ctx)?,
                None => Vec::new(),
            };
            rows.push((keys, evaluate_all(&phase.to_collect, &ctx)?));
        }

        if let Some(comparator) = &comparator {
            rows.sort_by(|(a, _), (b, _)| comparator.compare_keys(a, b));
        }
        if let Some(limit) = phase.limit {
            rows.truncate(limit);
        }

        let mut pushed = 0;
        for (_, row) in rows {
            pushed += 1;
            if !downstream.set_next_row(row)? {
                break;
            }
        }
        tracing::debug!("Collected {} rows from shard {}", pushed, location);
        Ok(pushed)
    }
}

/// Fetches documents from the shards a plan's readers point at
pub struct LocalFetcher {
    cluster: Arc<MemoryCluster>,
    readers: BTreeMap<u32, ShardLocation>,
}

impl LocalFetcher {
    pub fn new(cluster: Arc<MemoryCluster>, readers: BTreeMap<u32, ShardLocation>) -> Self {
        Self { cluster, readers }
    }
}

impl DocFetcher for LocalFetcher {
    fn fetch(&self, reader_id: u32, doc_ids: &[u32]) -> ExecResult<HashMap<u32, Value>> {
        let location = self.readers.get(&reader_id).ok_or_else(|| {
            ExecError::Execution(format!("No open reader with id {}", reader_id))
        })?;
        let shard = self.cluster.shard(location)?;
        Ok(doc_ids
            .iter()
            .filter_map(|id| shard.get(*id).map(|doc| (*id, doc.source)))
            .collect())
    }
}
