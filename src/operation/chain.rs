//! Projector chains
//!
//! A chain splits a list of projections into two tiers. Everything up to
//! and including the single shard-level projection runs once per physical
//! shard; the rest runs once on the node and ends in a terminal projector
//! that provides the result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::error::{ExecError, ExecResult};
use crate::operation::projectors::{
    Projector, ProjectorFactory, ResultReceiver, RowStream, SharedResult,
};
use crate::operation::ram::RamAccountingContext;
use crate::planner::projection::Projection;
use crate::types::Row;

/// How the node tier hands out its rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminalMode {
    /// Materialize all rows and resolve `result()` with them
    #[default]
    Collect,
    /// Hand rows to a bounded channel, read through `take_row_stream()`
    Stream { buffer: usize },
}

pub struct ProjectorChain {
    projections: Vec<Projection>,
    shard_index: Option<usize>,
    /// Node tier in build order, the terminal last
    node_projectors: Vec<Arc<Projector>>,
    shard_projectors: Mutex<Vec<Arc<Projector>>>,
    ram: RamAccountingContext,
    started: AtomicBool,
    result: SharedResult,
    row_stream: Mutex<Option<RowStream>>,
}

impl ProjectorChain {
    pub fn new(
        num_shards: usize,
        projections: Vec<Projection>,
        factory: &ProjectorFactory,
        ram: RamAccountingContext,
        mode: TerminalMode,
    ) -> ExecResult<Self> {
        let shard_levels: Vec<usize> = projections
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_shard_level())
            .map(|(i, _)| i)
            .collect();
        if shard_levels.len() > 1 {
            return Err(ExecError::Configuration(format!(
                "Only one shard level projection is supported, found {}",
                shard_levels.len()
            )));
        }
        let shard_index = shard_levels.first().copied();
        let node_start = shard_index.map_or(0, |i| i + 1);

        let mut node_projectors = projections[node_start..]
            .iter()
            .map(|projection| factory.create(projection, &ram))
            .collect::<ExecResult<Vec<_>>>()?;

        let (terminal, receiver, row_stream) = match mode {
            TerminalMode::Collect => {
                let (terminal, receiver) = Projector::collecting(ram.clone());
                (terminal, receiver, None)
            }
            TerminalMode::Stream { buffer } => {
                let (terminal, rows, receiver) = Projector::streaming(buffer);
                (terminal, receiver, Some(rows))
            }
        };
        node_projectors.push(terminal);

        for pair in node_projectors.windows(2) {
            pair[0].set_downstream(Arc::clone(&pair[1]))?;
        }

        let result = shared_result(receiver);
        let row_stream = row_stream.map(|rows| RowStream::new(rows, result.clone()));

        tracing::debug!(
            "Built projector chain for {} shards: shard tier {:?}, node tier [{}]",
            num_shards,
            shard_index.map(|i| projections[..=i].iter().map(Projection::name).collect::<Vec<_>>()),
            node_projectors
                .iter()
                .map(|p| p.name())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            projections,
            shard_index,
            node_projectors,
            shard_projectors: Mutex::new(Vec::with_capacity(num_shards)),
            ram,
            started: AtomicBool::new(false),
            result,
            row_stream: Mutex::new(row_stream),
        })
    }

    /// Entry point of the node tier
    pub fn first_node_projector(&self) -> &Arc<Projector> {
        &self.node_projectors[0]
    }

    pub fn node_projector_names(&self) -> Vec<&'static str> {
        self.node_projectors.iter().map(|p| p.name()).collect()
    }

    pub fn shard_projector_count(&self) -> usize {
        self.shard_projectors.lock().len()
    }

    /// Create the projector one physical shard pushes its rows into.
    ///
    /// The returned projector has one upstream registered for the caller,
    /// which must report `upstream_finished` or `fail` exactly once.
    pub fn new_shard_downstream_projector(
        &self,
        factory: &ProjectorFactory,
    ) -> ExecResult<Arc<Projector>> {
        if self.started.load(Ordering::SeqCst) {
            return Err(ExecError::ChainMisuse(
                "Cannot create shard projectors after start_projections".to_string(),
            ));
        }
        let first = self.first_node_projector();
        let Some(shard_index) = self.shard_index else {
            first.register_upstream()?;
            return Ok(Arc::clone(first));
        };

        let mut previous = Arc::clone(first);
        let mut created = Vec::with_capacity(shard_index + 1);
        for projection in self.projections[..=shard_index].iter().rev() {
            let projector = factory.create(projection, &self.ram)?;
            projector.set_downstream(previous)?;
            created.push(Arc::clone(&projector));
            previous = projector;
        }
        previous.register_upstream()?;
        self.shard_projectors.lock().extend(created);
        Ok(previous)
    }

    /// Start every projector, downstreams before their upstreams
    pub fn start_projections(&self) -> ExecResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ExecError::ChainMisuse(
                "start_projections called twice".to_string(),
            ));
        }
        for projector in self.node_projectors.iter().rev() {
            projector.start_projection()?;
        }
        for projector in self.shard_projectors.lock().iter() {
            projector.start_projection()?;
        }
        Ok(())
    }

    /// Resolves once every projector of the chain has completed. In stream
    /// mode it resolves with no rows.
    pub fn result(&self) -> SharedResult {
        self.result.clone()
    }

    /// The collected rows of a completed chain
    pub fn iter(&self) -> ExecResult<std::vec::IntoIter<Row>> {
        match self.result.clone().now_or_never() {
            Some(rows) => Ok((*rows?).clone().into_iter()),
            None => Err(ExecError::ChainMisuse(
                "Result is not available before the chain completed".to_string(),
            )),
        }
    }

    pub fn take_row_stream(&self) -> ExecResult<RowStream> {
        self.row_stream.lock().take().ok_or_else(|| {
            ExecError::ChainMisuse(
                "Row stream is only available once, on a streaming chain".to_string(),
            )
        })
    }
}

impl std::fmt::Debug for ProjectorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectorChain")
            .field("shard_index", &self.shard_index)
            .field("node_projectors", &self.node_projector_names())
            .field("shard_projectors", &self.shard_projector_count())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish()
    }
}

fn shared_result(receiver: ResultReceiver) -> SharedResult {
    receiver
        .map(|outcome| {
            outcome.unwrap_or_else(|_| {
                Err(ExecError::Internal(
                    "Terminal projector dropped without a result".to_string(),
                ))
            })
        })
        .boxed()
        .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{OrderBy, Symbol};
    use crate::config::ExecutionSettings;
    use crate::types::DataType;
    use futures::StreamExt;
    use serde_json::json;

    fn factory() -> ProjectorFactory {
        ProjectorFactory::new(ExecutionSettings::default())
    }

    fn chain(projections: Vec<Projection>, mode: TerminalMode) -> ExecResult<ProjectorChain> {
        ProjectorChain::new(
            2,
            projections,
            &factory(),
            RamAccountingContext::unbounded("chain"),
            mode,
        )
    }

    fn col() -> Symbol {
        Symbol::input(0, DataType::Long)
    }

    fn push_all(projector: &Projector, values: impl IntoIterator<Item = i64>) {
        for v in values {
            if !projector.set_next_row(vec![json!(v)]).unwrap() {
                break;
            }
        }
        projector.upstream_finished().unwrap();
    }

    #[tokio::test]
    async fn test_empty_chain_keeps_push_order() {
        let chain = chain(vec![], TerminalMode::Collect).unwrap();
        let shard = chain.new_shard_downstream_projector(&factory()).unwrap();
        assert!(shard.is_result_provider());
        assert_eq!(chain.shard_projector_count(), 0);
        chain.start_projections().unwrap();

        push_all(&shard, [3, 1, 2]);
        let rows = chain.result().await.unwrap();
        assert_eq!(*rows, vec![vec![json!(3)], vec![json!(1)], vec![json!(2)]]);
        assert_eq!(chain.iter().unwrap().count(), 3);
    }

    #[tokio::test]
    async fn test_shard_top_n_then_node_merge() {
        let projections = vec![
            Projection::top_n(0, Some(5), None, vec![col()]).on_shard(),
            Projection::merge(OrderBy::asc(col())),
        ];
        let chain = chain(projections, TerminalMode::Collect).unwrap();
        assert_eq!(chain.node_projector_names(), vec!["merge", "collecting"]);

        let a = chain.new_shard_downstream_projector(&factory()).unwrap();
        let b = chain.new_shard_downstream_projector(&factory()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "topN");
        assert_eq!(chain.shard_projector_count(), 2);
        chain.start_projections().unwrap();

        push_all(&a, 1..=8);
        assert!(chain.iter().is_err());
        push_all(&b, (3..=10).rev());

        let rows = chain.result().await.unwrap();
        let values: Vec<i64> = rows.iter().map(|r| r[0].as_i64().unwrap()).collect();
        assert_eq!(values, (1..=10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_shard_tier_includes_leading_projections() {
        let filter = Projection::filter(Symbol::function(
            "op_>",
            vec![col(), Symbol::literal(json!(0))],
            DataType::Boolean,
        ));
        let projections = vec![
            filter,
            Projection::top_n(0, Some(1), None, vec![col()]).on_shard(),
        ];
        let chain = chain(projections, TerminalMode::Collect).unwrap();
        assert_eq!(chain.node_projector_names(), vec!["collecting"]);

        let head = chain.new_shard_downstream_projector(&factory()).unwrap();
        assert_eq!(head.name(), "filter");
        assert_eq!(chain.shard_projector_count(), 2);
        chain.start_projections().unwrap();

        push_all(&head, [-1, 7, 8]);
        assert_eq!(*chain.result().await.unwrap(), vec![vec![json!(7)]]);
    }

    #[test]
    fn test_two_shard_projections_are_rejected() {
        let projections = vec![
            Projection::top_n(0, Some(5), None, vec![col()]).on_shard(),
            Projection::top_n(0, Some(5), None, vec![col()]).on_shard(),
        ];
        let err = chain(projections, TerminalMode::Collect).unwrap_err();
        assert_eq!(
            err,
            ExecError::Configuration(
                "Only one shard level projection is supported, found 2".to_string()
            )
        );
    }

    #[test]
    fn test_lifecycle_misuse() {
        let chain = chain(vec![], TerminalMode::Collect).unwrap();
        let shard = chain.new_shard_downstream_projector(&factory()).unwrap();
        assert!(matches!(
            shard.set_next_row(vec![json!(1)]),
            Err(ExecError::ChainMisuse(_))
        ));
        chain.start_projections().unwrap();
        assert!(matches!(
            chain.start_projections(),
            Err(ExecError::ChainMisuse(_))
        ));
        assert!(matches!(
            chain.new_shard_downstream_projector(&factory()),
            Err(ExecError::ChainMisuse(_))
        ));
        assert!(matches!(chain.iter(), Err(ExecError::ChainMisuse(_))));
        assert!(matches!(
            chain.take_row_stream(),
            Err(ExecError::ChainMisuse(_))
        ));
    }

    #[tokio::test]
    async fn test_no_shards_completes_empty() {
        let chain = chain(
            vec![Projection::merge(OrderBy::asc(col()))],
            TerminalMode::Collect,
        )
        .unwrap();
        chain.start_projections().unwrap();
        assert!(chain.result().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shard_failure_fails_result() {
        let projections = vec![
            Projection::top_n(0, Some(5), None, vec![col()]).on_shard(),
            Projection::merge(OrderBy::asc(col())),
        ];
        let chain = chain(projections, TerminalMode::Collect).unwrap();
        let a = chain.new_shard_downstream_projector(&factory()).unwrap();
        let b = chain.new_shard_downstream_projector(&factory()).unwrap();
        chain.start_projections().unwrap();

        push_all(&a, [1, 2]);
        let failure = ExecError::Execution("disk gone".to_string()).on_shard("collect", "t:1");
        b.fail(failure.clone());

        assert_eq!(chain.result().await.unwrap_err(), failure);
    }

    #[tokio::test]
    async fn test_stream_mode_yields_rows_with_backpressure() {
        let chain = chain(vec![], TerminalMode::Stream { buffer: 2 }).unwrap();
        let shard = chain.new_shard_downstream_projector(&factory()).unwrap();
        chain.start_projections().unwrap();
        let stream = chain.take_row_stream().unwrap();
        assert!(chain.take_row_stream().is_err());

        let producer = std::thread::spawn(move || push_all(&shard, 0..5));
        let rows: Vec<Row> = stream.map(|row| row.unwrap()).collect().await;
        producer.join().unwrap();

        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4], vec![json!(4)]);
        assert!(chain.result().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_mode_ends_with_failure() {
        let chain = chain(vec![], TerminalMode::Stream { buffer: 4 }).unwrap();
        let shard = chain.new_shard_downstream_projector(&factory()).unwrap();
        chain.start_projections().unwrap();
        let stream = chain.take_row_stream().unwrap();

        let producer = std::thread::spawn(move || {
            shard.set_next_row(vec![json!(1)]).unwrap();
            shard.fail(ExecError::Execution("boom".to_string()));
        });
        let items: Vec<ExecResult<Row>> = stream.collect().await;
        producer.join().unwrap();

        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ExecError::Execution(_))));
    }
}
