//! Projectors
//!
//! A projector is the runtime instance of a [`Projection`]. Projectors are
//! wired into a single-successor graph: every projector pushes the rows it
//! produces into at most one downstream projector, and terminal projectors
//! hand the final rows to the caller.
//!
//! Lifecycle:
//! - every upstream registers itself before the chain is started
//! - `start_projection` is called on downstreams before their upstreams
//! - rows are pushed with `set_next_row`
//! - each upstream reports `upstream_finished` exactly once, or fails
//!
//! A projector finishes when its last upstream finished and then reports
//! to its own downstream. A failure is forwarded downstream right away.

pub mod aggregation;
pub mod collecting;
pub mod fetch;
pub mod filter;
pub mod merge;
pub mod streaming;
pub mod topn;
pub mod window;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::config::ExecutionSettings;
use crate::error::{ExecError, ExecResult};
use crate::operation::collect::DocFetcher;
use crate::operation::ram::RamAccountingContext;
use crate::planner::projection::{Projection, ProjectionKind};
use crate::types::Row;

use aggregation::AggregationProjector;
use collecting::CollectingProjector;
use fetch::FetchProjector;
use filter::FilterProjector;
use merge::MergeProjector;
use streaming::StreamingProjector;
use topn::TopNProjector;
use window::WindowProjector;

pub use collecting::ResultSender;
pub use streaming::{RowStream, SharedResult};

pub type ResultReceiver = oneshot::Receiver<ExecResult<Arc<Vec<Row>>>>;

/// The closed set of projector implementations
pub(crate) enum ProjectorKind {
    Collecting(CollectingProjector),
    Streaming(StreamingProjector),
    Filter(FilterProjector),
    TopN(TopNProjector),
    Merge(MergeProjector),
    Fetch(FetchProjector),
    Aggregation(AggregationProjector),
    Window(WindowProjector),
}

impl ProjectorKind {
    fn set_next_row(&mut self, row: Row, downstream: &Downstream<'_>) -> ExecResult<bool> {
        match self {
            ProjectorKind::Collecting(p) => p.set_next_row(row),
            ProjectorKind::Streaming(p) => p.set_next_row(row),
            ProjectorKind::Filter(p) => p.set_next_row(row, downstream),
            ProjectorKind::TopN(p) => p.set_next_row(row, downstream),
            ProjectorKind::Merge(p) => p.set_next_row(row),
            ProjectorKind::Fetch(p) => p.set_next_row(row, downstream),
            ProjectorKind::Aggregation(p) => p.set_next_row(row),
            ProjectorKind::Window(p) => p.set_next_row(row),
        }
    }

    fn finish(&mut self, downstream: &Downstream<'_>) -> ExecResult<()> {
        match self {
            ProjectorKind::Collecting(p) => p.finish(),
            ProjectorKind::Streaming(p) => p.finish(),
            ProjectorKind::Filter(_) => Ok(()),
            ProjectorKind::TopN(p) => p.finish(downstream),
            ProjectorKind::Merge(p) => p.finish(downstream),
            ProjectorKind::Fetch(p) => p.finish(downstream),
            ProjectorKind::Aggregation(p) => p.finish(downstream),
            ProjectorKind::Window(p) => p.finish(downstream),
        }
    }

    fn fail(&mut self, err: &ExecError) {
        match self {
            ProjectorKind::Collecting(p) => p.fail(err),
            ProjectorKind::Streaming(p) => p.fail(err),
            _ => {}
        }
    }

    fn is_result_provider(&self) -> bool {
        matches!(self, ProjectorKind::Collecting(_) | ProjectorKind::Streaming(_))
    }
}

/// Where a projector sends its output
pub(crate) struct Downstream<'a>(Option<&'a Arc<Projector>>);

impl Downstream<'_> {
    pub(crate) fn push(&self, row: Row) -> ExecResult<bool> {
        match self.0 {
            Some(projector) => projector.set_next_row(row),
            None => Err(ExecError::Internal(
                "Projector without downstream produced a row".to_string(),
            )),
        }
    }
}

pub struct Projector {
    name: &'static str,
    state: Mutex<ProjectorKind>,
    downstream: OnceLock<Arc<Projector>>,
    pending_upstreams: AtomicUsize,
    started: AtomicBool,
    done: AtomicBool,
}

impl Projector {
    pub(crate) fn new(name: &'static str, kind: ProjectorKind) -> Arc<Self> {
        Arc::new(Self {
            name,
            state: Mutex::new(kind),
            downstream: OnceLock::new(),
            pending_upstreams: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
        })
    }

    /// Terminal projector materializing all rows
    pub fn collecting(ram: RamAccountingContext) -> (Arc<Self>, ResultReceiver) {
        let (tx, rx) = oneshot::channel();
        let projector = Self::new(
            "collecting",
            ProjectorKind::Collecting(CollectingProjector::new(ram, tx)),
        );
        (projector, rx)
    }

    /// Terminal projector handing rows to a bounded channel
    pub fn streaming(buffer: usize) -> (Arc<Self>, mpsc::Receiver<Row>, ResultReceiver) {
        let (rows_tx, rows_rx) = mpsc::channel(buffer.max(1));
        let (tx, rx) = oneshot::channel();
        let projector = Self::new(
            "streaming",
            ProjectorKind::Streaming(StreamingProjector::new(rows_tx, tx)),
        );
        (projector, rows_rx, rx)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_result_provider(&self) -> bool {
        self.state.lock().is_result_provider()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Finished or failed
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Wire `downstream` as the successor of this projector and register
    /// this projector as one of its upstreams.
    pub fn set_downstream(&self, downstream: Arc<Projector>) -> ExecResult<()> {
        downstream.register_upstream()?;
        let name = downstream.name;
        self.downstream.set(downstream).map_err(|_| {
            ExecError::Configuration(format!(
                "{} already has a downstream, cannot wire it to {}",
                self.name, name
            ))
        })
    }

    pub fn register_upstream(&self) -> ExecResult<()> {
        if self.is_started() {
            return Err(ExecError::ChainMisuse(format!(
                "Cannot register an upstream on {} after it was started",
                self.name
            )));
        }
        self.pending_upstreams.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn start_projection(&self) -> ExecResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ExecError::ChainMisuse(format!(
                "{} was already started",
                self.name
            )));
        }
        if self.pending_upstreams.load(Ordering::SeqCst) == 0 {
            self.finish();
        }
        Ok(())
    }

    /// Push a row. `Ok(false)` asks the caller to stop sending rows.
    pub fn set_next_row(&self, row: Row) -> ExecResult<bool> {
        if !self.is_started() {
            return Err(ExecError::ChainMisuse(format!(
                "Row pushed into {} before start_projections",
                self.name
            )));
        }
        if self.is_done() {
            return Ok(false);
        }
        let result = {
            let mut state = self.state.lock();
            state.set_next_row(row, &Downstream(self.downstream.get()))
        };
        if let Err(err) = &result {
            self.fail(err.clone());
        }
        result
    }

    pub fn upstream_finished(&self) -> ExecResult<()> {
        if !self.is_started() {
            return Err(ExecError::ChainMisuse(format!(
                "Upstream of {} finished before start_projections",
                self.name
            )));
        }
        let previous = self
            .pending_upstreams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| {
                ExecError::ChainMisuse(format!(
                    "More upstreams of {} finished than were registered",
                    self.name
                ))
            })?;
        if previous == 1 {
            self.finish();
        }
        Ok(())
    }

    /// Fail this projector and everything downstream of it. Only the first
    /// failure is kept.
    pub fn fail(&self, err: ExecError) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.propagate_failure(err);
    }

    fn propagate_failure(&self, err: ExecError) {
        tracing::debug!("{} failed: {}", self.name, err);
        self.state.lock().fail(&err);
        if let Some(downstream) = self.downstream.get() {
            downstream.fail(err);
        }
    }

    fn finish(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let downstream = self.downstream.get();
        let result = self.state.lock().finish(&Downstream(downstream));
        match result {
            Ok(()) => {
                if let Some(downstream) = downstream {
                    if let Err(err) = downstream.upstream_finished() {
                        downstream.fail(err);
                    }
                }
            }
            Err(err) => self.propagate_failure(err),
        }
    }
}

impl std::fmt::Debug for Projector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projector")
            .field("name", &self.name)
            .field("started", &self.is_started())
            .field("done", &self.is_done())
            .field("downstream", &self.downstream.get().map(|d| d.name))
            .finish()
    }
}

/// Turns projections into projectors
#[derive(Clone)]
pub struct ProjectorFactory {
    settings: ExecutionSettings,
    fetcher: Option<Arc<dyn DocFetcher>>,
}

impl ProjectorFactory {
    pub fn new(settings: ExecutionSettings) -> Self {
        Self {
            settings,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn DocFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    pub fn create(
        &self,
        projection: &Projection,
        ram: &RamAccountingContext,
    ) -> ExecResult<Arc<Projector>> {
        let kind = match projection.kind() {
            ProjectionKind::Filter { condition } => {
                ProjectorKind::Filter(FilterProjector::new(condition.clone()))
            }
            ProjectionKind::TopN {
                offset,
                limit,
                order_by,
                outputs,
            } => ProjectorKind::TopN(TopNProjector::new(
                *offset,
                *limit,
                order_by.as_ref(),
                outputs.clone(),
                ram.clone(),
            )),
            ProjectionKind::Merge { order_by } => {
                ProjectorKind::Merge(MergeProjector::new(order_by, ram.clone()))
            }
            ProjectionKind::Fetch(fetch) => {
                let fetcher = self.fetcher.clone().ok_or_else(|| {
                    ExecError::Configuration(
                        "Fetch projection requires a document fetcher".to_string(),
                    )
                })?;
                ProjectorKind::Fetch(FetchProjector::new(
                    fetch.clone(),
                    fetcher,
                    self.settings.fetch_batch_size,
                ))
            }
            ProjectionKind::Aggregation {
                group_keys,
                aggregations,
            } => ProjectorKind::Aggregation(AggregationProjector::new(
                group_keys.clone(),
                aggregations.clone(),
                ram.clone(),
            )?),
            ProjectionKind::Window {
                definition,
                functions,
            } => ProjectorKind::Window(WindowProjector::new(definition, functions, ram.clone())?),
        };
        Ok(Projector::new(projection.name(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{OrderBy, Symbol};
    use crate::planner::projection::{AggregateMode, Aggregation, WindowDefinition};
    use crate::types::DataType;
    use serde_json::{json, Value};

    fn factory() -> ProjectorFactory {
        ProjectorFactory::new(ExecutionSettings::default())
    }

    fn ram() -> RamAccountingContext {
        RamAccountingContext::unbounded("test")
    }

    /// Wire `projection` in front of a collecting terminal and run `rows`
    /// through it from one upstream.
    fn run(projection: Projection, rows: Vec<Row>) -> ExecResult<Vec<Row>> {
        let ram = ram();
        let projector = factory().create(&projection, &ram)?;
        let (terminal, mut rx) = Projector::collecting(ram);
        projector.set_downstream(Arc::clone(&terminal))?;
        projector.register_upstream()?;
        terminal.start_projection()?;
        projector.start_projection()?;
        for row in rows {
            if !projector.set_next_row(row)? {
                break;
            }
        }
        projector.upstream_finished()?;
        match rx.try_recv() {
            Ok(result) => result.map(|rows| (*rows).clone()),
            Err(_) => panic!("terminal did not complete"),
        }
    }

    fn col(index: usize) -> Symbol {
        Symbol::input(index, DataType::Long)
    }

    fn rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| vec![json!(v)]).collect()
    }

    #[test]
    fn test_push_before_start_is_rejected() {
        let (terminal, _rx) = Projector::collecting(ram());
        assert!(matches!(
            terminal.set_next_row(vec![json!(1)]),
            Err(ExecError::ChainMisuse(_))
        ));
        terminal.start_projection().unwrap();
        assert!(matches!(
            terminal.start_projection(),
            Err(ExecError::ChainMisuse(_))
        ));
    }

    #[test]
    fn test_zero_upstreams_complete_on_start() {
        let (terminal, mut rx) = Projector::collecting(ram());
        terminal.start_projection().unwrap();
        assert!(terminal.is_done());
        assert!(rx.try_recv().unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_filter() {
        let condition = Symbol::function(
            "op_>",
            vec![col(0), Symbol::literal(json!(2))],
            DataType::Boolean,
        );
        let out = run(Projection::filter(condition), rows(&[1, 3, 2, 5])).unwrap();
        assert_eq!(out, rows(&[3, 5]));
    }

    #[test]
    fn test_unordered_top_n_stops_at_limit() {
        let ram = ram();
        let projector = factory()
            .create(&Projection::top_n(1, Some(2), None, vec![col(0)]), &ram)
            .unwrap();
        let (terminal, _rx) = Projector::collecting(ram);
        projector.set_downstream(Arc::clone(&terminal)).unwrap();
        projector.register_upstream().unwrap();
        terminal.start_projection().unwrap();
        projector.start_projection().unwrap();

        assert!(projector.set_next_row(vec![json!(1)]).unwrap());
        assert!(projector.set_next_row(vec![json!(2)]).unwrap());
        assert!(!projector.set_next_row(vec![json!(3)]).unwrap());
    }

    #[test]
    fn test_ordered_top_n() {
        let projection = Projection::top_n(1, Some(3), Some(OrderBy::desc(col(0))), vec![col(0)]);
        let input = rows(&[4, 9, 1, 7, 3, 8, 2, 6, 5]);
        assert_eq!(run(projection, input).unwrap(), rows(&[8, 7, 6]));
    }

    #[test]
    fn test_merge_sorts_everything() {
        let out = run(Projection::merge(OrderBy::asc(col(0))), rows(&[3, 1, 2])).unwrap();
        assert_eq!(out, rows(&[1, 2, 3]));
    }

    #[test]
    fn test_global_aggregation() {
        let aggregations = vec![
            Aggregation::new("count", None, DataType::Long, AggregateMode::IterFinal),
            Aggregation::new("sum", Some(col(0)), DataType::Long, AggregateMode::IterFinal),
            Aggregation::new("avg", Some(col(0)), DataType::Double, AggregateMode::IterFinal),
            Aggregation::new("max", Some(col(0)), DataType::Long, AggregateMode::IterFinal),
        ];
        let out = run(Projection::aggregation(vec![], aggregations.clone()), rows(&[1, 2, 6])).unwrap();
        assert_eq!(out, vec![vec![json!(3), json!(9), json!(3.0), json!(6)]]);

        let empty = run(Projection::aggregation(vec![], aggregations), vec![]).unwrap();
        assert_eq!(empty, vec![vec![json!(0), Value::Null, Value::Null, Value::Null]]);
    }

    #[test]
    fn test_partial_then_final_aggregation() {
        let partial = Projection::aggregation(
            vec![],
            vec![Aggregation::new("avg", Some(col(0)), DataType::Double, AggregateMode::IterPartial)],
        );
        let shard_a = run(partial.clone(), rows(&[1, 2])).unwrap();
        let shard_b = run(partial, rows(&[6])).unwrap();

        let final_step = Projection::aggregation(
            vec![],
            vec![Aggregation::new(
                "avg",
                Some(Symbol::input(0, DataType::Array(Box::new(DataType::Double)))),
                DataType::Double,
                AggregateMode::PartialFinal,
            )],
        );
        let merged: Vec<Row> = shard_a.into_iter().chain(shard_b).collect();
        assert_eq!(run(final_step, merged).unwrap(), vec![vec![json!(3.0)]]);
    }

    #[test]
    fn test_grouped_aggregation() {
        let projection = Projection::aggregation(
            vec![Symbol::input(0, DataType::String)],
            vec![Aggregation::new("count", None, DataType::Long, AggregateMode::IterFinal)],
        );
        let input = vec![
            vec![json!("a"), json!(1)],
            vec![json!("b"), json!(1)],
            vec![json!("a"), json!(1)],
        ];
        assert_eq!(
            run(projection, input).unwrap(),
            vec![vec![json!("a"), json!(2)], vec![json!("b"), json!(1)]]
        );
    }

    #[test]
    fn test_unknown_aggregate_is_configuration_error() {
        let projection = Projection::aggregation(
            vec![],
            vec![Aggregation::new("median", None, DataType::Long, AggregateMode::IterFinal)],
        );
        assert!(matches!(
            factory().create(&projection, &ram()),
            Err(ExecError::Configuration(_))
        ));
    }

    #[test]
    fn test_window_rank_over_partitions() {
        let definition = WindowDefinition {
            partition_by: vec![Symbol::input(0, DataType::String)],
            order_by: Some(OrderBy::asc(col(1))),
        };
        let projection = Projection::window(
            definition,
            vec!["rank".to_string(), "dense_rank".to_string(), "row_number".to_string()],
        );
        let input = vec![
            vec![json!("b"), json!(7)],
            vec![json!("a"), json!(5)],
            vec![json!("a"), json!(3)],
            vec![json!("a"), json!(3)],
            vec![json!("a"), json!(9)],
        ];
        let out = run(projection, input).unwrap();
        assert_eq!(
            out,
            vec![
                vec![json!("a"), json!(3), json!(1), json!(1), json!(1)],
                vec![json!("a"), json!(3), json!(1), json!(1), json!(2)],
                vec![json!("a"), json!(5), json!(3), json!(2), json!(3)],
                vec![json!("a"), json!(9), json!(4), json!(3), json!(4)],
                vec![json!("b"), json!(7), json!(1), json!(1), json!(1)],
            ]
        );
    }

    #[test]
    fn test_window_partitions_on_array_keys() {
        let definition = WindowDefinition {
            partition_by: vec![Symbol::input(0, DataType::Array(Box::new(DataType::String)))],
            order_by: Some(OrderBy::asc(col(1))),
        };
        let projection = Projection::window(definition, vec!["rank".to_string()]);
        let input = vec![
            vec![json!(["c"]), json!(1)],
            vec![json!(["a"]), json!(2)],
            vec![json!(["b"]), json!(3)],
            vec![json!(["a"]), json!(1)],
        ];
        let out = run(projection, input).unwrap();
        assert_eq!(
            out,
            vec![
                vec![json!(["a"]), json!(1), json!(1)],
                vec![json!(["a"]), json!(2), json!(2)],
                vec![json!(["b"]), json!(3), json!(1)],
                vec![json!(["c"]), json!(1), json!(1)],
            ]
        );
    }

    #[test]
    fn test_window_without_order_treats_all_rows_as_peers() {
        let definition = WindowDefinition {
            partition_by: vec![],
            order_by: None,
        };
        let projection = Projection::window(definition, vec!["rank".to_string()]);
        let out = run(projection, rows(&[5, 1, 3])).unwrap();
        assert!(out.iter().all(|r| r[1] == json!(1)));
    }

    #[test]
    fn test_failure_reaches_terminal() {
        let ram = ram();
        let projection = Projection::filter(Symbol::function("nope", vec![], DataType::Boolean));
        let projector = factory().create(&projection, &ram).unwrap();
        let (terminal, mut rx) = Projector::collecting(ram);
        projector.set_downstream(Arc::clone(&terminal)).unwrap();
        projector.register_upstream().unwrap();
        terminal.start_projection().unwrap();
        projector.start_projection().unwrap();

        let err = projector.set_next_row(vec![json!(1)]).unwrap_err();
        assert!(matches!(err, ExecError::UnsupportedOperation(_)));
        assert!(projector.is_done());
        assert!(terminal.is_done());
        assert_eq!(rx.try_recv().unwrap(), Err(err));
        // a late finish report does not resurrect the chain
        projector.upstream_finished().unwrap();
    }

    #[test]
    fn test_memory_limit_fails_terminal() {
        use crate::operation::ram::MemoryBreaker;

        let breaker = Arc::new(MemoryBreaker::new("query", 64));
        let ram = RamAccountingContext::new("job", breaker);
        let (terminal, mut rx) = Projector::collecting(ram);
        terminal.register_upstream().unwrap();
        terminal.start_projection().unwrap();

        let big = vec![json!("x".repeat(100))];
        let err = terminal.set_next_row(big).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceExhausted);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(ExecError::MemoryLimit { .. })
        ));
        // once failed, further rows are refused
        assert!(!terminal.set_next_row(vec![json!(1)]).unwrap());
    }

    #[test]
    fn test_fetch_without_fetcher_is_rejected() {
        use crate::planner::projection::FetchProjection;
        use std::collections::{BTreeMap, BTreeSet};

        let projection = Projection::fetch(FetchProjection {
            collect_phase_id: 0,
            doc_id_column: 0,
            collect_symbols: vec![],
            output_symbols: vec![],
            partitioned_by: vec![],
            execution_nodes: BTreeSet::new(),
            is_limited: false,
            reader_nodes: BTreeMap::new(),
            reader_shards: BTreeMap::new(),
        });
        assert!(matches!(
            factory().create(&projection, &ram()),
            Err(ExecError::Configuration(_))
        ));
    }
}
