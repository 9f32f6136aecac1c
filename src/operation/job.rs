//! Local job execution
//!
//! Runs a planned query against a [`MemoryCluster`] inside one process. Every
//! collect node gets its own projector chain fed by one blocking task per
//! shard. A node's rows are encoded with the collect phase's streamers,
//! framed, decoded again and pushed into the merge chain, the same way they
//! would cross the wire between nodes.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;

use super::chain::{ProjectorChain, TerminalMode};
use super::collect::{DocCollector, LocalFetcher, MemoryCluster, ShardCollector};
use super::projectors::{Projector, ProjectorFactory, RowStream};
use super::ram::{MemoryBreaker, RamAccountingContext};
use crate::analyze::ShardLocation;
use crate::config::ExecutionSettings;
use crate::error::{ExecError, ExecResult};
use crate::planner::phase::{CollectPhase, ExecutionPhase};
use crate::planner::plan::{Plan, QueryThenFetch};
use crate::planner::projection::ProjectionKind;
use crate::planner::streamer::RowStreamer;
use crate::transport::{decode_rows, encode_rows};
use crate::types::Row;

pub struct LocalJobExecutor {
    settings: ExecutionSettings,
    cluster: Arc<MemoryCluster>,
    collector: Arc<dyn ShardCollector>,
    breaker: Arc<MemoryBreaker>,
}

impl LocalJobExecutor {
    pub fn new(settings: ExecutionSettings, cluster: Arc<MemoryCluster>) -> Self {
        let breaker = Arc::new(MemoryBreaker::new(
            "query",
            settings.query_memory_limit_bytes,
        ));
        Self {
            settings,
            collector: Arc::new(DocCollector::new(Arc::clone(&cluster))),
            cluster,
            breaker,
        }
    }

    /// Collect shards through `collector` instead of the cluster's own
    /// documents
    pub fn with_collector(mut self, collector: Arc<dyn ShardCollector>) -> Self {
        self.collector = collector;
        self
    }

    pub fn breaker(&self) -> &Arc<MemoryBreaker> {
        &self.breaker
    }

    pub async fn execute(&self, plan: &Plan) -> ExecResult<Vec<Row>> {
        match plan {
            Plan::Noop { job_id } => {
                tracing::debug!("Job {} can never match, returning no rows", job_id);
                Ok(Vec::new())
            }
            Plan::QueryThenFetch(plan) => {
                let (merge_chain, feeds) = self.start_query_then_fetch(plan, TerminalMode::Collect)?;
                feed_merge(feeds).await?;
                let rows = merge_chain.result().await?;
                tracing::debug!("Job {} produced {} rows", plan.job_id, rows.len());
                Ok((*rows).clone())
            }
        }
    }

    /// Run `plan` in the background and hand out its rows as they leave the
    /// merge chain. The chain holds at most `stream_buffer_rows` rows that
    /// were not consumed yet. A failure ends the stream with the error.
    pub async fn execute_stream(&self, plan: &Plan) -> ExecResult<RowStream> {
        let mode = TerminalMode::Stream {
            buffer: self.settings.stream_buffer_rows,
        };
        let (merge_chain, feeds) = match plan {
            Plan::Noop { job_id } => {
                let ram = RamAccountingContext::new(format!("job-{}", job_id), Arc::clone(&self.breaker));
                let factory = ProjectorFactory::new(self.settings.clone());
                let chain = ProjectorChain::new(0, Vec::new(), &factory, ram, mode)?;
                chain.start_projections()?;
                (chain, Vec::new())
            }
            Plan::QueryThenFetch(plan) => self.start_query_then_fetch(plan, mode)?,
        };
        let rows = merge_chain.take_row_stream()?;

        let job_id = plan.job_id();
        tokio::spawn(async move {
            if let Err(err) = feed_merge(feeds).await {
                tracing::warn!("Streaming job {} failed: {}", job_id, err);
            }
            drop(merge_chain);
        });
        Ok(rows)
    }

    /// Build and start the merge chain with one input per collect node
    fn start_query_then_fetch(
        &self,
        plan: &QueryThenFetch,
        mode: TerminalMode,
    ) -> ExecResult<(ProjectorChain, Vec<(NodeRun, Arc<Projector>)>)> {
        let ram = RamAccountingContext::new(format!("job-{}", plan.job_id), Arc::clone(&self.breaker));
        let collect = &plan.collect_phase;
        let readers = reader_ids(plan);

        let mut factory = ProjectorFactory::new(self.settings.clone());
        if plan.needs_fetch() {
            let by_reader = readers.iter().map(|(loc, id)| (*id, loc.clone())).collect();
            factory = factory.with_fetcher(Arc::new(LocalFetcher::new(
                Arc::clone(&self.cluster),
                by_reader,
            )));
        }

        let nodes = collect.routing.nodes();
        let merge_chain = ProjectorChain::new(
            nodes.len(),
            plan.merge_phase.projections.clone(),
            &factory,
            ram.clone(),
            mode,
        )?;
        let merge_inputs = nodes
            .iter()
            .map(|_| merge_chain.new_shard_downstream_projector(&factory))
            .collect::<ExecResult<Vec<_>>>()?;
        merge_chain.start_projections()?;

        let streamer = Arc::new(RowStreamer::for_phase(&ExecutionPhase::Collect(collect.clone()))?);
        let phase = Arc::new(collect.clone());
        let feeds = nodes
            .into_iter()
            .zip(merge_inputs)
            .map(|(node, merge_input)| {
                let node_run = NodeRun {
                    node,
                    phase: Arc::clone(&phase),
                    readers: readers.clone(),
                    collector: Arc::clone(&self.collector),
                    factory: factory.clone(),
                    ram: ram.clone(),
                    streamer: Arc::clone(&streamer),
                    frame_rows: self.settings.fetch_batch_size,
                };
                (node_run, merge_input)
            })
            .collect();
        Ok((merge_chain, feeds))
    }
}

/// Run every collect node and push its rows into its merge input. Pushing
/// may block on a streaming terminal, so it happens off the async workers.
async fn feed_merge(feeds: Vec<(NodeRun, Arc<Projector>)>) -> ExecResult<()> {
    let runs = feeds.into_iter().map(|(node_run, merge_input)| async move {
        let rows = match node_run.run().await {
            Ok(rows) => rows,
            Err(err) => {
                merge_input.fail(err);
                return Ok(());
            }
        };
        let input = Arc::clone(&merge_input);
        let pushed = tokio::task::spawn_blocking(move || push_rows(&input, rows))
            .await
            .map_err(|e| ExecError::Internal(format!("Merge feed failed: {}", e)))
            .and_then(|outcome| outcome);
        if let Err(err) = &pushed {
            merge_input.fail(err.clone());
        }
        pushed
    });
    for outcome in join_all(runs).await {
        outcome?;
    }
    Ok(())
}

fn push_rows(merge_input: &Projector, rows: Vec<Row>) -> ExecResult<()> {
    for row in rows {
        if !merge_input.set_next_row(row)? {
            break;
        }
    }
    merge_input.upstream_finished()
}

/// Reader id of every routed shard
fn reader_ids(plan: &QueryThenFetch) -> BTreeMap<ShardLocation, u32> {
    let fetch = plan.merge_phase.projections.iter().find_map(|p| match p.kind() {
        ProjectionKind::Fetch(fetch) => Some(fetch),
        _ => None,
    });
    match fetch {
        Some(fetch) => fetch
            .reader_shards
            .iter()
            .map(|(id, location)| (location.clone(), *id))
            .collect(),
        None => plan
            .collect_phase
            .routing
            .all_shards()
            .into_iter()
            .enumerate()
            .map(|(id, location)| (location, id as u32))
            .collect(),
    }
}

/// Everything one collect node needs to run its shards
struct NodeRun {
    node: String,
    phase: Arc<CollectPhase>,
    readers: BTreeMap<ShardLocation, u32>,
    collector: Arc<dyn ShardCollector>,
    factory: ProjectorFactory,
    ram: RamAccountingContext,
    streamer: Arc<RowStreamer>,
    frame_rows: usize,
}

impl NodeRun {
    /// Run the node's chain and return its rows as the merge node receives
    /// them
    async fn run(self) -> ExecResult<Vec<Row>> {
        let shards = self.phase.routing.shards_on(&self.node);
        let chain = ProjectorChain::new(
            shards.len(),
            self.phase.projections.clone(),
            &self.factory,
            self.ram.clone(),
            TerminalMode::Collect,
        )?;

        let mut heads = Vec::with_capacity(shards.len());
        for location in shards {
            let reader_id = self.readers.get(&location).copied().ok_or_else(|| {
                ExecError::Internal(format!("No reader allocated for shard {}", location))
            })?;
            heads.push((location, reader_id, chain.new_shard_downstream_projector(&self.factory)?));
        }
        chain.start_projections()?;

        let tasks = heads.into_iter().map(|(location, reader_id, head)| {
            let collector = Arc::clone(&self.collector);
            let phase = Arc::clone(&self.phase);
            tokio::task::spawn_blocking(move || {
                collect_shard(collector.as_ref(), &location, reader_id, &phase, &head)
            })
        });
        for joined in join_all(tasks).await {
            joined.map_err(|e| ExecError::Internal(format!("Shard task failed: {}", e)))?;
        }

        let rows = chain.result().await?;
        tracing::debug!("Node {} collected {} rows", self.node, rows.len());

        let data = encode_rows(&self.streamer, &rows, self.frame_rows)?;
        decode_rows(&self.streamer, &data)
    }
}

/// Collect one shard and report the outcome to `head`
fn collect_shard(
    collector: &dyn ShardCollector,
    location: &ShardLocation,
    reader_id: u32,
    phase: &CollectPhase,
    head: &Projector,
) {
    let outcome = collector
        .collect_shard(location, reader_id, phase, head)
        .and_then(|_| head.upstream_finished());
    if let Err(err) = outcome {
        tracing::warn!("Collecting shard {} failed: {}", location, err);
        head.fail(err.on_shard(phase.name.clone(), location.to_string()));
    }
}
