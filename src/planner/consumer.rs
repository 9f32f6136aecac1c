//! Query-then-fetch planning
//!
//! Plans a select on a single document table as two steps. Each shard
//! collects only what is needed to order and bound the result, together
//! with the `_docid` of every row. The merging node bounds the combined
//! result and only then fetches the remaining columns for the rows that
//! survived.

use std::collections::BTreeSet;

use super::builder::{ProjectionBuilder, SplitPoints};
use super::context::ConsumerContext;
use super::fetch_pushdown::push_down;
use super::phase::{CollectPhase, MergePhase};
use super::plan::{Plan, QueryThenFetch};
use super::projection::{FetchProjection, Projection};
use crate::analyze::symbol::{collect_references, convert_to_fetch_reference, to_input_column};
use crate::analyze::{sys_columns, AnalyzedRelation, QueriedDocTable, Symbol};
use crate::error::{ExecError, ExecResult};

pub struct QueryThenFetchConsumer;

impl QueryThenFetchConsumer {
    /// Plan `relation`, or return `Ok(None)` when this strategy does not
    /// apply and the caller has to fall back to another one.
    pub fn plan(relation: &AnalyzedRelation, ctx: &mut ConsumerContext) -> ExecResult<Option<Plan>> {
        match relation {
            AnalyzedRelation::QueriedDocTable(table) => Self::plan_doc_table(table, ctx),
            AnalyzedRelation::MultiSource { .. } => {
                tracing::debug!("Query-then-fetch does not apply to multi source relations");
                Ok(None)
            }
        }
    }

    fn plan_doc_table(
        table: &QueriedDocTable,
        ctx: &mut ConsumerContext,
    ) -> ExecResult<Option<Plan>> {
        let spec = table.query_spec();
        if spec.has_aggregates() || spec.group_by().is_some() {
            return Ok(None);
        }
        if spec.where_clause().has_versions() {
            return Err(ExecError::Validation(format!(
                "\"{}\" column is not valid in the WHERE clause of a SELECT statement",
                sys_columns::VERSION
            )));
        }

        let job_id = ctx.planner_context().job_id();
        if spec.where_clause().is_no_match() {
            tracing::debug!("Query on {} can never match, planning an empty result", table.table().ident());
            return Ok(Some(Plan::Noop { job_id }));
        }

        let table_info = table.table();
        let Some(spec) = push_down(spec, table_info.ident()) else {
            return Ok(None);
        };

        let split_points = SplitPoints::create(&spec);
        let mut need_fetch = !collect_references(spec.outputs()).is_empty();
        let mut outputs_all_ordered = false;
        let mut collect_symbols: Vec<Symbol> = Vec::new();

        let order_by = spec.order_by();
        if let Some(order_by) = order_by {
            table_info.validate_order_by(order_by)?;

            // partial containment (e.g. a function over an ordered and an
            // unordered column) counts as not ordered
            let order_refs = collect_references(order_by.symbols());
            outputs_all_ordered = collect_references(spec.outputs())
                .iter()
                .all(|r| order_refs.contains(r));
            collect_symbols = if outputs_all_ordered {
                split_points.to_collect().to_vec()
            } else {
                order_by.symbols().to_vec()
            };
        }

        need_fetch &= !outputs_all_ordered;

        let mut output_symbols = Vec::new();
        if need_fetch {
            collect_symbols.insert(0, Symbol::Reference(table_info.reference(sys_columns::DOCID)?));
            // system columns only exist while collecting, the fetched
            // source does not carry them
            for symbol in spec.outputs() {
                if symbol.contains_score() {
                    if !collect_symbols.contains(symbol) {
                        collect_symbols.push(symbol.clone());
                    }
                    continue;
                }
                for reference in symbol.references() {
                    let column = Symbol::Reference(reference.clone());
                    if reference.column().is_system_column() && !collect_symbols.contains(&column) {
                        collect_symbols.push(column);
                    }
                }
            }
            output_symbols = spec
                .outputs()
                .iter()
                .map(|s| convert_to_fetch_reference(&to_input_column(s, &collect_symbols), table_info))
                .collect();
        } else {
            collect_symbols = split_points.to_collect().to_vec();
        }

        let mut collect_projections = Vec::new();
        if let Some(order_by) = order_by {
            collect_projections.push(ProjectionBuilder::merge(&collect_symbols, order_by));
        }

        let offset = spec.offset();
        let settings = ctx.planner_context().settings().clone();
        let limit = spec
            .limit()
            .or_else(|| ctx.is_root().then_some(settings.default_select_limit));
        let bounded = limit.map(|limit| limit + offset);
        if let Some(bounded) = bounded {
            collect_projections.push(ProjectionBuilder::top_n(
                &collect_symbols,
                None,
                0,
                Some(bounded),
                None,
            ));
        }

        let planner = ctx.planner_context_mut();
        planner.allocate_readers(table_info.routing());
        let collect_phase = CollectPhase {
            job_id,
            phase_id: planner.next_phase_id(),
            name: "collect".to_string(),
            routing: table_info.routing().clone(),
            where_clause: spec.where_clause().clone(),
            to_collect: collect_symbols.clone(),
            projections: collect_projections,
            order_by: order_by.cloned(),
            limit: bounded,
            keep_context_for_fetcher: need_fetch,
        };

        let mut merge_projections = Vec::new();
        if let Some(order_by) = order_by {
            merge_projections.push(ProjectionBuilder::merge(&collect_symbols, order_by));
        }
        if need_fetch {
            merge_projections.push(ProjectionBuilder::top_n(
                &collect_symbols,
                None,
                offset,
                limit,
                None,
            ));
            merge_projections.push(Projection::fetch(FetchProjection {
                collect_phase_id: collect_phase.phase_id,
                doc_id_column: 0,
                collect_symbols: collect_symbols.clone(),
                output_symbols,
                partitioned_by: table_info.partitioned_by_columns(),
                execution_nodes: collect_phase.execution_nodes(),
                is_limited: spec.is_limited(),
                reader_nodes: planner.reader_nodes().clone(),
                reader_shards: planner.reader_shards().clone(),
            }));
        } else {
            merge_projections.push(ProjectionBuilder::top_n(
                &collect_symbols,
                None,
                offset,
                limit,
                Some(spec.outputs()),
            ));
        }

        let mut execution_nodes = BTreeSet::new();
        if bounded.is_some_and(|bounded| bounded > settings.page_size) {
            execution_nodes.insert(planner.local_node_id().to_string());
        }

        let merge_phase = MergePhase {
            job_id,
            phase_id: planner.next_phase_id(),
            name: "localMerge".to_string(),
            input_types: collect_phase.output_types(),
            num_upstreams: collect_phase.execution_nodes().len(),
            projections: merge_projections,
            execution_nodes,
            order_by: order_by.map(|o| o.map_symbols(|s| to_input_column(s, &collect_symbols))),
        };

        tracing::debug!(
            "Planned query-then-fetch on {}: fetch={}, collecting {} columns, limit {:?}",
            table_info.ident(),
            need_fetch,
            collect_symbols.len(),
            bounded
        );

        Ok(Some(Plan::QueryThenFetch(QueryThenFetch {
            job_id,
            collect_phase,
            merge_phase,
        })))
    }
}
