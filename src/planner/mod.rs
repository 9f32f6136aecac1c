//! Planning: projections, execution phases and the query-then-fetch
//! consumer that assembles them.

pub mod builder;
pub mod consumer;
pub mod context;
pub mod fetch_pushdown;
pub mod phase;
pub mod plan;
pub mod projection;
pub mod streamer;

pub use consumer::QueryThenFetchConsumer;
pub use context::{ConsumerContext, PlannerContext};
pub use phase::{CollectPhase, ExecutionPhase, FetchPhase, MergePhase, NestedLoopPhase};
pub use plan::{Plan, QueryThenFetch};
pub use projection::{Projection, ProjectionKind};
pub use streamer::{streamers_for, RowStreamer, Streamer};
