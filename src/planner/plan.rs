use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::{CollectPhase, MergePhase};
use super::projection::{Projection, ProjectionKind};
use crate::error::{ExecError, ExecResult};

/// Collect on the shards, merge on one node, fetch after bounding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryThenFetch {
    pub job_id: Uuid,
    pub collect_phase: CollectPhase,
    pub merge_phase: MergePhase,
}

impl QueryThenFetch {
    pub fn needs_fetch(&self) -> bool {
        self.merge_phase
            .projections
            .iter()
            .any(|p| matches!(p.kind(), ProjectionKind::Fetch(_)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Plan {
    /// The query can never match a row
    Noop { job_id: Uuid },
    QueryThenFetch(QueryThenFetch),
}

impl Plan {
    pub fn job_id(&self) -> Uuid {
        match self {
            Plan::Noop { job_id } => *job_id,
            Plan::QueryThenFetch(plan) => plan.job_id,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Plan::Noop { .. })
    }

    /// Append a projection to the final (merge) step of the plan
    pub fn add_projection(&mut self, projection: Projection) -> ExecResult<()> {
        match self {
            Plan::Noop { .. } => Err(ExecError::UnsupportedOperation(
                "Cannot add a projection to an empty plan".to_string(),
            )),
            Plan::QueryThenFetch(plan) => {
                plan.merge_phase.projections.push(projection);
                Ok(())
            }
        }
    }
}
