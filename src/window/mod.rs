//! Window functions
//!
//! Functions are evaluated row by row over an ordered partition. The window
//! projector computes the frame for each row and hands it to every function.

pub mod frame;
pub mod rank;

use serde_json::Value;

use crate::error::{ExecError, ExecResult};

pub use frame::WindowFrameState;
pub use rank::{RankFunction, RankKind, RowNumber};

/// A stateful function evaluated once per row of a partition, in order.
pub trait WindowFunction: Send {
    fn name(&self) -> &'static str;

    fn execute(&mut self, idx_in_partition: usize, frame: &WindowFrameState) -> Value;
}

/// Names accepted by [`resolve`]
pub const WINDOW_FUNCTIONS: &[&str] = &["rank", "dense_rank", "row_number"];

/// Instantiate a window function by name
pub fn resolve(name: &str) -> ExecResult<Box<dyn WindowFunction>> {
    match name.to_lowercase().as_str() {
        "rank" => Ok(Box::new(RankFunction::rank())),
        "dense_rank" => Ok(Box::new(RankFunction::dense_rank())),
        "row_number" => Ok(Box::new(RowNumber)),
        other => Err(ExecError::Configuration(format!(
            "Unknown window function: {}",
            other
        ))),
    }
}
