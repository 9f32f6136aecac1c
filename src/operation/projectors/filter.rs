use super::Downstream;
use crate::analyze::Symbol;
use crate::error::ExecResult;
use crate::operation::input::{evaluate, to_bool, RowContext};
use crate::types::Row;

/// Passes on rows for which the condition evaluates to true. Null counts as
/// false.
pub struct FilterProjector {
    condition: Symbol,
}

impl FilterProjector {
    pub fn new(condition: Symbol) -> Self {
        Self { condition }
    }

    pub fn set_next_row(&mut self, row: Row, downstream: &Downstream<'_>) -> ExecResult<bool> {
        let matched = to_bool(&evaluate(&self.condition, &RowContext::new(&row))?);
        if matched {
            downstream.push(row)
        } else {
            Ok(true)
        }
    }
}
