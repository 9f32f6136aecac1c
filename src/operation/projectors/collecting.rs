use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::{ExecError, ExecResult};
use crate::operation::ram::RamAccountingContext;
use crate::types::{estimate_row_size, Row};

pub type ResultSender = oneshot::Sender<ExecResult<Arc<Vec<Row>>>>;

/// Terminal projector materializing every row it receives
pub struct CollectingProjector {
    rows: Vec<Row>,
    ram: RamAccountingContext,
    result: Option<ResultSender>,
}

impl CollectingProjector {
    pub fn new(ram: RamAccountingContext, result: ResultSender) -> Self {
        Self {
            rows: Vec::new(),
            ram,
            result: Some(result),
        }
    }

    pub fn set_next_row(&mut self, row: Row) -> ExecResult<bool> {
        self.ram.add_bytes(estimate_row_size(&row))?;
        self.rows.push(row);
        Ok(true)
    }

    pub fn finish(&mut self) -> ExecResult<()> {
        let rows = std::mem::take(&mut self.rows);
        if let Some(result) = self.result.take() {
            let _ = result.send(Ok(Arc::new(rows)));
        }
        Ok(())
    }

    pub fn fail(&mut self, err: &ExecError) {
        self.rows.clear();
        if let Some(result) = self.result.take() {
            let _ = result.send(Err(err.clone()));
        }
    }
}
