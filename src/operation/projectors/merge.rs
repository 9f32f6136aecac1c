use serde_json::Value;

use super::Downstream;
use crate::analyze::OrderBy;
use crate::error::ExecResult;
use crate::operation::ram::RamAccountingContext;
use crate::operation::sort::RowComparator;
use crate::types::{estimate_row_size, Row};

/// Sorted merge of all upstreams. Rows are gathered until the last upstream
/// finishes and then emitted in order, whatever order they arrived in.
pub struct MergeProjector {
    comparator: RowComparator,
    ram: RamAccountingContext,
    rows: Vec<(Vec<Value>, Row)>,
    bytes: u64,
}

impl MergeProjector {
    pub fn new(order_by: &OrderBy, ram: RamAccountingContext) -> Self {
        Self {
            comparator: RowComparator::new(order_by),
            ram,
            rows: Vec::new(),
            bytes: 0,
        }
    }

    pub fn set_next_row(&mut self, row: Row) -> ExecResult<bool> {
        let size = estimate_row_size(&row);
        self.ram.add_bytes(size)?;
        self.bytes += size;
        let keys = self.comparator.sort_values(&row)?;
        self.rows.push((keys, row));
        Ok(true)
    }

    pub fn finish(&mut self, downstream: &Downstream<'_>) -> ExecResult<()> {
        let mut rows = std::mem::take(&mut self.rows);
        rows.sort_by(|(a, _), (b, _)| self.comparator.compare_keys(a, b));
        for (_, row) in rows {
            if !downstream.push(row)? {
                break;
            }
        }
        self.ram.release_bytes(self.bytes);
        self.bytes = 0;
        Ok(())
    }
}
