use std::cmp::Ordering;

use serde_json::Value;

use super::Downstream;
use crate::analyze::Symbol;
use crate::error::ExecResult;
use crate::operation::input::{compare_values, evaluate_all, values_equal, RowContext};
use crate::operation::ram::RamAccountingContext;
use crate::operation::sort::RowComparator;
use crate::planner::projection::WindowDefinition;
use crate::types::{estimate_row_size, Row};
use crate::window::{self, WindowFrameState, WindowFunction};

struct Buffered {
    partition: Vec<Value>,
    order: Vec<Value>,
    row: Row,
}

/// Evaluates window functions over the default frame
/// (`RANGE BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW`).
///
/// All input is buffered. On completion rows are sorted by partition and
/// window order, and every row is emitted with one extra column per
/// function.
pub struct WindowProjector {
    partition_by: Vec<Symbol>,
    comparator: Option<RowComparator>,
    functions: Vec<Box<dyn WindowFunction>>,
    ram: RamAccountingContext,
    rows: Vec<Buffered>,
    bytes: u64,
}

impl WindowProjector {
    pub fn new(
        definition: &WindowDefinition,
        functions: &[String],
        ram: RamAccountingContext,
    ) -> ExecResult<Self> {
        let functions = functions
            .iter()
            .map(|name| window::resolve(name))
            .collect::<ExecResult<Vec<_>>>()?;
        Ok(Self {
            partition_by: definition.partition_by.clone(),
            comparator: definition.order_by.as_ref().map(RowComparator::new),
            functions,
            ram,
            rows: Vec::new(),
            bytes: 0,
        })
    }

    pub fn set_next_row(&mut self, row: Row) -> ExecResult<bool> {
        let size = estimate_row_size(&row);
        self.ram.add_bytes(size)?;
        self.bytes += size;
        let partition = evaluate_all(&self.partition_by, &RowContext::new(&row))?;
        let order = match &self.comparator {
            Some(comparator) => comparator.sort_values(&row)?,
            None => Vec::new(),
        };
        self.rows.push(Buffered {
            partition,
            order,
            row,
        });
        Ok(true)
    }

    fn compare_order(&self, a: &[Value], b: &[Value]) -> Ordering {
        match &self.comparator {
            Some(comparator) => comparator.compare_keys(a, b),
            None => Ordering::Equal,
        }
    }

    pub fn finish(&mut self, downstream: &Downstream<'_>) -> ExecResult<()> {
        let mut rows = std::mem::take(&mut self.rows);
        rows.sort_by(|a, b| {
            compare_partitions(&a.partition, &b.partition)
                .then_with(|| self.compare_order(&a.order, &b.order))
        });

        let mut start = 0;
        while start < rows.len() {
            let end = start
                + rows[start..]
                    .iter()
                    .take_while(|r| same_partition(&r.partition, &rows[start].partition))
                    .count();
            if !self.emit_partition(&mut rows[start..end], downstream)? {
                break;
            }
            start = end;
        }

        self.ram.release_bytes(self.bytes);
        self.bytes = 0;
        Ok(())
    }

    fn emit_partition(
        &mut self,
        partition: &mut [Buffered],
        downstream: &Downstream<'_>,
    ) -> ExecResult<bool> {
        let size = partition.len();
        let mut frame = WindowFrameState::new(0, size);
        let mut upper_bound = 0;

        for idx in 0..size {
            if idx >= upper_bound {
                // the frame ends one past the last peer of the current row
                upper_bound = idx
                    + 1
                    + partition[idx + 1..]
                        .iter()
                        .take_while(|r| {
                            self.compare_order(&r.order, &partition[idx].order) == Ordering::Equal
                        })
                        .count();
            }
            frame.update_upper_bound(upper_bound);

            let mut row = std::mem::take(&mut partition[idx].row);
            for function in self.functions.iter_mut() {
                row.push(function.execute(idx, &frame));
            }
            if !downstream.push(row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn compare_partitions(a: &[Value], b: &[Value]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(a, b)| compare_values(a, b))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn same_partition(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| values_equal(a, b))
}
