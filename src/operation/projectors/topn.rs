use serde_json::Value;

use super::Downstream;
use crate::analyze::{OrderBy, Symbol};
use crate::error::ExecResult;
use crate::operation::input::{evaluate_all, RowContext};
use crate::operation::ram::RamAccountingContext;
use crate::operation::sort::RowComparator;
use crate::types::{estimate_row_size, Row};

/// Candidate rows kept before an ordered top-N compacts its buffer, as a
/// multiple of `offset + limit`
const COMPACT_FACTOR: usize = 2;

/// Skips `offset` rows, emits at most `limit` rows and projects them onto
/// `outputs`.
///
/// Unordered input streams straight through and signals the upstream to
/// stop once the limit is reached. Ordered input is buffered; the buffer is
/// sorted and cut back to `offset + limit` whenever it grows too large.
pub struct TopNProjector {
    offset: usize,
    limit: Option<usize>,
    outputs: Vec<Symbol>,
    comparator: Option<RowComparator>,
    ram: RamAccountingContext,
    skipped: usize,
    emitted: usize,
    buffer: Vec<(Vec<Value>, Row)>,
    buffered_bytes: u64,
}

impl TopNProjector {
    pub fn new(
        offset: usize,
        limit: Option<usize>,
        order_by: Option<&OrderBy>,
        outputs: Vec<Symbol>,
        ram: RamAccountingContext,
    ) -> Self {
        Self {
            offset,
            limit,
            outputs,
            comparator: order_by.map(RowComparator::new),
            ram,
            skipped: 0,
            emitted: 0,
            buffer: Vec::new(),
            buffered_bytes: 0,
        }
    }

    fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|limit| self.emitted >= limit)
    }

    pub fn set_next_row(&mut self, row: Row, downstream: &Downstream<'_>) -> ExecResult<bool> {
        if let Some(comparator) = &self.comparator {
            let keys = comparator.sort_values(&row)?;
            let size = estimate_row_size(&row);
            self.ram.add_bytes(size)?;
            self.buffered_bytes += size;
            self.buffer.push((keys, row));
            if let Some(limit) = self.limit {
                let keep = self.offset + limit;
                if self.buffer.len() > keep.max(1) * COMPACT_FACTOR {
                    self.compact(keep);
                }
            }
            return Ok(true);
        }

        if self.limit_reached() {
            return Ok(false);
        }
        if self.skipped < self.offset {
            self.skipped += 1;
            return Ok(true);
        }
        let projected = evaluate_all(&self.outputs, &RowContext::new(&row))?;
        self.emitted += 1;
        let wants_more = downstream.push(projected)?;
        Ok(wants_more && !self.limit_reached())
    }

    fn sort_buffer(&mut self) {
        if let Some(comparator) = &self.comparator {
            self.buffer
                .sort_by(|(a, _), (b, _)| comparator.compare_keys(a, b));
        }
    }

    fn compact(&mut self, keep: usize) {
        self.sort_buffer();
        self.buffer.truncate(keep);
        let retained: u64 = self.buffer.iter().map(|(_, row)| estimate_row_size(row)).sum();
        self.ram
            .release_bytes(self.buffered_bytes.saturating_sub(retained));
        self.buffered_bytes = retained;
    }

    pub fn finish(&mut self, downstream: &Downstream<'_>) -> ExecResult<()> {
        if self.comparator.is_none() {
            return Ok(());
        }
        self.sort_buffer();
        let buffer = std::mem::take(&mut self.buffer);
        let take = self.limit.unwrap_or(usize::MAX);
        for (_, row) in buffer.into_iter().skip(self.offset).take(take) {
            let projected = evaluate_all(&self.outputs, &RowContext::new(&row))?;
            if !downstream.push(projected)? {
                break;
            }
        }
        self.ram.release_bytes(self.buffered_bytes);
        self.buffered_bytes = 0;
        Ok(())
    }
}
