use std::collections::BTreeMap;
use std::sync::Arc;

use super::Downstream;
use crate::error::{ExecError, ExecResult};
use crate::operation::collect::{decode_doc_id, DocFetcher};
use crate::operation::input::{evaluate_all, FetchContext};
use crate::planner::projection::FetchProjection;
use crate::types::Row;

/// Resolves the output columns of bounded rows by looking up their source
/// documents, one batch at a time.
pub struct FetchProjector {
    projection: FetchProjection,
    fetcher: Arc<dyn DocFetcher>,
    batch_size: usize,
    pending: Vec<Row>,
}

impl FetchProjector {
    pub fn new(projection: FetchProjection, fetcher: Arc<dyn DocFetcher>, batch_size: usize) -> Self {
        Self {
            projection,
            fetcher,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
        }
    }

    pub fn set_next_row(&mut self, row: Row, downstream: &Downstream<'_>) -> ExecResult<bool> {
        self.pending.push(row);
        if self.pending.len() >= self.batch_size {
            return self.flush(downstream);
        }
        Ok(true)
    }

    pub fn finish(&mut self, downstream: &Downstream<'_>) -> ExecResult<()> {
        self.flush(downstream).map(|_| ())
    }

    fn doc_id(&self, row: &Row) -> ExecResult<(u32, u32)> {
        row.get(self.projection.doc_id_column)
            .and_then(|v| v.as_i64())
            .map(decode_doc_id)
            .ok_or_else(|| {
                ExecError::Execution(format!(
                    "Row has no document id in column {}",
                    self.projection.doc_id_column
                ))
            })
    }

    fn flush(&mut self, downstream: &Downstream<'_>) -> ExecResult<bool> {
        if self.pending.is_empty() {
            return Ok(true);
        }
        let rows = std::mem::take(&mut self.pending);
        let ids = rows
            .iter()
            .map(|row| self.doc_id(row))
            .collect::<ExecResult<Vec<_>>>()?;

        let mut by_reader: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for (reader_id, doc_id) in &ids {
            by_reader.entry(*reader_id).or_default().push(*doc_id);
        }

        let mut documents = BTreeMap::new();
        for (reader_id, doc_ids) in by_reader {
            if !self.projection.reader_nodes.contains_key(&reader_id) {
                return Err(ExecError::Execution(format!(
                    "Unknown reader {} in fetch for phase {}",
                    reader_id, self.projection.collect_phase_id
                )));
            }
            let fetched = self.fetcher.fetch(reader_id, &doc_ids)?;
            tracing::debug!("Fetched {} documents from reader {}", fetched.len(), reader_id);
            documents.insert(reader_id, fetched);
        }

        for (row, (reader_id, doc_id)) in rows.iter().zip(ids) {
            let source = documents
                .get(&reader_id)
                .and_then(|docs| docs.get(&doc_id))
                .ok_or_else(|| {
                    ExecError::Execution(format!(
                        "Document {} not found on reader {}",
                        doc_id, reader_id
                    ))
                })?;
            let output = evaluate_all(&self.projection.output_symbols, &FetchContext::new(row, source))?;
            if !downstream.push(output)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
