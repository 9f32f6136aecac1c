use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, Shared};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tokio::sync::mpsc;

use super::collecting::ResultSender;
use crate::error::{ExecError, ExecResult};
use crate::types::Row;

/// Terminal projector handing rows to a bounded channel.
///
/// Pushing blocks the producing shard thread while the channel is full, so
/// the consumer of the [`RowStream`] controls the pace.
pub struct StreamingProjector {
    rows: Option<mpsc::Sender<Row>>,
    result: Option<ResultSender>,
}

impl StreamingProjector {
    pub fn new(rows: mpsc::Sender<Row>, result: ResultSender) -> Self {
        Self {
            rows: Some(rows),
            result: Some(result),
        }
    }

    pub fn set_next_row(&mut self, row: Row) -> ExecResult<bool> {
        let Some(rows) = self.rows.as_ref() else {
            return Ok(false);
        };
        match rows.blocking_send(row) {
            Ok(()) => Ok(true),
            Err(_) => {
                // consumer went away
                tracing::debug!("Row stream dropped, stopping upstream");
                self.rows = None;
                Ok(false)
            }
        }
    }

    pub fn finish(&mut self) -> ExecResult<()> {
        self.rows = None;
        if let Some(result) = self.result.take() {
            let _ = result.send(Ok(Arc::new(Vec::new())));
        }
        Ok(())
    }

    pub fn fail(&mut self, err: &ExecError) {
        self.rows = None;
        if let Some(result) = self.result.take() {
            let _ = result.send(Err(err.clone()));
        }
    }
}

pub type SharedResult = Shared<BoxFuture<'static, ExecResult<Arc<Vec<Row>>>>>;

/// Pull side of a streaming chain. Yields rows as they arrive and ends with
/// the chain's failure, if there was one.
pub struct RowStream {
    inner: BoxStream<'static, ExecResult<Row>>,
}

impl RowStream {
    pub fn new(rows: mpsc::Receiver<Row>, result: SharedResult) -> Self {
        let rows = stream::unfold(rows, |mut rows| async move {
            rows.recv().await.map(|row| (Ok(row), rows))
        });
        let outcome = stream::once(result).filter_map(|outcome| async move {
            match outcome {
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            }
        });
        Self {
            inner: rows.chain(outcome).boxed(),
        }
    }
}

impl Stream for RowStream {
    type Item = ExecResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
