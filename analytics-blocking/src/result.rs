use crate::BlockingRuntime;
use analytics_core::{
    Error, QueryMetadata, QueryResult, RequestContext, Result, RowStream, stream::StreamExt,
};
use serde_json::Value;
use std::{
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::task::AbortHandle;

/// Blocking counterpart of [`QueryResult`].
pub struct BlockingQueryResult {
    result: Option<QueryResult>,
    context: RequestContext,
    runtime: Arc<BlockingRuntime>,
    row_buffer: usize,
}

impl BlockingQueryResult {
    pub(crate) fn new(result: QueryResult, runtime: Arc<BlockingRuntime>, row_buffer: usize) -> Self {
        Self {
            context: result.context().clone(),
            result: Some(result),
            runtime,
            row_buffer,
        }
    }

    /// Iterator over the rows, can be called only once.
    ///
    /// Rows are pulled in the background only while the iterator has room in
    /// its buffer. Dropping it stops the background read and releases the
    /// connection.
    pub fn rows(&mut self) -> BlockingRows {
        match self.result.as_mut() {
            Some(result) => BlockingRows::new(
                result.rows(),
                self.runtime.clone(),
                self.row_buffer,
                self.context.clone(),
            ),
            None => BlockingRows::failed(self.lost()),
        }
    }

    pub fn get_all_rows(&mut self) -> Result<Vec<Value>> {
        self.rows().collect()
    }

    pub fn metadata(&self) -> Result<&QueryMetadata> {
        match self.result.as_ref() {
            Some(result) => result.metadata(),
            None => Err(self.lost()),
        }
    }

    /// Consumes the rest of the response without decoding it.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut result) = self.result.take() else {
            return Err(self.lost());
        };
        let (result, outcome) = self.runtime.block_on(async move {
            let outcome = result.close().await;
            Ok((result, outcome))
        })?;
        self.result = Some(result);
        outcome
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    fn lost(&self) -> Error {
        Error::closed("The result was lost when the background runtime was shut down")
            .with_context(self.context.clone())
    }
}

impl Debug for BlockingQueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingQueryResult")
            .field("result", &self.result)
            .finish()
    }
}

/// Rows handed over from the background runtime through a bounded channel.
pub struct BlockingRows {
    rx: Option<flume::Receiver<Result<Value>>>,
    finished: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
    runtime: Option<Arc<BlockingRuntime>>,
    context: RequestContext,
    error: Option<Error>,
}

impl BlockingRows {
    fn new(
        mut stream: RowStream,
        runtime: Arc<BlockingRuntime>,
        capacity: usize,
        context: RequestContext,
    ) -> Self {
        let (tx, rx) = flume::bounded(capacity.max(1));
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let spawned = runtime.spawn(async move {
            while let Some(row) = stream.next().await {
                let failed = row.is_err();
                if tx.send_async(row).await.is_err() || failed {
                    break;
                }
            }
            done.store(true, Ordering::Release);
        });
        match spawned {
            Ok(handle) => Self {
                rx: Some(rx),
                finished,
                abort: Some(handle.abort_handle()),
                runtime: Some(runtime),
                context,
                error: None,
            },
            Err(e) => Self::failed(e),
        }
    }

    fn failed(error: Error) -> Self {
        Self {
            rx: None,
            finished: Arc::new(AtomicBool::new(true)),
            abort: None,
            runtime: None,
            context: Default::default(),
            error: Some(error),
        }
    }
}

impl Iterator for BlockingRows {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.error.take() {
            return Some(Err(error));
        }
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(Ok(row)) => Some(Ok(row)),
            Ok(Err(e)) => {
                self.rx = None;
                Some(Err(e))
            }
            Err(flume::RecvError::Disconnected) => {
                self.rx = None;
                if self.finished.load(Ordering::Acquire) {
                    return None;
                }
                let closed = self.runtime.as_ref().is_some_and(|v| v.is_closed());
                let error = if closed {
                    Error::closed("The background runtime was shut down while the rows were being read")
                } else {
                    Error::protocol("The background reader stopped before the end of the rows")
                }
                .with_context(self.context.clone());
                log::error!("{:#}", error);
                Some(Err(error))
            }
        }
    }
}

impl Drop for BlockingRows {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
    }
}
