use crate::{
    BodyStream, Deserializer, Error, JsonStreamDecoder, QueryMetadata, RequestContext, Result,
    adapter::ShutdownSignal,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, Ordering},
};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Draining,
    Closed,
}

/// State of a [`StreamHandle`], readable after the handle moved into a row stream.
#[derive(Debug, Default, Clone)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub(crate) fn get(&self) -> StreamState {
        match self.0.load(Ordering::Acquire) {
            0 => StreamState::Open,
            1 => StreamState::Draining,
            _ => StreamState::Closed,
        }
    }

    fn set(&self, state: StreamState) {
        let value = match state {
            StreamState::Open => 0,
            StreamState::Draining => 1,
            StreamState::Closed => 2,
        };
        self.0.store(value, Ordering::Release);
    }
}

/// Exclusive owner of one open response body.
///
/// The body is released exactly once: at the end of the data, on failure, on
/// explicit close or when the handle is dropped.
pub(crate) struct StreamHandle {
    body: Option<BodyStream>,
    state: SharedState,
}

impl StreamHandle {
    pub(crate) fn new(body: BodyStream) -> Self {
        Self {
            body: Some(body),
            state: Default::default(),
        }
    }

    pub(crate) fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub(crate) fn begin_drain(&mut self) {
        if self.state.get() == StreamState::Open {
            self.state.set(StreamState::Draining);
        }
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        let Some(body) = self.body.as_mut() else {
            return Ok(None);
        };
        match body.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => {
                self.close();
                Err(e.into())
            }
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    pub(crate) fn close(&mut self) {
        if self.body.take().is_some() {
            log::trace!("Released the response body");
        }
        self.state.set(StreamState::Closed);
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pulls rows out of a response body, feeding the decoder at most
/// `chunk_size` bytes at a time.
pub(crate) struct ResultReader {
    handle: StreamHandle,
    decoder: JsonStreamDecoder,
    pending: Bytes,
    chunk_size: usize,
    deserializer: Arc<dyn Deserializer>,
    deadline: Instant,
    shutdown: Arc<ShutdownSignal>,
    status: u16,
    context: RequestContext,
    metadata: Arc<OnceLock<QueryMetadata>>,
    delivered: u64,
    done: bool,
}

impl ResultReader {
    pub(crate) fn new(
        body: BodyStream,
        status: u16,
        chunk_size: usize,
        deserializer: Arc<dyn Deserializer>,
        deadline: Instant,
        shutdown: Arc<ShutdownSignal>,
    ) -> Self {
        Self {
            handle: StreamHandle::new(body),
            decoder: JsonStreamDecoder::new(),
            pending: Bytes::new(),
            chunk_size: chunk_size.max(1),
            deserializer,
            deadline,
            shutdown,
            status,
            context: Default::default(),
            metadata: Default::default(),
            delivered: 0,
            done: false,
        }
    }

    pub(crate) fn set_context(&mut self, context: RequestContext) {
        self.context = context;
    }

    pub(crate) fn metadata(&self) -> Arc<OnceLock<QueryMetadata>> {
        self.metadata.clone()
    }

    pub(crate) fn state(&self) -> SharedState {
        self.handle.state()
    }

    /// Reads until the first row is decoded or the document ends.
    ///
    /// Fails with the service error when the document ends carrying `errors`
    /// and no rows.
    pub(crate) async fn prime(&mut self) -> Result<()> {
        while !self.decoder.has_row() && !self.done {
            if self.decoder.is_complete() || !self.fill().await? {
                self.complete()?;
            }
        }
        Ok(())
    }

    /// Next raw row, `None` once the document is complete.
    async fn next_raw(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(row) = self.decoder.next_row() {
                return Ok(Some(row));
            }
            if self.done {
                return Ok(None);
            }
            if self.decoder.is_complete() || !self.fill().await? {
                self.complete()?;
                return Ok(None);
            }
        }
    }

    pub(crate) async fn next_row(&mut self) -> Result<Option<Value>> {
        let Some(row) = self.next_raw().await? else {
            return Ok(None);
        };
        match self.deserializer.deserialize(&row) {
            Ok(value) => {
                self.delivered += 1;
                Ok(Some(value))
            }
            Err(e) => Err(self.abort(
                Error::decode(format!(
                    "Could not deserialize row {} of the result",
                    self.delivered + 1
                ))
                .with_source(e),
            )),
        }
    }

    /// Consumes the rest of the body without decoding the rows.
    pub(crate) async fn drain(&mut self) -> Result<()> {
        self.handle.begin_drain();
        self.decoder.discard_rows();
        while self.next_raw().await?.is_some() {}
        Ok(())
    }

    /// Feeds the decoder one step, `false` once the body is over.
    async fn fill(&mut self) -> Result<bool> {
        if self.pending.is_empty() {
            let chunk = tokio::select! {
                biased;
                _ = self.shutdown.wait() => Err(Error::closed(
                    "The client was closed while the result was being read",
                )),
                _ = tokio::time::sleep_until(self.deadline) => Err(Error::timeout(
                    "The query timeout elapsed while the result was being read",
                )),
                chunk = self.handle.next_chunk() => chunk,
            };
            match chunk {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => return Ok(false),
                Err(e) => return Err(self.abort(e)),
            }
        }
        let step = self.pending.split_to(self.chunk_size.min(self.pending.len()));
        if let Err(e) = self.decoder.feed(&step) {
            return Err(self.abort(e));
        }
        Ok(true)
    }

    /// Closes the handle once the document is over and publishes the metadata.
    fn complete(&mut self) -> Result<()> {
        self.done = true;
        self.handle.close();
        let envelope = match self.decoder.finish() {
            Ok(envelope) => envelope,
            Err(e) => return Err(e.with_context(self.context.clone())),
        };
        let errors = envelope.errors.clone();
        let _ = self.metadata.set(envelope.into_metadata());
        if !errors.is_empty() {
            return Err(Error::service(Some(self.status), errors).with_context(self.context.clone()));
        }
        Ok(())
    }

    fn abort(&mut self, error: Error) -> Error {
        self.done = true;
        self.pending = Bytes::new();
        self.decoder.discard_rows();
        self.handle.close();
        error.with_context(self.context.clone())
    }
}
