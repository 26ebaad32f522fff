use crate::{
    Error, QueryMetadata, RequestContext, Result, StreamState,
    reader::{ResultReader, SharedState},
};
use async_stream::try_stream;
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use serde_json::Value;
use std::{
    fmt::{self, Debug},
    sync::{Arc, OnceLock},
};

/// Rows of a result, in the order the service sent them.
pub type RowStream = BoxStream<'static, Result<Value>>;

/// Outcome of a successful dispatch: the rows still to be read and, once the
/// response is fully consumed, its metadata.
pub struct QueryResult {
    reader: Option<ResultReader>,
    state: SharedState,
    metadata: Arc<OnceLock<QueryMetadata>>,
    context: RequestContext,
}

impl QueryResult {
    pub(crate) fn new(reader: ResultReader, context: RequestContext) -> Self {
        Self {
            state: reader.state(),
            metadata: reader.metadata(),
            reader: Some(reader),
            context,
        }
    }

    /// Lazy, single pass stream of the rows.
    ///
    /// Can be called only once. Dropping the stream before its end releases
    /// the connection at once, the metadata of an abandoned result stays
    /// unavailable.
    pub fn rows(&mut self) -> RowStream {
        let Some(mut reader) = self.reader.take() else {
            return stream::once(async {
                Err(Error::usage(
                    "The rows of this result were already requested or the result is closed",
                ))
            })
            .boxed();
        };
        try_stream! {
            while let Some(row) = reader.next_row().await? {
                yield row;
            }
        }
        .map_err(|e: Error| {
            log::error!("{:#}", e);
            e
        })
        .boxed()
    }

    /// Reads every row, the metadata is available afterwards.
    pub async fn get_all_rows(&mut self) -> Result<Vec<Value>> {
        self.rows().try_collect().await
    }

    /// Metadata of a result whose stream reached its end.
    pub fn metadata(&self) -> Result<&QueryMetadata> {
        self.metadata.get().ok_or_else(|| {
            Error::usage(
                "The metadata is available only after all the rows are read or the result is closed",
            )
            .with_context(self.context.clone())
        })
    }

    /// Consumes the rest of the response without decoding it.
    pub async fn close(&mut self) -> Result<()> {
        match self.reader.take() {
            Some(mut reader) => reader.drain().await,
            None => Ok(()),
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Whether the rows are still waiting to be requested.
    pub fn is_pending(&self) -> bool {
        self.reader.is_some()
    }

    /// State of the response body, also while a row stream is reading it.
    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == StreamState::Closed
    }
}

impl Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("state", &self.state())
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::QueryResult;
    use crate::{
        BodyStream, DefaultJsonDeserializer, ErrorKind, PassthroughDeserializer, RequestContext,
        StreamState, TransportError, adapter::ShutdownSignal, reader::ResultReader,
    };
    use bytes::Bytes;
    use futures::{StreamExt, TryStreamExt, stream};
    use serde_json::json;
    use std::{sync::Arc, time::Duration};
    use tokio::time::Instant;

    const BODY: &str = r#"{"requestID":"r","results":[{"$1":1},{"$1":2},{"$1":3}],"status":"success","metrics":{"elapsedTime":"1ms","resultCount":3}}"#;

    fn body(chunks: Vec<&'static str>) -> BodyStream {
        stream::iter(
            chunks
                .into_iter()
                .map(|v| Ok::<_, TransportError>(Bytes::from_static(v.as_bytes()))),
        )
        .boxed()
    }

    fn result(body: BodyStream, chunk_size: usize) -> QueryResult {
        let reader = ResultReader::new(
            body,
            200,
            chunk_size,
            Arc::new(DefaultJsonDeserializer),
            Instant::now() + Duration::from_secs(5),
            Arc::new(ShutdownSignal::new()),
        );
        QueryResult::new(reader, RequestContext::new("SELECT 1", "id"))
    }

    #[tokio::test]
    async fn eager_matches_lazy() {
        for chunk_size in [1, 2, 7, 8192] {
            let mut lazy = result(body(vec![&BODY[..10], &BODY[10..]]), chunk_size);
            let mut stream = lazy.rows();
            let mut rows = Vec::new();
            while let Some(row) = stream.try_next().await.unwrap() {
                rows.push(row);
            }
            drop(stream);
            let mut eager = result(body(vec![BODY]), chunk_size);
            assert_eq!(eager.get_all_rows().await.unwrap(), rows);
            assert_eq!(rows, vec![json!({"$1": 1}), json!({"$1": 2}), json!({"$1": 3})]);
            assert_eq!(lazy.metadata().unwrap().metrics.result_count, 3);
            assert_eq!(eager.metadata().unwrap(), lazy.metadata().unwrap());
        }
    }

    #[tokio::test]
    async fn metadata_after_close() {
        let mut result = result(body(vec![BODY]), 16);
        assert_eq!(result.metadata().unwrap_err().kind(), ErrorKind::Usage);
        result.close().await.unwrap();
        assert_eq!(result.metadata().unwrap().request_id.as_deref(), Some("r"));
        assert!(result.is_closed());
        let error = result.rows().next().await.unwrap().unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn state_while_streaming() {
        let mut streamed = result(body(vec![&BODY[..40], &BODY[40..]]), 8);
        assert_eq!(streamed.state(), StreamState::Open);
        let mut rows = streamed.rows();
        assert_eq!(rows.try_next().await.unwrap(), Some(json!({"$1": 1})));
        assert_eq!(streamed.state(), StreamState::Open);
        assert!(!streamed.is_closed());
        while rows.try_next().await.unwrap().is_some() {}
        assert_eq!(streamed.state(), StreamState::Closed);
        assert_eq!(streamed.metadata().unwrap().metrics.result_count, 3);

        let mut abandoned = result(body(vec![BODY]), 8);
        drop(abandoned.rows());
        assert_eq!(abandoned.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn abandoned_has_no_metadata() {
        let mut result = result(body(vec![BODY]), 8);
        {
            let mut rows = result.rows();
            assert_eq!(rows.try_next().await.unwrap(), Some(json!({"$1": 1})));
        }
        assert_eq!(result.metadata().unwrap_err().kind(), ErrorKind::Usage);
        let error = result.rows().try_next().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn decode_failure_aborts() {
        let reader = ResultReader::new(
            body(vec![r#"{"results":[{"a":1},{"a":},{"a":3}]}"#]),
            200,
            4,
            Arc::new(DefaultJsonDeserializer),
            Instant::now() + Duration::from_secs(5),
            Arc::new(ShutdownSignal::new()),
        );
        let mut result = QueryResult::new(reader, Default::default());
        let rows = result.rows().collect::<Vec<_>>().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(*rows[0].as_ref().unwrap(), json!({"a": 1}));
        assert_eq!(rows[1].as_ref().unwrap_err().kind(), ErrorKind::Decode);
    }

    #[tokio::test]
    async fn passthrough_rows() {
        let reader = ResultReader::new(
            body(vec![BODY]),
            200,
            8192,
            Arc::new(PassthroughDeserializer),
            Instant::now() + Duration::from_secs(5),
            Arc::new(ShutdownSignal::new()),
        );
        let mut result = QueryResult::new(reader, Default::default());
        assert_eq!(
            result.get_all_rows().await.unwrap(),
            vec![json!(r#"{"$1":1}"#), json!(r#"{"$1":2}"#), json!(r#"{"$1":3}"#)]
        );
    }

    #[tokio::test]
    async fn trailing_errors_and_truncation() {
        let mut result = result(
            body(vec![
                r#"{"results":[{"$1":1}],"errors":[{"code":21002,"msg":"Request timed out"}],"status":"timeout"}"#,
            ]),
            8192,
        );
        let rows = result.rows().collect::<Vec<_>>().await;
        assert_eq!(*rows[0].as_ref().unwrap(), json!({"$1": 1}));
        assert_eq!(rows[1].as_ref().unwrap_err().kind(), ErrorKind::Timeout);

        let mut result = result_truncated();
        let error = result.get_all_rows().await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Protocol);
    }

    fn result_truncated() -> QueryResult {
        result(body(vec![r#"{"results":[{"$1":1},"#]), 8192)
    }
}
