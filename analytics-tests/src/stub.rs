use analytics_core::{
    BodyStream, HttpRequest, HttpResponse, HttpTransport, TransportError,
    future::{self, BoxFuture, FutureExt},
    stream::StreamExt,
};
use async_stream::stream;
use bytes::Bytes;
use serde_json::Value;
use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubFailure {
    Connect,
    Network,
    Tls,
    Timeout,
}

/// Scripted answer to one request.
#[derive(Debug, Clone)]
pub enum StubResponse {
    Body {
        status: u16,
        chunks: Vec<Bytes>,
        remote_addr: Option<SocketAddr>,
        local_addr: Option<SocketAddr>,
        /// Keep the body open forever after the last chunk.
        hang: bool,
    },
    Fail(StubFailure),
    /// The request never completes.
    Hang,
}

impl StubResponse {
    pub fn ok(body: &str, parts: usize) -> Self {
        Self::status(200, body, parts)
    }

    pub fn status(status: u16, body: &str, parts: usize) -> Self {
        StubResponse::Body {
            status,
            chunks: chunked(body, parts),
            remote_addr: None,
            local_addr: None,
            hang: false,
        }
    }

    /// Sets the addresses reported for the exchange.
    pub fn between(mut self, remote: &str, local: &str) -> Self {
        if let StubResponse::Body {
            remote_addr,
            local_addr,
            ..
        } = &mut self
        {
            *remote_addr = remote.parse().ok();
            *local_addr = local.parse().ok();
        }
        self
    }

    pub fn then_hang(mut self) -> Self {
        if let StubResponse::Body { hang, .. } = &mut self {
            *hang = true;
        }
        self
    }
}

/// Splits `body` into `parts` chunks of about the same size.
pub fn chunked(body: &str, parts: usize) -> Vec<Bytes> {
    let bytes = Bytes::copy_from_slice(body.as_bytes());
    let parts = parts.clamp(1, bytes.len().max(1));
    let size = bytes.len().div_ceil(parts).max(1);
    let mut result = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let end = (offset + size).min(bytes.len());
        result.push(bytes.slice(offset..end));
        offset = end;
    }
    result
}

struct OpenBody(Arc<AtomicUsize>);

impl OpenBody {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OpenBody {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In memory transport answering from a script.
///
/// Counts the attempts, the response bodies currently alive and the chunks
/// pulled out of them, and keeps every request body it received.
#[derive(Default)]
pub struct StubTransport {
    script: Mutex<VecDeque<StubResponse>>,
    fallback: Mutex<Option<StubResponse>>,
    attempts: AtomicUsize,
    closes: AtomicUsize,
    open_bodies: Arc<AtomicUsize>,
    polled_chunks: Arc<AtomicUsize>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Default::default()
    }

    /// Answers the next request with `response`.
    pub fn then(self, response: StubResponse) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(response);
        }
        self
    }

    /// Answers every request past the end of the script with `response`.
    pub fn otherwise(self, response: StubResponse) -> Self {
        if let Ok(mut fallback) = self.fallback.lock() {
            *fallback = Some(response);
        }
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_bodies(&self) -> usize {
        self.open_bodies.load(Ordering::SeqCst)
    }

    pub fn polled_chunks(&self) -> usize {
        self.polled_chunks.load(Ordering::SeqCst)
    }

    /// URL and JSON body of every request received.
    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> Option<StubResponse> {
        let scripted = self.script.lock().ok().and_then(|mut v| v.pop_front());
        scripted.or_else(|| self.fallback.lock().ok().and_then(|v| v.clone()))
    }
}

impl HttpTransport for StubTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            let body = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
            requests.push((request.url.clone(), body));
        }
        let response = self.next_response();
        let open_bodies = self.open_bodies.clone();
        let polled_chunks = self.polled_chunks.clone();
        async move {
            match response {
                Some(StubResponse::Body {
                    status,
                    chunks,
                    remote_addr,
                    local_addr,
                    hang,
                }) => {
                    let guard = OpenBody::new(open_bodies);
                    let body: BodyStream = stream! {
                        let _guard = guard;
                        for chunk in chunks {
                            polled_chunks.fetch_add(1, Ordering::SeqCst);
                            yield Ok::<_, TransportError>(chunk);
                        }
                        if hang {
                            future::pending::<()>().await;
                        }
                    }
                    .boxed();
                    Ok(HttpResponse {
                        status,
                        remote_addr,
                        local_addr,
                        body,
                    })
                }
                Some(StubResponse::Fail(failure)) => Err(match failure {
                    StubFailure::Connect => TransportError::connect("Connection refused (os error 111)"),
                    StubFailure::Network => TransportError::network("Connection reset by peer (os error 104)"),
                    StubFailure::Tls => TransportError::Tls("certificate verify failed".into()),
                    StubFailure::Timeout => TransportError::Timeout("connect timed out".into()),
                }),
                Some(StubResponse::Hang) => {
                    future::pending::<()>().await;
                    Err(TransportError::Closed)
                }
                None => Err(TransportError::connect("The stub transport has no response left")),
            }
        }
        .boxed()
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
