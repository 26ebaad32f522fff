use crate::{Credential, TransportError};
use bytes::Bytes;
use futures::{future::BoxFuture, stream::BoxStream};
use std::{fmt::Debug, net::SocketAddr};

/// Response body, delivered in whatever chunks the network produced.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// One physical `POST` of a query body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub credential: Credential,
    pub body: Bytes,
}

pub struct HttpResponse {
    pub status: u16,
    /// Address the request was sent to, when the transport knows it.
    pub remote_addr: Option<SocketAddr>,
    /// Local address the request originated from, when the transport knows it.
    pub local_addr: Option<SocketAddr>,
    pub body: BodyStream,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

/// Sends requests and returns streaming responses.
///
/// Implementations own their connection pool. The default one is
/// [`ReqwestTransport`](crate::ReqwestTransport), tests plug in scripted doubles
/// through [`ClientAdapter::set_transport`](crate::ClientAdapter::set_transport).
pub trait HttpTransport: Send + Sync {
    /// Sends the request, resolving once the status line and headers are received.
    fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse, TransportError>>;

    /// Releases the pooled connections, called once by the adapter.
    fn close(&self) {}
}
