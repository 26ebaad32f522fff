use crate::RequestContext;
use serde::Deserialize;
use std::fmt::{self, Display};

pub type Result<T> = std::result::Result<T, Error>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable classification of every failure the client can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Name resolution, connect or network failure.
    Connectivity,
    /// Connect or query budget exceeded.
    Timeout,
    /// TLS handshake or certificate verification failure.
    Tls,
    /// Malformed or truncated response framing.
    Protocol,
    /// Well formed error payload reported by the service.
    Service,
    /// A row could not be transformed by the deserializer.
    Decode,
    /// The client (or its background runtime) was shut down.
    Closed,
    /// Rejected configuration or query options.
    InvalidArgument,
    /// API misuse, like reading metadata before the stream is closed.
    Usage,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Connectivity => "ConnectivityError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Tls => "TLSError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::Service => "ServiceError",
            ErrorKind::Decode => "DecodeError",
            ErrorKind::Closed => "ClosedError",
            ErrorKind::InvalidArgument => "InvalidArgumentError",
            ErrorKind::Usage => "UsageError",
        })
    }
}

/// One entry of the `errors` array returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceErrorEntry {
    pub code: i64,
    pub msg: String,
    #[serde(default)]
    pub retriable: bool,
}

impl ServiceErrorEntry {
    pub const TRANSIENT_CODES: [i64; 3] = [23000, 23003, 23007];
    pub const AUTH_FAILURE: i64 = 20001;
    pub const TIMEOUT: i64 = 21002;
    pub const SYNTAX_ERROR: i64 = 24000;

    pub fn is_transient(&self) -> bool {
        self.retriable || Self::TRANSIENT_CODES.contains(&self.code)
    }
}

impl Display for ServiceErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.msg)
    }
}

/// Error returned by every fallible operation of the client.
///
/// Always carries a [`ErrorKind`], a message and the [`RequestContext`] of the
/// request it belongs to (empty when the failure happened outside a request).
/// Service failures also expose the raw entries reported by the server.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}, context={context}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: RequestContext,
    service_errors: Vec<ServiceErrorEntry>,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Default::default(),
            service_errors: Vec::new(),
            source: None,
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connectivity, message)
    }
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
    pub fn tls(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Tls, message)
    }
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }
    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Closed, message)
    }
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }
    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    /// Builds a service failure out of the entries of an `errors` array.
    ///
    /// The server timeout code is reported as [`ErrorKind::Timeout`] so callers
    /// can treat every exceeded budget alike.
    pub fn service(status: Option<u16>, entries: Vec<ServiceErrorEntry>) -> Self {
        let kind = if entries.iter().any(|e| e.code == ServiceErrorEntry::TIMEOUT) {
            ErrorKind::Timeout
        } else {
            ErrorKind::Service
        };
        let mut message = match status {
            Some(status) => format!("The server returned status {}", status),
            None => "The server reported an error".to_string(),
        };
        if let Some(first) = entries.first() {
            message.push_str(&format!(" ({})", first));
        }
        let mut error = Self::new(kind, message);
        error.service_errors = entries;
        error
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
    pub fn service_errors(&self) -> &[ServiceErrorEntry] {
        &self.service_errors
    }
    pub fn is_closed(&self) -> bool {
        self.kind == ErrorKind::Closed
    }
    pub fn is_auth_failure(&self) -> bool {
        self.service_errors
            .iter()
            .any(|e| e.code == ServiceErrorEntry::AUTH_FAILURE)
    }
}

/// Failure of a single physical exchange, as reported by an [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not connect: {0}")]
    Connect(#[source] BoxError),
    #[error("the transport timed out: {0}")]
    Timeout(#[source] BoxError),
    #[error("TLS failure: {0}")]
    Tls(#[source] BoxError),
    #[error("network failure: {0}")]
    Network(#[source] BoxError),
    #[error("the transport is closed")]
    Closed,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Connect(message.into())
    }
    pub fn network(message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::Network(message.into())
    }
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(..) | TransportError::Timeout(..) | TransportError::Network(..)
        )
    }
}

impl From<TransportError> for Error {
    fn from(value: TransportError) -> Self {
        let kind = match &value {
            TransportError::Connect(..) | TransportError::Network(..) => ErrorKind::Connectivity,
            TransportError::Timeout(..) => ErrorKind::Timeout,
            TransportError::Tls(..) => ErrorKind::Tls,
            TransportError::Closed => ErrorKind::Closed,
        };
        Error::new(kind, value.to_string()).with_source(value)
    }
}
