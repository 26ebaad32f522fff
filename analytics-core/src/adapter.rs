use crate::{
    ConnectionConfig, Credential, EndpointResolver, Error, HttpTransport, ReqwestTransport, Result,
};
use serde_json::{Map, Value};
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::watch;

pub const DEFAULT_REQUEST_PATH: &str = "/api/v1/request";

/// One shot broadcast of the adapter closure.
#[derive(Debug)]
pub(crate) struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self {
            tx: watch::channel(false).0,
        }
    }

    fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once closed, immediately if it already is.
    pub(crate) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|v| *v).await;
    }
}

/// Owner of the transport and of everything needed to address the service.
///
/// Shared by all the queries of a [`Cluster`](crate::Cluster). The transport is
/// cloned out of a short lock for each attempt, nothing is locked across I/O.
pub struct ClientAdapter {
    config: ConnectionConfig,
    credential: Credential,
    transport: RwLock<Option<Arc<dyn HttpTransport>>>,
    request_path: RwLock<String>,
    request_json: RwLock<Map<String, Value>>,
    closed: AtomicBool,
    shutdown: Arc<ShutdownSignal>,
}

impl ClientAdapter {
    /// Builds the adapter with the default `reqwest` transport.
    pub fn new(config: ConnectionConfig, credential: Credential) -> Result<Self> {
        let resolver = EndpointResolver::system(config.connect_timeout);
        let transport = ReqwestTransport::new(&config, resolver)?;
        Ok(Self::with_transport(config, credential, Arc::new(transport)))
    }

    pub fn with_transport(
        config: ConnectionConfig,
        credential: Credential,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            credential,
            transport: RwLock::new(Some(transport)),
            request_path: RwLock::new(DEFAULT_REQUEST_PATH.into()),
            request_json: Default::default(),
            closed: AtomicBool::new(false),
            shutdown: Arc::new(ShutdownSignal::new()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn transport(&self) -> Result<Arc<dyn HttpTransport>> {
        let transport = self.transport.read().ok().and_then(|v| v.clone());
        match transport {
            Some(transport) if !self.is_closed() => Ok(transport),
            _ => Err(Error::closed("The client is closed")),
        }
    }

    /// Replaces the transport, requests already issued keep the previous one.
    pub fn set_transport(&self, transport: Arc<dyn HttpTransport>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::closed("The client is closed"));
        }
        if let Ok(mut current) = self.transport.write() {
            *current = Some(transport);
        }
        Ok(())
    }

    /// Sends the following requests to another path of the same base URL.
    pub fn set_request_path(&self, path: impl Into<String>) {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        if let Ok(mut current) = self.request_path.write() {
            *current = path;
        }
    }

    pub fn request_path(&self) -> String {
        self.request_path
            .read()
            .map(|v| v.clone())
            .unwrap_or_else(|_| DEFAULT_REQUEST_PATH.into())
    }

    pub fn base_url(&self) -> String {
        self.config.base_url()
    }

    pub fn request_url(&self) -> String {
        format!("{}{}", self.base_url(), self.request_path())
    }

    /// Merges extra top level fields into every following request body.
    pub fn update_request_json(&self, fields: Map<String, Value>) {
        if let Ok(mut current) = self.request_json.write() {
            current.extend(fields);
        }
    }

    pub fn request_json(&self) -> Map<String, Value> {
        self.request_json
            .read()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Releases the transport, only the first call has any effect.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.trigger();
        let transport = self.transport.write().ok().and_then(|mut v| v.take());
        if let Some(transport) = transport {
            transport.close();
        }
        log::debug!("Closed the client of `{}`", self.base_url());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown_signal(&self) -> Arc<ShutdownSignal> {
        self.shutdown.clone()
    }
}

impl Drop for ClientAdapter {
    fn drop(&mut self) {
        self.close();
    }
}
