use crate::{
    BodyStream, ConnectionConfig, EndpointResolver, Error, HttpRequest, HttpResponse,
    HttpTransport, Result, TransportError, TrustPolicy,
};
use futures::{FutureExt, StreamExt, TryStreamExt, future::BoxFuture};
use hyper_util::client::legacy::connect::HttpInfo;
use reqwest::{Client, header::CONTENT_TYPE};
use std::{
    error::Error as _,
    fs,
    sync::{Arc, RwLock},
};

const PEM_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const PEM_END: &str = "-----END CERTIFICATE-----";

/// Transport over a pooled `reqwest` client with `native-tls`.
///
/// Name resolution of new connections goes through the [`EndpointResolver`],
/// the connect timeout bounds resolution, connect and handshake. There is no
/// overall request timeout here, the dispatcher owns the query budget.
pub struct ReqwestTransport {
    client: RwLock<Option<Client>>,
}

impl ReqwestTransport {
    pub fn new(config: &ConnectionConfig, resolver: EndpointResolver) -> Result<Self> {
        let tls = tls_connector(&config.trust)?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .dns_resolver(Arc::new(resolver))
            .use_preconfigured_tls(tls)
            .build()
            .map_err(|e| {
                let error = Error::tls("Could not build the HTTP client").with_source(e);
                log::error!("{:#}", error);
                error
            })?;
        Ok(Self {
            client: RwLock::new(Some(client)),
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(
        &self,
        request: HttpRequest,
    ) -> BoxFuture<'static, std::result::Result<HttpResponse, TransportError>> {
        let client = self.client.read().ok().and_then(|v| v.clone());
        async move {
            let Some(client) = client else {
                return Err(TransportError::Closed);
            };
            let response = client
                .post(&request.url)
                .basic_auth(
                    request.credential.username(),
                    Some(request.credential.password()),
                )
                .header(CONTENT_TYPE, "application/json")
                .body(request.body)
                .send()
                .await
                .map_err(transport_error)?;
            let local_addr = response
                .extensions()
                .get::<HttpInfo>()
                .map(HttpInfo::local_addr);
            Ok(HttpResponse {
                status: response.status().as_u16(),
                remote_addr: response.remote_addr(),
                local_addr,
                body: response.bytes_stream().map_err(transport_error).boxed() as BodyStream,
            })
        }
        .boxed()
    }

    fn close(&self) {
        if let Ok(mut client) = self.client.write() {
            client.take();
        }
    }
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout(error.into());
    }
    if is_tls_failure(&error) {
        return TransportError::Tls(error.into());
    }
    if error.is_connect() {
        return TransportError::Connect(error.into());
    }
    TransportError::Network(error.into())
}

fn is_tls_failure(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(current) = source {
        if current.downcast_ref::<native_tls::Error>().is_some() {
            return true;
        }
        source = current.source();
    }
    false
}

/// Builds the connector implementing the trust policy.
pub fn tls_connector(trust: &TrustPolicy) -> Result<native_tls::TlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    let pem = match trust {
        TrustPolicy::SystemStore => None,
        TrustPolicy::PemFile(path) => Some(fs::read_to_string(path).map_err(|e| {
            Error::invalid_argument(format!("Could not read `{}`", path.display())).with_source(e)
        })?),
        TrustPolicy::PemString(pem) => Some(pem.clone()),
        TrustPolicy::Certificates(certificates) => Some(certificates.join("\n")),
        TrustPolicy::Insecure => {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true);
            None
        }
    };
    if let Some(pem) = pem {
        let blocks = pem_blocks(&pem);
        if blocks.is_empty() {
            return Err(Error::invalid_argument(
                "The trusted certificates do not contain any PEM certificate",
            ));
        }
        builder.disable_built_in_roots(true);
        for block in blocks {
            let certificate = native_tls::Certificate::from_pem(block.as_bytes()).map_err(|e| {
                Error::invalid_argument("Could not parse a trusted certificate").with_source(e)
            })?;
            builder.add_root_certificate(certificate);
        }
    }
    builder
        .build()
        .map_err(|e| Error::tls("Could not build the TLS connector").with_source(e))
}

/// Splits a bundle into its single certificate blocks.
fn pem_blocks(bundle: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut input = bundle;
    while let Some(begin) = input.find(PEM_BEGIN) {
        let Some(end) = input[begin..].find(PEM_END) else {
            break;
        };
        let end = begin + end + PEM_END.len();
        result.push(&input[begin..end]);
        input = &input[end..];
    }
    result
}
