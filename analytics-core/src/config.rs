use crate::{DefaultJsonDeserializer, Deserializer, Error, Result, parse_duration};
use std::{
    fmt::{self, Display},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use url::{Host, Url};

/// Which certificates the client accepts from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustPolicy {
    /// Platform trust store.
    SystemStore,
    /// Only the certificates in the PEM bundle at this path.
    PemFile(PathBuf),
    /// Only the certificates in this PEM bundle.
    PemString(String),
    /// Only these PEM encoded certificates.
    Certificates(Vec<String>),
    /// No verification at all.
    Insecure,
}

#[derive(Default, Debug, Clone)]
pub struct SecurityOptions {
    pub trust_only_pem_file: Option<PathBuf>,
    pub trust_only_pem_str: Option<String>,
    pub trust_only_certificates: Option<Vec<String>>,
    pub disable_server_certificate_verification: bool,
}

impl SecurityOptions {
    /// Resolves the options into a single policy, at most one trust source can be set.
    pub fn trust_policy(&self) -> Result<TrustPolicy> {
        let mut policies = Vec::new();
        if let Some(path) = &self.trust_only_pem_file {
            policies.push(TrustPolicy::PemFile(path.clone()));
        }
        if let Some(pem) = &self.trust_only_pem_str {
            policies.push(TrustPolicy::PemString(pem.clone()));
        }
        if let Some(certificates) = &self.trust_only_certificates {
            policies.push(TrustPolicy::Certificates(certificates.clone()));
        }
        if self.disable_server_certificate_verification {
            policies.push(TrustPolicy::Insecure);
        }
        match policies.len() {
            0 => Ok(TrustPolicy::SystemStore),
            1 => Ok(policies.remove(0)),
            _ => Err(Error::invalid_argument(
                "Can only set one of trust_only_pem_file, trust_only_pem_str, trust_only_certificates or disable_server_certificate_verification",
            )),
        }
    }
}

/// Longest accepted connect or query timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct TimeoutOptions {
    /// Bounds name resolution plus the connect and TLS handshake.
    pub connect_timeout: Duration,
    /// Bounds the whole request lifecycle, retries and streaming included.
    pub query_timeout: Duration,
}

impl Default for TimeoutOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(600),
        }
    }
}

/// Exponential delay between attempts of the same request, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffOptions {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffOptions {
    /// Delay to wait after the failed attempt number `attempt` (from 1).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Maximum bytes fed to the JSON decoder per step.
    pub chunk_size: usize,
    /// Rows buffered between the background runtime and a blocking consumer.
    pub row_buffer: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            row_buffer: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub timeout: TimeoutOptions,
    pub security: SecurityOptions,
    pub max_retries: u32,
    pub backoff: BackoffOptions,
    pub stream: StreamOptions,
    pub deserializer: Arc<dyn Deserializer>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            timeout: Default::default(),
            security: Default::default(),
            max_retries: 7,
            backoff: Default::default(),
            stream: Default::default(),
            deserializer: Arc::new(DefaultJsonDeserializer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// Normalized, validated configuration of one client.
///
/// Built once out of the endpoint and the [`ClusterOptions`]; the endpoint
/// query string can override options (`?query_timeout=2m&max_retries=3`), any
/// unknown key is rejected.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub trust: TrustPolicy,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub max_retries: u32,
    pub backoff: BackoffOptions,
    pub stream: StreamOptions,
    pub deserializer: Arc<dyn Deserializer>,
}

impl ConnectionConfig {
    pub fn new(endpoint: &str, options: &ClusterOptions) -> Result<Self> {
        let context = |message: String| {
            let error = Error::invalid_argument(format!(
                "{} (while parsing the endpoint `{}`)",
                message, endpoint
            ));
            log::error!("{:#}", error);
            error
        };
        let url = Url::parse(endpoint).map_err(|e| context(e.to_string()))?;
        let scheme = match url.scheme() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => {
                return Err(context(format!(
                    "The scheme must be `http` or `https`, found `{}`",
                    other
                )));
            }
        };
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(address)) => address.to_string(),
            Some(Host::Ipv6(address)) => address.to_string(),
            None => return Err(context("The endpoint must contain a host".into())),
        };
        if !matches!(url.path(), "" | "/") {
            return Err(context(format!(
                "The endpoint must not contain a path, found `{}`",
                url.path()
            )));
        }
        let port = url
            .port_or_known_default()
            .ok_or_else(|| context("Could not determine the port".into()))?;

        let mut options = options.clone();
        for (key, value) in url.query_pairs() {
            let invalid = || context(format!("Invalid value `{}` for key `{}`", value, key));
            match key.as_ref() {
                "connect_timeout" | "timeout.connect_timeout" => {
                    options.timeout.connect_timeout = parse_duration(&value).ok_or_else(invalid)?
                }
                "query_timeout" | "timeout.query_timeout" => {
                    options.timeout.query_timeout = parse_duration(&value).ok_or_else(invalid)?
                }
                "max_retries" => options.max_retries = value.parse().map_err(|_| invalid())?,
                "disable_server_certificate_verification"
                | "security.disable_server_certificate_verification" => {
                    options.security.disable_server_certificate_verification =
                        value.parse().map_err(|_| invalid())?
                }
                "trust_only_pem_file" | "security.trust_only_pem_file" => {
                    options.security.trust_only_pem_file = Some(PathBuf::from(value.as_ref()))
                }
                "trust_only_pem_str" | "security.trust_only_pem_str" => {
                    options.security.trust_only_pem_str = Some(value.to_string())
                }
                _ => return Err(context(format!("Invalid key provided (key={})", key))),
            }
        }

        let trust = options.security.trust_policy()?;
        if let TrustPolicy::PemFile(path) = &trust
            && !path.exists()
        {
            return Err(context(format!(
                "The PEM file `{}` does not exist",
                path.display()
            )));
        }
        if trust == TrustPolicy::Insecure {
            log::warn!(
                "Server certificate verification is disabled for `{}`, this is not safe outside of development",
                host
            );
        }
        if options.timeout.connect_timeout.is_zero() || options.timeout.query_timeout.is_zero() {
            return Err(context("Timeouts must be greater than zero".into()));
        }
        if options.timeout.connect_timeout > MAX_TIMEOUT
            || options.timeout.query_timeout > MAX_TIMEOUT
        {
            return Err(context(format!("Timeouts cannot exceed {:?}", MAX_TIMEOUT)));
        }
        if options.stream.chunk_size == 0 || options.stream.row_buffer == 0 {
            return Err(context(
                "The stream chunk size and row buffer must be greater than zero".into(),
            ));
        }
        if options.backoff.base > options.backoff.max {
            return Err(context(
                "The backoff base delay cannot exceed the maximum delay".into(),
            ));
        }
        Ok(Self {
            scheme,
            host,
            port,
            trust,
            connect_timeout: options.timeout.connect_timeout,
            query_timeout: options.timeout.query_timeout,
            max_retries: options.max_retries,
            backoff: options.backoff,
            stream: options.stream,
            deserializer: options.deserializer,
        })
    }

    /// The URL the caller configured, without any path.
    pub fn base_url(&self) -> String {
        if self.host.contains(':') {
            format!("{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}
