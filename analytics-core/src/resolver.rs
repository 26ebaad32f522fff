use crate::{Error, Result};
use futures::{FutureExt, future::BoxFuture};
use rand::Rng;
use std::{
    io,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

/// Name service used to turn a host name into candidate addresses.
pub trait NameLookup: Send + Sync {
    fn lookup(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>>;
}

/// System resolver, through `tokio::net::lookup_host`.
#[derive(Default, Debug, Clone, Copy)]
pub struct TokioLookup;

impl NameLookup for TokioLookup {
    fn lookup(&self, host: &str, port: u16) -> BoxFuture<'static, io::Result<Vec<SocketAddr>>> {
        let target = format!("{}:{}", host, port);
        async move { Ok(tokio::net::lookup_host(target).await?.collect()) }.boxed()
    }
}

/// Picks the address a new connection is opened to.
///
/// Literal addresses are returned as they are, `localhost` is always the IPv4
/// loopback, anything else is looked up and one of the candidates is chosen
/// uniformly at random so that load spreads across the addresses of a
/// multi-node service.
#[derive(Clone)]
pub struct EndpointResolver {
    lookup: Arc<dyn NameLookup>,
    timeout: Duration,
}

impl EndpointResolver {
    pub fn new(lookup: Arc<dyn NameLookup>, timeout: Duration) -> Self {
        Self { lookup, timeout }
    }

    pub fn system(timeout: Duration) -> Self {
        Self::new(Arc::new(TokioLookup), timeout)
    }

    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
        if host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port));
        }
        let candidates = tokio::time::timeout(self.timeout, self.lookup.lookup(host, port))
            .await
            .map_err(|_| {
                Error::connectivity(format!(
                    "Name resolution of `{}` did not complete within {:?}",
                    host, self.timeout
                ))
            })?
            .map_err(|e| {
                Error::connectivity(format!("Could not resolve `{}`", host)).with_source(e)
            })?;
        if candidates.is_empty() {
            return Err(Error::connectivity(format!(
                "The name `{}` did not resolve to any address",
                host
            )));
        }
        let selected = candidates[rand::thread_rng().gen_range(0..candidates.len())];
        log::debug!(
            "Resolved `{}` to {:?}, selected {}",
            host,
            candidates,
            selected
        );
        Ok(selected)
    }
}

impl reqwest::dns::Resolve for EndpointResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let resolver = self.clone();
        async move {
            // The connector replaces the port with the one of the request URL
            let address = resolver.resolve(name.as_str(), 0).await.map_err(|e| {
                log::error!("{:#}", e);
                Box::new(e) as Box<dyn std::error::Error + Send + Sync>
            })?;
            Ok(Box::new(std::iter::once(address)) as reqwest::dns::Addrs)
        }
        .boxed()
    }
}
