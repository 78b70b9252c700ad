use std::{
    io,
    net::{IpAddr, Ipv4Addr},
};

use async_trait::async_trait;
use tokio::net::lookup_host;
use trust_dns_resolver::{
    config::{NameServerConfigGroup, ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};

/// Name resolution behind a trait so tests substitute an in-memory table
/// and the dialer never cares which resolver answered.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// The default resolver: asks a public recursive server directly, which
/// sidesteps container/host stub-resolver quirks, and falls back to the
/// system resolver when that fails.
pub struct PublicDnsResolver {
    upstream: TokioAsyncResolver,
}

const PUBLIC_DNS: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
const PUBLIC_DNS_PORT: u16 = 53;

impl PublicDnsResolver {
    pub fn new() -> Self {
        let servers = NameServerConfigGroup::from_ips_clear(&[PUBLIC_DNS], PUBLIC_DNS_PORT, true);
        let config = ResolverConfig::from_parts(None, Vec::new(), servers);
        Self {
            upstream: TokioAsyncResolver::tokio(config, ResolverOpts::default()),
        }
    }
}

impl Default for PublicDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for PublicDnsResolver {
    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        match self.upstream.lookup_ip(host).await {
            Ok(lookup) => {
                let ips: Vec<IpAddr> = lookup.iter().collect();
                if !ips.is_empty() {
                    return Ok(ips);
                }
                tracing::debug!(host, "public resolver returned no addresses, trying system resolver");
            }
            Err(err) => {
                tracing::debug!(host, error = %err, "public resolver failed, trying system resolver");
            }
        }

        system_resolve(host).await
    }
}

async fn system_resolve(host: &str) -> io::Result<Vec<IpAddr>> {
    // lookup_host needs a port; it is discarded from the answer.
    let ips: Vec<IpAddr> = lookup_host((host, 0)).await?.map(|sa| sa.ip()).collect();
    if ips.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses for {}", host),
        ));
    }
    Ok(ips)
}
