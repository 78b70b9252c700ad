use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use thiserror::Error;
use tokio::{
    net::{TcpStream, UdpSocket},
    time::{self, Duration, Instant},
};

use super::resolver::{PublicDnsResolver, Resolver};
use crate::vless::Address;

// Budget per candidate address; the caller's timeout caps the whole dial.
const PER_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Why an upstream connection could not be established.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("dial {0} timed out")]
    Timeout(Address),

    #[error("dial {0}: connection refused")]
    Refused(Address),

    #[error("dial {0}: {1}")]
    Unreachable(Address, io::Error),
}

/// Opens outbound TCP streams and UDP sockets toward parsed destinations.
/// Multi-homed targets are attempted in resolver order, each attempt
/// bounded by 5 s and by whatever remains of the caller's budget.
pub struct Dialer {
    resolver: Arc<dyn Resolver>,
}

impl Dialer {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        Self { resolver }
    }

    /// A dialer wired to the default public-recursive resolver.
    pub fn with_public_dns() -> Self {
        Self::new(Arc::new(PublicDnsResolver::new()))
    }

    async fn resolve(&self, addr: &Address) -> Result<Vec<SocketAddr>, DialError> {
        match addr {
            Address::SocketAddress(sa) => Ok(vec![*sa]),
            Address::DomainNameAddress(domain, port) => {
                let ips = self
                    .resolver
                    .resolve(domain)
                    .await
                    .map_err(|e| DialError::Unreachable(addr.clone(), e))?;
                Ok(ips.into_iter().map(|ip| SocketAddr::new(ip, *port)).collect())
            }
        }
    }

    pub async fn dial_tcp(&self, addr: &Address, budget: Duration) -> Result<TcpStream, DialError> {
        let deadline = Instant::now() + budget;
        let candidates = self.resolve(addr).await?;

        let mut last_err = None;
        for candidate in candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let attempt = remaining.min(PER_ATTEMPT_TIMEOUT);

            match time::timeout(attempt, TcpStream::connect(candidate)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(err)) => {
                    tracing::debug!(dst = %addr, %candidate, error = %err, "connect attempt failed");
                    last_err = Some(classify_io_error(addr, err));
                }
                Err(_elapsed) => {
                    tracing::debug!(dst = %addr, %candidate, "connect attempt timed out");
                    last_err = Some(DialError::Timeout(addr.clone()));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DialError::Timeout(addr.clone())))
    }

    /// Binds an unconnected UDP socket and resolves the target once; the
    /// session addresses every datagram at the returned address.
    pub async fn dial_udp(&self, addr: &Address, budget: Duration) -> Result<(UdpSocket, SocketAddr), DialError> {
        let resolve = self.resolve(addr);
        let candidates = match time::timeout(budget, resolve).await {
            Ok(r) => r?,
            Err(_elapsed) => return Err(DialError::Timeout(addr.clone())),
        };

        let target = *candidates.first().ok_or_else(|| {
            DialError::Unreachable(
                addr.clone(),
                io::Error::new(io::ErrorKind::NotFound, "resolver returned no addresses"),
            )
        })?;

        let bind_addr: SocketAddr = match target.ip() {
            IpAddr::V4(..) => "0.0.0.0:0".parse().unwrap(),
            IpAddr::V6(..) => "[::]:0".parse().unwrap(),
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| DialError::Unreachable(addr.clone(), e))?;

        Ok((socket, target))
    }
}

fn classify_io_error(addr: &Address, err: io::Error) -> DialError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => DialError::Refused(addr.clone()),
        io::ErrorKind::TimedOut => DialError::Timeout(addr.clone()),
        _ => DialError::Unreachable(addr.clone(), err),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::{io::AsyncReadExt, net::TcpListener};

    struct StaticResolver {
        table: HashMap<String, Vec<IpAddr>>,
    }

    impl StaticResolver {
        fn new<const N: usize>(entries: [(&str, Vec<IpAddr>); N]) -> Self {
            Self {
                table: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            }
        }
    }

    #[async_trait]
    impl Resolver for StaticResolver {
        async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            self.table
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
        }
    }

    #[tokio::test]
    async fn dials_a_resolved_domain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let dialer = Dialer::new(Arc::new(StaticResolver::new([(
            "upstream.test",
            vec![IpAddr::from([127, 0, 0, 1])],
        )])));

        let addr = Address::DomainNameAddress("upstream.test".to_string(), port);
        let mut stream = dialer.dial_tcp(&addr, Duration::from_secs(5)).await.unwrap();

        let (mut accepted, _) = listener.accept().await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"hi").await.unwrap();

        let mut buf = [0u8; 2];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn unknown_host_is_unreachable() {
        let dialer = Dialer::new(Arc::new(StaticResolver::new([])));
        let addr = Address::DomainNameAddress("nowhere.test".to_string(), 80);

        let err = dialer.dial_tcp(&addr, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DialError::Unreachable(..)), "got {:?}", err);
    }

    #[tokio::test]
    async fn closed_port_is_refused() {
        // Bind-then-drop to find a port that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dialer = Dialer::new(Arc::new(StaticResolver::new([])));
        let addr = Address::SocketAddress(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));

        let err = dialer.dial_tcp(&addr, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, DialError::Refused(..)), "got {:?}", err);
    }

    #[tokio::test]
    async fn falls_through_to_a_working_candidate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // First candidate is a blackhole (TEST-NET-1), second answers.
        let dialer = Dialer::new(Arc::new(StaticResolver::new([(
            "multi.test",
            vec![IpAddr::from([192, 0, 2, 1]), IpAddr::from([127, 0, 0, 1])],
        )])));

        let addr = Address::DomainNameAddress("multi.test".to_string(), port);
        let result = dialer.dial_tcp(&addr, Duration::from_secs(8)).await;
        assert!(result.is_ok(), "got {:?}", result.err());
    }

    #[tokio::test]
    async fn udp_socket_targets_first_answer() {
        let dialer = Dialer::new(Arc::new(StaticResolver::new([(
            "dns.test",
            vec![IpAddr::from([127, 0, 0, 1])],
        )])));

        let addr = Address::DomainNameAddress("dns.test".to_string(), 53);
        let (socket, target) = dialer.dial_udp(&addr, Duration::from_secs(5)).await.unwrap();

        assert_eq!(target, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 53));
        assert!(socket.local_addr().unwrap().ip().is_unspecified() || socket.local_addr().unwrap().port() > 0);
    }
}
