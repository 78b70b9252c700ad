//! The HTTP/WebSocket listener and its router.

mod context;
mod pages;
mod push;
mod session;

pub use context::ServiceContext;
pub use pages::vless_urls;
pub use push::NodeStat;

use std::{future::Future, io, net::SocketAddr, pin::Pin, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::Service, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::{
    net::TcpListener,
    time::{self, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vless_ws::{vless::Uuid, Config};

// Sessions past this budget after a shutdown request are dropped with the
// process; their sockets close either way.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One listening server instance.
pub struct Server {
    context: Arc<ServiceContext>,
}

impl Server {
    pub fn new(config: Config, cancel: CancellationToken) -> Server {
        Server {
            context: Arc::new(ServiceContext::new(config, cancel)),
        }
    }

    pub fn context(&self) -> Arc<ServiceContext> {
        Arc::clone(&self.context)
    }

    /// Claims the listen address. A bind failure is the one error that
    /// escapes to the launcher; everything later is per-connection.
    pub async fn bind(self) -> io::Result<BoundServer> {
        let listener = TcpListener::bind(self.context.config().listen_addr).await?;
        info!("server listening on http://{}", listener.local_addr()?);

        Ok(BoundServer {
            context: self.context,
            listener,
        })
    }

    /// Binds and serves until the cancellation token fires.
    pub async fn run(self) -> io::Result<()> {
        self.bind().await?.run().await
    }
}

/// A server that holds its listening socket.
pub struct BoundServer {
    context: Arc<ServiceContext>,
    listener: TcpListener,
}

impl BoundServer {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> Arc<ServiceContext> {
        Arc::clone(&self.context)
    }

    pub async fn run(self) -> io::Result<()> {
        let listener = self.listener;

        let push_loop = tokio::spawn(push::run(Arc::clone(&self.context)));

        let cancel = self.context.cancel().clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!(error = %err, "accept failed");
                            continue;
                        }
                    };

                    let service = HttpService {
                        context: Arc::clone(&self.context),
                        peer,
                    };
                    tokio::spawn(async move {
                        let conn = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .with_upgrades();
                        if let Err(err) = conn.await {
                            debug!(%peer, error = %err, "http connection error");
                        }
                    });
                }
            }
        }

        drop(listener);

        // Sessions saw the cancel; give them and the final push a bounded
        // window to settle.
        let context = Arc::clone(&self.context);
        let drain = async move {
            while context.active_sessions() > 0 {
                time::sleep(Duration::from_millis(100)).await;
            }
            let _ = push_loop.await;
        };
        if time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("graceful shutdown budget exceeded, dropping remaining sessions");
        }

        info!("server exited");
        Ok(())
    }
}

#[derive(Clone)]
struct HttpService {
    context: Arc<ServiceContext>,
    peer: SocketAddr,
}

impl Service<Request<Incoming>> for HttpService {
    type Response = Response<Full<Bytes>>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<Self::Response>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let context = Arc::clone(&self.context);
        let peer = self.peer;
        Box::pin(async move { route(context, peer, req) })
    }
}

fn route(
    context: Arc<ServiceContext>,
    peer: SocketAddr,
    req: Request<Incoming>,
) -> io::Result<Response<Full<Bytes>>> {
    let path = req.uri().path().to_owned();

    if session::is_upgrade_request(&req) {
        return match tunnel_binding(&context, &path) {
            Some(binding) => session::handle_upgrade(context, peer, req, binding),
            None => pages::not_found(),
        };
    }

    match path.as_str() {
        "/" => pages::ping(&context),
        p => {
            if let Some(rest) = p.strip_prefix("/sub/") {
                return pages::subscription(&context, rest);
            }
            // A tunnel path without upgrade headers: tell the client what
            // is missing instead of hiding behind a 404.
            if tunnel_binding(&context, p).is_some() {
                let mut resp = Response::new(Full::new(Bytes::from_static(b"websocket upgrade required\n")));
                *resp.status_mut() = StatusCode::UPGRADE_REQUIRED;
                return Ok(resp);
            }
            pages::not_found()
        }
    }
}

/// The user a tunnel path binds. A trailing UUID segment binds that user
/// (covers `/{uuid}` and `/wsv/{uuid}`); the configured fixed path binds
/// none, leaving authorization to the header claim alone.
fn tunnel_binding(context: &ServiceContext, path: &str) -> Option<Option<Uuid>> {
    if path == context.config().fixed_tunnel_path {
        return Some(None);
    }
    tunnel_user(path).map(Some)
}

/// The trailing path segment, when it parses as a canonical UUID.
fn tunnel_user(path: &str) -> Option<Uuid> {
    path.rsplit('/').next().and_then(|segment| segment.parse().ok())
}
