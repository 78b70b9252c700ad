//! One inbound tunnel, from HTTP upgrade to teardown.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE},
    upgrade::{self, OnUpgrade},
    Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    time::{self, Duration},
};
use tokio_tungstenite::{
    tungstenite::{
        handshake::derive_accept_key,
        protocol::{frame::coding::CloseCode, CloseFrame, Role},
        Error as WsError, Message,
    },
    WebSocketStream,
};
use tracing::{debug, warn};

use vless_ws::{
    relay::ws_io_error,
    vless::{decode_request_header, encode_response_header, RequestCommand, Uuid},
    Copier, FlowStat,
};

use super::context::ServiceContext;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_RECV_TIMEOUT: Duration = Duration::from_secs(5);
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// True when the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(req: &Request<Incoming>) -> bool {
    let header_has = |name, needle: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains(needle))
            .unwrap_or(false)
    };

    header_has(CONNECTION, "upgrade") && header_has(UPGRADE, "websocket")
}

/// Answers the HTTP side of the upgrade and spawns the tunnel task. The
/// router already resolved the path: `path_user` is the UUID a per-user
/// path binds, or `None` for the fixed tunnel path.
pub fn handle_upgrade(
    context: Arc<ServiceContext>,
    peer: SocketAddr,
    req: Request<Incoming>,
    path_user: Option<Uuid>,
) -> io::Result<Response<Full<Bytes>>> {
    let key = match req.headers().get(SEC_WEBSOCKET_KEY).and_then(|v| v.to_str().ok()) {
        Some(key) => key.to_owned(),
        None => {
            let mut resp = Response::new(Full::new(Bytes::from_static(b"websocket key required")));
            *resp.status_mut() = StatusCode::UPGRADE_REQUIRED;
            return Ok(resp);
        }
    };

    let accept = derive_accept_key(key.as_bytes());
    let pending = upgrade::on(req);

    tokio::spawn(run_session(context, peer, pending, path_user));

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "websocket")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .body(Full::new(Bytes::new()))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

async fn run_session(context: Arc<ServiceContext>, peer: SocketAddr, pending: OnUpgrade, path_user: Option<Uuid>) {
    let _guard = context.session_guard();

    let upgraded = match time::timeout(HANDSHAKE_TIMEOUT, pending).await {
        Ok(Ok(upgraded)) => upgraded,
        Ok(Err(err)) => {
            debug!(%peer, error = %err, "websocket upgrade failed");
            return;
        }
        Err(_elapsed) => {
            debug!(%peer, "websocket upgrade timed out");
            return;
        }
    };

    let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;

    if let Err(err) = serve(context, peer, ws, path_user).await {
        debug!(%peer, error = %err, "session ended with error");
    }
}

/// Parses, authorizes, dials, acknowledges, relays and accounts. Every
/// failure is answered with the close code of its stage and stays inside
/// the session.
async fn serve<S>(
    context: Arc<ServiceContext>,
    peer: SocketAddr,
    mut ws: WebSocketStream<S>,
    path_user: Option<Uuid>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = match time::timeout(REQUEST_RECV_TIMEOUT, ws.next()).await {
        Err(_elapsed) => {
            return close_with(ws, CloseCode::Protocol, "request header timeout").await;
        }
        Ok(None) => return Ok(()),
        Ok(Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed))) => return Ok(()),
        Ok(Some(Err(err))) => return Err(ws_io_error(err)),
        Ok(Some(Ok(Message::Binary(data)))) => data,
        Ok(Some(Ok(_other))) => {
            return close_with(ws, CloseCode::Protocol, "expected a binary request frame").await;
        }
    };

    let (header, residual_at) = match decode_request_header(&first) {
        Ok(decoded) => decoded,
        Err(err) => {
            debug!(%peer, error = %err, "malformed request header");
            return close_with(ws, CloseCode::Protocol, "malformed request header").await;
        }
    };
    let residual = &first[residual_at..];

    // The claim must match the path binding (when the path binds one) and
    // the accounting table; the client is not told which check failed.
    let path_bound = path_user.map_or(true, |user| user == header.user);
    if !path_bound || !context.meter().is_known(&header.user) {
        debug!(%peer, user = %header.user, "session denied");
        return close_with(ws, CloseCode::Policy, "").await;
    }

    if header.command == RequestCommand::Mux {
        return close_with(ws, CloseCode::Unsupported, "mux is not served").await;
    }

    let address = match header.address.clone() {
        Some(address) => address,
        None => return close_with(ws, CloseCode::Protocol, "missing target address").await,
    };

    let flow = FlowStat::new();
    let session_cancel = context.cancel().child_token();
    let copier = Copier::new(context.pool());

    let result = if header.command == RequestCommand::Tcp {
        let mut upstream = match context.dialer().dial_tcp(&address, DIAL_TIMEOUT).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%peer, dst = %address, error = %err, "upstream dial failed");
                return close_with(ws, CloseCode::Error, "upstream dial failed").await;
            }
        };

        send_response_header(&mut ws, header.version).await?;
        if !residual.is_empty() {
            upstream.write_all(residual).await?;
            flow.incr_tx(residual.len() as u64);
        }

        copier.relay_stream(ws, upstream, &flow, &session_cancel).await
    } else {
        let (socket, target) = match context.dialer().dial_udp(&address, DIAL_TIMEOUT).await {
            Ok(dialed) => dialed,
            Err(err) => {
                warn!(%peer, dst = %address, error = %err, "upstream dial failed");
                return close_with(ws, CloseCode::Error, "upstream dial failed").await;
            }
        };

        send_response_header(&mut ws, header.version).await?;
        if !residual.is_empty() {
            socket.send_to(residual, target).await?;
            flow.incr_tx(residual.len() as u64);
        }

        copier.relay_packets(ws, socket, target, &flow, &session_cancel).await
    };

    context.meter().credit(&header.user, flow.total());

    debug!(
        %peer,
        user = %header.user,
        dst = %address,
        tx = flow.tx(),
        rx = flow.rx(),
        "session closed",
    );

    result
}

/// The two-byte acknowledgement, as its own binary frame ahead of any
/// relayed payload.
async fn send_response_header<S>(ws: &mut WebSocketStream<S>, version: u8) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ws.send(Message::Binary(encode_response_header(version).to_vec()))
        .await
        .map_err(ws_io_error)
}

async fn close_with<S>(mut ws: WebSocketStream<S>, code: CloseCode, reason: &'static str) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    // The peer may already be gone; the close is best-effort.
    let _ = ws.close(Some(frame)).await;
    Ok(())
}
