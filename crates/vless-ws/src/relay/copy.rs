use std::{io, net::SocketAddr, sync::Arc};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::UdpSocket,
    time::Duration,
};
use tokio_tungstenite::{
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Error as WsError, Message,
    },
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;

use crate::{buffer::BufferPool, relay::FlowStat, timeout::IdleTimer};

/// Per-direction read deadline, pushed forward on progress.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// The full-duplex pump between a message-framed WebSocket and an upstream
/// socket. The two directions run concurrently, each with its own leased
/// buffer and its own idle deadline; whichever direction ends first cancels
/// the session token, the opposite pump drains out at its next suspension
/// point, and the WebSocket is closed with a normal close frame.
///
/// Write errors are terminal: nothing is retried.
pub struct Copier {
    pool: Arc<BufferPool>,
    idle_timeout: Duration,
}

impl Copier {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        Self {
            pool,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Overrides the 60 s idle deadline. Tests shrink it.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Tunnels between the WebSocket and a byte-stream upstream (TCP).
    /// Client frames are written out verbatim; upstream chunks come back
    /// as one binary frame each.
    pub async fn relay_stream<S, U>(
        &self,
        ws: WebSocketStream<S>,
        upstream: U,
        flow: &FlowStat,
        cancel: &CancellationToken,
    ) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        U: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();
        let (mut up_read, mut up_write) = tokio::io::split(upstream);

        let client_to_upstream = async {
            let mut idle = IdleTimer::new(self.idle_timeout);
            let res = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    _ = &mut idle => break Err(idle_expired("client")),
                    msg = stream.next() => {
                        let data = match inbound_frame(msg) {
                            Frame::Data(data) => data,
                            Frame::Skip => continue,
                            Frame::Eof => break Ok(()),
                            Frame::Failed(err) => break Err(err),
                        };
                        if let Err(err) = up_write.write_all(&data).await {
                            break Err(err);
                        }
                        flow.incr_tx(data.len() as u64);
                        idle.touch();
                    }
                }
            };
            cancel.cancel();
            res
        };

        let upstream_to_client = async {
            let mut idle = IdleTimer::new(self.idle_timeout);
            let mut buf = self.pool.acquire();
            let res = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    _ = &mut idle => break Err(idle_expired("upstream")),
                    r = up_read.read(&mut buf) => {
                        let n = match r {
                            Ok(0) => break Ok(()),
                            Ok(n) => n,
                            Err(err) => break Err(err),
                        };
                        if let Err(err) = sink.send(Message::Binary(buf[..n].to_vec())).await {
                            break Err(ws_io_error(err));
                        }
                        flow.incr_rx(n as u64);
                        idle.touch();
                    }
                }
            };
            cancel.cancel();
            (res, sink)
        };

        let (up_res, (down_res, mut sink)) = tokio::join!(client_to_upstream, upstream_to_client);

        close_websocket(&mut sink).await;

        up_res.and(down_res)
    }

    /// Tunnels between the WebSocket and an unconnected UDP socket: one
    /// client frame becomes one datagram to `target`, one received
    /// datagram becomes one frame back.
    pub async fn relay_packets<S>(
        &self,
        ws: WebSocketStream<S>,
        socket: UdpSocket,
        target: SocketAddr,
        flow: &FlowStat,
        cancel: &CancellationToken,
    ) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();
        let socket = &socket;

        let client_to_upstream = async {
            let mut idle = IdleTimer::new(self.idle_timeout);
            let res = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    _ = &mut idle => break Err(idle_expired("client")),
                    msg = stream.next() => {
                        let data = match inbound_frame(msg) {
                            Frame::Data(data) => data,
                            Frame::Skip => continue,
                            Frame::Eof => break Ok(()),
                            Frame::Failed(err) => break Err(err),
                        };
                        if let Err(err) = socket.send_to(&data, target).await {
                            break Err(err);
                        }
                        flow.incr_tx(data.len() as u64);
                        idle.touch();
                    }
                }
            };
            cancel.cancel();
            res
        };

        let upstream_to_client = async {
            let mut idle = IdleTimer::new(self.idle_timeout);
            let mut buf = self.pool.acquire();
            let res = loop {
                tokio::select! {
                    _ = cancel.cancelled() => break Ok(()),
                    _ = &mut idle => break Err(idle_expired("upstream")),
                    r = socket.recv_from(&mut buf) => {
                        let n = match r {
                            Ok((n, _src)) => n,
                            Err(err) => break Err(err),
                        };
                        if let Err(err) = sink.send(Message::Binary(buf[..n].to_vec())).await {
                            break Err(ws_io_error(err));
                        }
                        flow.incr_rx(n as u64);
                        idle.touch();
                    }
                }
            };
            cancel.cancel();
            (res, sink)
        };

        let (up_res, (down_res, mut sink)) = tokio::join!(client_to_upstream, upstream_to_client);

        close_websocket(&mut sink).await;

        up_res.and(down_res)
    }
}

enum Frame {
    Data(Vec<u8>),
    Skip,
    Eof,
    Failed(io::Error),
}

fn inbound_frame(msg: Option<Result<Message, WsError>>) -> Frame {
    match msg {
        None => Frame::Eof,
        Some(Ok(Message::Binary(data))) => Frame::Data(data),
        Some(Ok(Message::Text(text))) => Frame::Data(text.into_bytes()),
        Some(Ok(Message::Close(..))) => Frame::Eof,
        Some(Ok(..)) => Frame::Skip,
        Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => Frame::Eof,
        Some(Err(err)) => Frame::Failed(ws_io_error(err)),
    }
}

fn idle_expired(direction: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{} read deadline expired", direction),
    )
}

/// Collapses a tungstenite error into the `io::Error` the relay reports.
pub fn ws_io_error(err: WsError) -> io::Error {
    match err {
        WsError::Io(err) => err,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

async fn close_websocket<S, T>(sink: &mut S)
where
    S: SinkExt<Message, Error = T> + Unpin,
{
    let frame = Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }));
    let _ = sink.send(frame).await;
    let _ = sink.close().await;
}
