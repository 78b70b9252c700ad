//! Server runtime for vless-ws-rust: the listener, the per-session
//! orchestration and the control-plane push loop, wired around the
//! primitives of the `vless-ws` crate.

pub mod server;

pub use server::{BoundServer, Server, ServiceContext};

use std::io;

use tokio_util::sync::CancellationToken;
use vless_ws::Config;

/// Runs one server to completion. Resolves with an error only when the
/// listener cannot be established; a fired `cancel` resolves `Ok`.
pub async fn run_server(config: Config, cancel: CancellationToken) -> io::Result<()> {
    Server::new(config, cancel).run().await
}
