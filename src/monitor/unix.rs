use std::io;

use futures::{
    future::{self, Either},
    FutureExt,
};
use tokio::{
    signal::unix::{signal, SignalKind},
    time::{self, Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

// The server drains sessions for up to 5 s after cancellation; give it
// that plus a margin before pulling the plug.
const FORCE_EXIT_GRACE: Duration = Duration::from_secs(6);

/// Create a monitor future for signals
///
/// The first `SIGTERM`/`SIGINT` cancels the shared token and lets the
/// server drain; a second signal, or an overrun of the drain budget,
/// resolves the future and forces the exit.
pub async fn create_signal_monitor(cancel: CancellationToken) -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut expire_time = None;

    loop {
        tokio::select! {
            r = future::select(sigterm.recv().boxed(), sigint.recv().boxed()) => {
                let signal_name = match r {
                    Either::Left(..) => "SIGTERM",
                    Either::Right(..) => "SIGINT",
                };

                if cancel.is_cancelled() {
                    info!("received {}, force exiting", signal_name);
                    break;
                }

                info!("received {}, soft exiting", signal_name);
                expire_time = Instant::now().checked_add(FORCE_EXIT_GRACE);
                cancel.cancel();
            }
            _ = wait_timeout(&expire_time) => {
                error!("soft exiting timeout, force exiting");
                break;
            }
        }
    }

    Ok(())
}

async fn wait_timeout(expire_time: &Option<Instant>) {
    match expire_time {
        Some(expire_time) => time::sleep_until(*expire_time).await,
        None => future::pending().await,
    }
}
