#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::create_signal_monitor;

#[cfg(not(unix))]
mod other {
    use std::io;
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    pub async fn create_signal_monitor(cancel: CancellationToken) -> io::Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("received ctrl-c, soft exiting");
        cancel.cancel();

        tokio::signal::ctrl_c().await?;
        info!("received ctrl-c again, force exiting");
        Ok(())
    }
}
#[cfg(not(unix))]
pub use other::create_signal_monitor;
