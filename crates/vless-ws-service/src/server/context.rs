use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use tokio_util::sync::CancellationToken;

use vless_ws::{BufferPool, Config, Dialer, UsageMeter};

/// State shared by every task of one server instance: the accept loop,
/// all sessions and the push loop.
pub struct ServiceContext {
    config: Config,
    meter: UsageMeter,
    pool: Arc<BufferPool>,
    dialer: Dialer,
    cancel: CancellationToken,
    active_sessions: AtomicI64,
}

impl ServiceContext {
    pub fn new(config: Config, cancel: CancellationToken) -> Self {
        let meter = UsageMeter::new(config.enable_usage_metering, config.allow_users.iter().copied());
        let pool = Arc::new(BufferPool::new(config.buffer_size));

        Self {
            config,
            meter,
            pool,
            dialer: Dialer::with_public_dns(),
            cancel,
            active_sessions: AtomicI64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn meter(&self) -> &UsageMeter {
        &self.meter
    }

    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.pool)
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    /// The server-wide shutdown token; sessions derive children from it.
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Counts a session in until the guard drops.
    pub fn session_guard(self: &Arc<Self>) -> SessionGuard {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            context: Arc::clone(self),
        }
    }
}

pub struct SessionGuard {
    context: Arc<ServiceContext>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.context.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}
