use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::time::{self, Duration, Instant};

/// A read deadline that a relay pump pushes forward every time it makes
/// progress. Polls `Ready` once `period` elapses without a `touch`.
pub struct IdleTimer {
    period: Duration,
    sleep: Pin<Box<time::Sleep>>,
}

impl IdleTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            sleep: Box::pin(time::sleep(period)),
        }
    }

    /// Restarts the countdown from now.
    pub fn touch(&mut self) {
        let deadline = Instant::now() + self.period;
        self.sleep.as_mut().reset(deadline);
    }
}

impl Future for IdleTimer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.sleep.as_mut().poll(cx)
    }
}
