use std::sync::atomic::{AtomicU64, Ordering};

/// Byte counters for one session, updated by the relay pumps as they go so
/// the totals are correct even when a session is cancelled mid-transfer.
///
/// `tx` is client→upstream, `rx` is upstream→client.
#[derive(Debug, Default)]
pub struct FlowStat {
    tx: AtomicU64,
    rx: AtomicU64,
}

impl FlowStat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_tx(&self, n: u64) {
        self.tx.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_rx(&self, n: u64) {
        self.rx.fetch_add(n, Ordering::Relaxed);
    }

    pub fn tx(&self) -> u64 {
        self.tx.load(Ordering::Relaxed)
    }

    pub fn rx(&self) -> u64 {
        self.rx.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.tx() + self.rx()
    }
}
