//! Per-user traffic accounting.
//!
//! Counters are kept in kibibytes so a year of saturated gigabit traffic
//! still fits comfortably in an `i64` when reported upstream.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicI64, Ordering},
};

use spin::RwLock;

use crate::vless::Uuid;

/// Shared accounting table keyed by user UUID. The one object mutated by
/// every live session concurrently: `credit` takes the read lock and bumps
/// a per-user atomic, so creditors never serialize against each other;
/// only `replace` (the control-plane sync) takes the write lock and swaps
/// the whole table.
///
/// A `credit` racing a `replace` may land on either table; losing at most
/// one session's tail that way is accepted.
pub struct UsageMeter {
    enabled: bool,
    users: RwLock<HashMap<Uuid, AtomicI64>>,
}

impl UsageMeter {
    /// Builds the table from the configured user set. Entries exist from
    /// here on; sessions never create them.
    pub fn new<I>(enabled: bool, users: I) -> Self
    where
        I: IntoIterator<Item = Uuid>,
    {
        Self {
            enabled,
            users: RwLock::new(Self::fresh_table(users)),
        }
    }

    fn fresh_table<I>(users: I) -> HashMap<Uuid, AtomicI64>
    where
        I: IntoIterator<Item = Uuid>,
    {
        users.into_iter().map(|u| (u, AtomicI64::new(0))).collect()
    }

    /// Whether this UUID may open sessions.
    pub fn is_known(&self, user: &Uuid) -> bool {
        self.users.read().contains_key(user)
    }

    /// Adds `bytes >> 10` to the user's counter. No-op when metering is
    /// disabled; silently ignored when the user is gone (a sync may have
    /// evicted it mid-session).
    pub fn credit(&self, user: &Uuid, bytes: u64) {
        if !self.enabled {
            return;
        }

        let kb = (bytes >> 10) as i64;
        if let Some(counter) = self.users.read().get(user) {
            counter.fetch_add(kb, Ordering::Relaxed);
        }
    }

    /// A consistent copy of the current counters.
    pub fn snapshot(&self) -> HashMap<Uuid, i64> {
        self.users
            .read()
            .iter()
            .map(|(user, kb)| (*user, kb.load(Ordering::Relaxed)))
            .collect()
    }

    /// Swaps in a new user set with zeroed counters. Users absent from the
    /// new set are dropped, open sessions included: their next credit is
    /// ignored.
    pub fn replace<I>(&self, users: I)
    where
        I: IntoIterator<Item = Uuid>,
    {
        let table = Self::fresh_table(users);
        *self.users.write() = table;
    }
}
