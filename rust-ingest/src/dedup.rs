//! Delivery deduplication.
//!
//! Upstream senders retry aggressively, so the same delivery id routinely
//! arrives more than once. The store remembers each id for a retention window
//! and answers `Fresh` for exactly one caller per id within that window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Result of an atomic check-and-record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// First sighting within the window; the id is now recorded.
    Fresh,
    /// The id was already recorded and has not expired.
    Duplicate,
}

/// Shared store of recently seen delivery ids.
///
/// Implementations must make `check_and_record` indivisible per id: two
/// concurrent calls with the same id never both return `Fresh`.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn check_and_record(&self, delivery_id: &str) -> DedupOutcome;

    /// Forget `delivery_id` so that a retry is treated as fresh.
    async fn release(&self, delivery_id: &str);

    /// Drop expired entries, returning how many were removed.
    async fn sweep(&self) -> usize;
}

/// Bookkeeping for one remembered delivery id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupEntry {
    pub delivery_id: String,
    pub first_seen_at: Instant,
    pub expires_at: Instant,
}

impl DedupEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-process dedup store backed by a sharded concurrent map.
///
/// The map's entry API holds the shard write lock for the whole
/// check-then-insert, which is what makes `check_and_record` atomic.
#[derive(Debug)]
pub struct MemoryDedupStore {
    entries: DashMap<String, DedupEntry>,
    retention: Duration,
}

impl MemoryDedupStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Check-and-record against an explicit clock reading.
    pub fn check_and_record_at(&self, delivery_id: &str, now: Instant) -> DedupOutcome {
        let fresh_entry = || DedupEntry {
            delivery_id: delivery_id.to_string(),
            first_seen_at: now,
            expires_at: now + self.retention,
        };

        match self.entries.entry(delivery_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    DedupOutcome::Duplicate
                } else {
                    debug!(delivery_id = %delivery_id, "dedup_entry_expired_on_access");
                    occupied.insert(fresh_entry());
                    DedupOutcome::Fresh
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh_entry());
                DedupOutcome::Fresh
            }
        }
    }

    /// Remove every entry that has expired by `now`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Look up the live entry for `delivery_id`, if any.
    pub fn get_at(&self, delivery_id: &str, now: Instant) -> Option<DedupEntry> {
        self.entries
            .get(delivery_id)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value().clone())
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DedupStore for MemoryDedupStore {
    async fn check_and_record(&self, delivery_id: &str) -> DedupOutcome {
        self.check_and_record_at(delivery_id, Instant::now())
    }

    async fn release(&self, delivery_id: &str) {
        if self.entries.remove(delivery_id).is_some() {
            debug!(delivery_id = %delivery_id, "dedup_entry_released");
        }
    }

    async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }
}

/// Spawn a task that sweeps `store` every `period`.
///
/// The task runs until aborted through the returned handle.
pub fn spawn_sweeper(store: Arc<dyn DedupStore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = store.sweep().await;
            if removed > 0 {
                info!(removed = removed, "dedup_sweep_completed");
            }
        }
    })
}
