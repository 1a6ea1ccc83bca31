//! Expiry registry: per-post inactivity timers with debounce.
//!
//! Each tracked id owns exactly one entry holding its deadline, a cancelable
//! timer, and the generation number of the arm call that created it. Entries
//! live in a `DashMap`, so every mutation for an id (arm, cancel, fire
//! removal) is serialized by that id's shard lock. The lock is held only for
//! the handle swap, never across the expiry handler's I/O.
//!
//! Firing removes the entry *before* running the handler, and removal only
//! succeeds if the entry still carries the firing timer's generation. This
//! gives two guarantees:
//! - a callback that was superseded by a later `arm` finds a newer generation
//!   and does nothing
//! - a callback that removed its entry cannot be canceled afterwards, so the
//!   handler runs exactly once per entry lifetime

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::{FadeError, Result};
use crate::lifecycle::clock::{chrono_span, Clock, TimerHandle, TimerSource};
use crate::lifecycle::metrics::LifecycleMetrics;

/// Work to run when an entry's window elapses.
///
/// Receives only the id; any state it needs is looked up fresh.
pub trait ExpiryHandler: Send + Sync + 'static {
    fn on_expired(&self, id: String) -> impl Future<Output = ()> + Send;
}

struct ExpiryEntry {
    deadline: DateTime<Utc>,
    generation: u64,
    timer: TimerHandle,
}

struct RegistryInner<H> {
    entries: DashMap<String, ExpiryEntry>,
    handler: H,
    timers: TimerSource,
    clock: Arc<dyn Clock>,
    metrics: Arc<LifecycleMetrics>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

/// Registry of live expiry timers. Cheap to clone; clones share state.
pub struct ExpiryRegistry<H> {
    inner: Arc<RegistryInner<H>>,
}

impl<H> Clone for ExpiryRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: ExpiryHandler> ExpiryRegistry<H> {
    pub fn new(
        handler: H,
        timers: TimerSource,
        clock: Arc<dyn Clock>,
        metrics: Arc<LifecycleMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                handler,
                timers,
                clock,
                metrics,
                next_generation: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create or replace the entry for `id` with `deadline = now + window`.
    ///
    /// Any previous timer for `id` is canceled before the new one is armed.
    /// Returns the new deadline, or `ShuttingDown` once the registry is closed.
    pub fn arm(&self, id: &str, window: Duration) -> Result<DateTime<Utc>> {
        let inner = &self.inner;
        let generation = inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let deadline = inner.clock.now() + chrono_span(window);

        // The shard lock taken here orders this arm against shutdown and
        // against fire removal for the same id.
        let slot = inner.entries.entry(id.to_owned());
        if inner.closed.load(Ordering::Acquire) {
            return Err(FadeError::ShuttingDown);
        }

        match slot {
            Entry::Occupied(mut occupied) => {
                occupied.get().timer.cancel();
                LifecycleMetrics::incr(&inner.metrics.timers_canceled);
                let timer = self.schedule_fire(id.to_owned(), generation, window);
                occupied.insert(ExpiryEntry {
                    deadline,
                    generation,
                    timer,
                });
                tracing::trace!(id = %id, generation, deadline = %deadline, "re-armed expiry timer");
            }
            Entry::Vacant(vacant) => {
                let timer = self.schedule_fire(id.to_owned(), generation, window);
                vacant.insert(ExpiryEntry {
                    deadline,
                    generation,
                    timer,
                });
                tracing::trace!(id = %id, generation, deadline = %deadline, "armed expiry timer");
            }
        }

        LifecycleMetrics::incr(&inner.metrics.timers_armed);
        Ok(deadline)
    }

    /// Record activity for `id`: postpones its expiry by a full window.
    pub fn on_activity(&self, id: &str, window: Duration) -> Result<DateTime<Utc>> {
        self.arm(id, window)
    }

    /// Cancel and remove the entry for `id`. Returns false if none existed.
    pub fn cancel(&self, id: &str) -> bool {
        match self.inner.entries.remove(id) {
            Some((_, entry)) => {
                entry.timer.cancel();
                LifecycleMetrics::incr(&self.inner.metrics.timers_canceled);
                tracing::trace!(id = %id, "canceled expiry timer");
                true
            }
            None => false,
        }
    }

    /// Expire `id` immediately: drop any pending timer and run the handler.
    ///
    /// Returns false without running anything once the registry is closed.
    pub async fn expire_now(&self, id: &str) -> bool {
        let inner = self.inner.clone();
        let owned = id.to_owned();
        let Some(task) = self.expire_with(id, async move { inner.handler.on_expired(owned).await })
        else {
            return false;
        };
        if let Err(e) = task.await {
            tracing::warn!(id = %id, error = %e, "expiry task failed");
        }
        true
    }

    /// Drop any pending timer for `id` and spawn `run` as a tracked task.
    ///
    /// The closed check, the removal and the spawn all happen under the id's
    /// shard lock, so a concurrent `shutdown` either refuses the call or
    /// finds the task already tracked and waits for it. Returns `None` once
    /// the registry is closed.
    pub fn expire_with<T, F>(&self, id: &str, run: F) -> Option<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = &self.inner;
        let slot = inner.entries.entry(id.to_owned());
        if inner.closed.load(Ordering::Acquire) {
            return None;
        }

        let task = inner.timers.spawn(run);
        if let Entry::Occupied(occupied) = slot {
            let (_, entry) = occupied.remove_entry();
            entry.timer.cancel();
            LifecycleMetrics::incr(&inner.metrics.timers_canceled);
            tracing::trace!(id = %id, "expired ahead of deadline");
        }
        Some(task)
    }

    /// Current deadline for `id`, if it is tracked.
    pub fn deadline(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner.entries.get(id).map(|entry| entry.deadline)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Snapshot of every tracked id.
    pub fn ids(&self) -> Vec<String> {
        self.inner.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn handler(&self) -> &H {
        &self.inner.handler
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the registry and cancel every pending timer.
    ///
    /// Later `arm` calls fail with `ShuttingDown`. Returns the number of
    /// timers canceled.
    pub fn shutdown(&self) -> usize {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::Release);

        let mut canceled = 0usize;
        inner.entries.retain(|_, entry| {
            entry.timer.cancel();
            canceled += 1;
            false
        });
        LifecycleMetrics::add(&inner.metrics.timers_canceled, canceled as u64);

        tracing::debug!(canceled, "expiry registry closed");
        canceled
    }

    fn schedule_fire(&self, id: String, generation: u64, after: Duration) -> TimerHandle {
        let weak = Arc::downgrade(&self.inner);
        self.inner.timers.schedule(after, async move {
            if let Some(inner) = weak.upgrade() {
                RegistryInner::fire(inner, id, generation).await;
            }
        })
    }
}

impl<H: ExpiryHandler> RegistryInner<H> {
    async fn fire(self: Arc<Self>, id: String, generation: u64) {
        let removed = self
            .entries
            .remove_if(&id, |_, entry| entry.generation == generation);

        match removed {
            Some((_, entry)) => {
                tracing::debug!(id = %id, deadline = %entry.deadline, "inactivity window elapsed");
                self.handler.on_expired(id).await;
            }
            None => {
                LifecycleMetrics::incr(&self.metrics.stale_fires);
                tracing::trace!(id = %id, generation, "stale expiry timer ignored");
            }
        }
    }
}
