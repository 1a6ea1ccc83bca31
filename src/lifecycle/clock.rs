//! Time sources: wall clock for persisted timestamps, and a tracked task
//! scheduler for fire-once timers and background loops.
//!
//! Timers run on tokio's monotonic clock. Every task goes through a
//! `TaskTracker`, so shutdown can wait for in-flight work to finish.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::task::TaskTracker;

use crate::error::{FadeError, Result};

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall clock that advances with tokio's clock from a fixed anchor.
///
/// Under a paused tokio runtime this keeps wall-clock deadlines and timer
/// sleeps in lockstep.
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    anchor: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl AnchoredClock {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        self.anchor + chrono_span(self.origin.elapsed())
    }
}

/// Clock moved by hand.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono_span(by);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Convert a std duration to a chrono span, saturating at roughly a century.
pub fn chrono_span(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Cancelable handle to one scheduled callback.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Cancel the callback. A no-op if it already fired.
    pub fn cancel(&self) {
        self.abort.abort();
    }
}

/// Spawns fire-once timers and long-lived tasks onto a captured runtime.
///
/// Holding a `Handle` lets callers outside the runtime (plain request
/// threads) schedule work.
#[derive(Clone)]
pub struct TimerSource {
    handle: Handle,
    tracker: TaskTracker,
}

impl TimerSource {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
        }
    }

    /// Bind to the runtime the caller is running in.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| FadeError::Runtime {
            reason: e.to_string(),
        })?;
        Ok(Self::new(handle))
    }

    /// Run `fire` once after `after` elapses, unless canceled first.
    pub fn schedule<F>(&self, after: Duration, fire: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = self.tracker.spawn_on(
            async move {
                tokio::time::sleep(after).await;
                fire.await;
            },
            &self.handle,
        );
        TimerHandle {
            abort: task.abort_handle(),
        }
    }

    /// Spawn a tracked task.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn_on(fut, &self.handle)
    }

    /// Number of tracked tasks still alive.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Close the tracker and wait up to `timeout` for every tracked task to
    /// finish. Returns false if the timeout elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn timer_fires_once() {
        let timers = TimerSource::current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _handle = timers.schedule(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn canceled_timer_never_fires() {
        let timers = TimerSource::current().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = timers.schedule(Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(timers.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn anchored_clock_follows_tokio_time() {
        let anchor = Utc::now();
        let clock = AnchoredClock::new(anchor);
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - anchor, chrono::Duration::seconds(90));
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(30));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(30));
    }

    #[test]
    fn current_outside_runtime_errors() {
        assert!(matches!(TimerSource::current(), Err(FadeError::Runtime { .. })));
    }
}
