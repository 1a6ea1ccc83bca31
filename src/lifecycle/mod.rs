//! Post and session lifecycle manager.
//!
//! Posts archive after a window of inactivity, tracked with one debounced
//! timer per post. Sessions expire after a fixed lifetime, tracked in a table
//! that a background sweeper scans. A retention reaper deletes old posts
//! straight from the store on a coarser interval.
//!
//! Request handlers talk to [`Lifecycle`]; the other types are exposed for
//! embedding the pieces separately and for tests.

pub mod archive;
pub mod clock;
pub mod facade;
pub mod metrics;
pub mod reaper;
pub mod registry;
pub mod sessions;

pub use archive::{ArchivalTrigger, ArchiveOutcome};
pub use clock::{AnchoredClock, Clock, ManualClock, SystemClock, TimerSource};
pub use facade::{Lifecycle, ShutdownReport};
pub use metrics::{LifecycleMetrics, MetricsSnapshot};
pub use reaper::{ReapReport, RetentionReaper};
pub use registry::{ExpiryHandler, ExpiryRegistry};
pub use sessions::{SessionEntry, SessionSweeper, SweepReport};
