//! Clock / scheduler seam used for retry rescheduling

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Priority class a deferred continuation runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Work a user is actively waiting on
    UserInitiated,
    /// Long-running work with visible progress
    Utility,
    /// Prefetch and housekeeping
    Background,
}

/// Defers a continuation by a delay on a priority class.
///
/// Awaiting `after` is the async rendition of "run this callback later":
/// the caller resumes once the delay has elapsed. Implementations must
/// never block a thread.
#[async_trait]
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Resume the caller after `delay` on `priority`
    async fn after(&self, delay: Duration, priority: Priority);
}

/// Scheduler backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn after(&self, delay: Duration, priority: Priority) {
        tracing::trace!(?delay, ?priority, "deferring continuation");
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }
}
