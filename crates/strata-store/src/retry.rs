//! Retry policy engine
//!
//! Bounded-attempt retry with failure classification:
//! - `Retry` counts attempts and defers the next one through a `Scheduler`
//! - `attempt_http` / `attempt_transport` refuse terminal failures up front
//! - `run` drives a fallible async closure until success, a terminal
//!   failure, or the attempt ceiling
//!
//! Exhausting the ceiling is not an error of its own; the last failure is
//! handed back unchanged.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_store::retry::{self, RetryPolicy};
//!
//! let policy = RetryPolicy::record();
//! let body = retry::run("fetch story", &policy, &scheduler, |_| remote.fetch(&id)).await?;
//! ```

use crate::error::StoreError;
use crate::scheduler::{Priority, Scheduler};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt ceiling, delay and priority for one class of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay between attempts, in milliseconds
    pub delay_ms: u64,
    /// Priority class retries are scheduled on
    pub priority: Priority,
}

impl RetryPolicy {
    /// Create a policy
    #[inline]
    #[must_use]
    pub const fn new(max_attempts: u32, delay_ms: u64, priority: Priority) -> Self {
        Self {
            max_attempts,
            delay_ms,
            priority,
        }
    }

    /// Structured records on the remote object store
    #[inline]
    #[must_use]
    pub const fn record() -> Self {
        Self::new(5, 500, Priority::Utility)
    }

    /// Media files on the remote file store
    #[inline]
    #[must_use]
    pub const fn file() -> Self {
        Self::new(3, 3_000, Priority::Utility)
    }

    /// On-device tiers
    #[inline]
    #[must_use]
    pub const fn local() -> Self {
        Self::new(2, 0, Priority::UserInitiated)
    }

    /// Single attempt, no retry
    #[inline]
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, 0, Priority::UserInitiated)
    }

    /// Delay between attempts
    #[inline]
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Set the attempt ceiling
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay between attempts
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::record()
    }
}

/// Transport-layer failure kinds reported before any HTTP status exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Request timed out
    TimedOut,
    /// TLS handshake failed
    SecureConnectionFailed,
    /// Request body stream ran dry
    RequestBodyStreamExhausted,
    /// Device is offline
    NotConnectedToInternet,
    /// Connection dropped mid-request
    NetworkConnectionLost,
    /// Redirect loop
    TooManyRedirects,
    /// Response decoding failed part way through
    DecodingFailedMidStream,
    /// Response decoding could not complete
    DecodingFailedToComplete,
    /// DNS resolution failed
    DnsLookupFailed,
    /// Resource could not be loaded from the network
    CannotLoadFromNetwork,
    /// Host name unknown
    CannotFindHost,
    /// Host refused the connection
    CannotConnectToHost,
    /// Server answered with garbage
    BadServerResponse,
    /// Background transfer session went away
    BackgroundSessionDisconnected,
    /// Background transfer session already in use
    BackgroundSessionInUse,
    /// Request was cancelled locally
    Cancelled,
    /// URL is malformed
    BadUrl,
    /// URL scheme is unsupported
    UnsupportedUrl,
    /// Credentials are required
    UserAuthenticationRequired,
    /// Anything else
    Other,
}

impl TransportErrorKind {
    /// Check if another attempt could succeed
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TimedOut
                | Self::SecureConnectionFailed
                | Self::RequestBodyStreamExhausted
                | Self::NotConnectedToInternet
                | Self::NetworkConnectionLost
                | Self::TooManyRedirects
                | Self::DecodingFailedMidStream
                | Self::DecodingFailedToComplete
                | Self::DnsLookupFailed
                | Self::CannotLoadFromNetwork
                | Self::CannotFindHost
                | Self::CannotConnectToHost
                | Self::BadServerResponse
                | Self::BackgroundSessionDisconnected
                | Self::BackgroundSessionInUse
        )
    }
}

/// Whether a non-success HTTP status is worth retrying.
///
/// Request timeout, rate limiting, login timeout, gateway timeout and
/// temporary redirect are retried, as is any informational or server
/// error status. Other redirects and client errors are terminal.
#[must_use]
pub fn status_is_retryable(status: u16) -> bool {
    match status {
        307 | 408 | 429 | 440 | 504 => true,
        100..=199 | 500..=599 => true,
        _ => false,
    }
}

/// Attempt counter for one logical operation
#[derive(Debug)]
pub struct Retry {
    label: String,
    max_attempts: u32,
    attempts: u32,
    scheduler: Arc<dyn Scheduler>,
}

impl Retry {
    /// Begin counting; the first attempt is already under way
    #[must_use]
    pub fn start(label: impl Into<String>, max_attempts: u32, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            label: label.into(),
            max_attempts: max_attempts.max(1),
            attempts: 1,
            scheduler,
        }
    }

    /// Attempts made so far, including the one in progress
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Defer the next attempt, or return false once the ceiling is reached
    pub async fn attempt(&mut self, after: Duration, priority: Priority) -> bool {
        if self.attempts >= self.max_attempts {
            warn!(label = %self.label, attempts = self.attempts, "retry attempts exhausted");
            return false;
        }
        self.attempts += 1;
        debug!(
            label = %self.label,
            attempt = self.attempts,
            max = self.max_attempts,
            "retrying"
        );
        self.scheduler.after(after, priority).await;
        true
    }

    /// Retry only when the HTTP status is classified as transient
    pub async fn attempt_http(&mut self, status: u16, after: Duration, priority: Priority) -> bool {
        if !status_is_retryable(status) {
            debug!(label = %self.label, status, "status not retryable");
            return false;
        }
        self.attempt(after, priority).await
    }

    /// Retry only when the transport failure is classified as transient
    pub async fn attempt_transport(
        &mut self,
        kind: TransportErrorKind,
        after: Duration,
        priority: Priority,
    ) -> bool {
        if !kind.is_retryable() {
            debug!(label = %self.label, ?kind, "transport failure not retryable");
            return false;
        }
        self.attempt(after, priority).await
    }

    /// Classify a backend failure and retry when it is transient
    pub async fn attempt_for(&mut self, err: &StoreError, policy: &RetryPolicy) -> bool {
        match err {
            StoreError::Http { status, .. } => {
                self.attempt_http(*status, policy.delay(), policy.priority).await
            }
            StoreError::Transport(kind) => {
                self.attempt_transport(*kind, policy.delay(), policy.priority).await
            }
            other if other.is_retryable() => self.attempt(policy.delay(), policy.priority).await,
            _ => false,
        }
    }
}

/// Run `work` until it succeeds, fails terminally, or exhausts `policy`.
///
/// `work` receives the 1-based attempt number.
pub async fn run<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    scheduler: &Arc<dyn Scheduler>,
    mut work: F,
) -> Result<T, StoreError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut retry = Retry::start(label, policy.max_attempts, Arc::clone(scheduler));
    loop {
        match work(retry.attempts()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !retry.attempt_for(&err, policy).await {
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioScheduler;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn scheduler() -> Arc<dyn Scheduler> {
        Arc::new(TokioScheduler)
    }

    #[test]
    fn status_classification() {
        for status in [307, 408, 429, 440, 504, 500, 503, 101] {
            assert!(status_is_retryable(status), "{status} should retry");
        }
        for status in [200, 301, 302, 400, 401, 403, 404, 409] {
            assert!(!status_is_retryable(status), "{status} should not retry");
        }
    }

    #[test]
    fn transport_classification() {
        assert!(TransportErrorKind::TimedOut.is_retryable());
        assert!(TransportErrorKind::NetworkConnectionLost.is_retryable());
        assert!(!TransportErrorKind::Cancelled.is_retryable());
        assert!(!TransportErrorKind::UserAuthenticationRequired.is_retryable());
    }

    #[tokio::test]
    async fn attempt_returns_false_at_ceiling() {
        let mut retry = Retry::start("ceiling", 3, scheduler());
        assert!(retry.attempt(Duration::ZERO, Priority::Utility).await);
        assert!(retry.attempt(Duration::ZERO, Priority::Utility).await);
        assert!(!retry.attempt(Duration::ZERO, Priority::Utility).await);
        assert_eq!(retry.attempts(), 3);
    }

    #[tokio::test]
    async fn terminal_status_is_not_retried() {
        let mut retry = Retry::start("terminal", 5, scheduler());
        assert!(!retry.attempt_http(404, Duration::ZERO, Priority::Utility).await);
        assert_eq!(retry.attempts(), 1);
    }

    #[tokio::test]
    async fn run_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, 0, Priority::Utility);
        let result: Result<(), _> = run("always fails", &policy, &scheduler(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transport(TransportErrorKind::TimedOut)) }
        })
        .await;

        assert_eq!(result, Err(StoreError::Transport(TransportErrorKind::TimedOut)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn run_returns_first_success() {
        let policy = RetryPolicy::new(5, 0, Priority::Utility);
        let result = run("flaky", &policy, &scheduler(), |attempt| async move {
            if attempt < 3 {
                Err(StoreError::Http {
                    status: 503,
                    message: "unavailable".into(),
                })
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn cancelled_is_never_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, 0, Priority::Utility);
        let result: Result<(), _> = run("cancelled", &policy, &scheduler(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Cancelled) }
        })
        .await;
        assert_eq!(result, Err(StoreError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_ceiling_still_allows_one_attempt() {
        let retry = Retry::start("zero", 0, scheduler());
        assert_eq!(retry.max_attempts, 1);
    }
}
