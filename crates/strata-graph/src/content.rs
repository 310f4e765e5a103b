//! Single-flight content retrieval
//!
//! An aggregate root exposes an ordered list of content items. Callers mark
//! a window of items pending and ask for a pass; one pass walks the list in
//! order and retrieves every item it can claim. Requests arriving while a
//! pass runs are coalesced into exactly one follow-up pass, and only the
//! newest caller's callback is kept for it.
//!
//! The first error of a coalesced streak is carried forward and delivered to
//! every callback in that streak, even when a later pass succeeds.
//!
//! Items are fetched through the source, which decides where they are read
//! from and orders each fetch against its other operations. A pass that
//! unwinds still gives the flight back.

use crate::node::NodeRef;
use crate::state::RetrieveState;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_store::SyncError;
use tracing::{debug, info, warn};

/// Completion callback for a content request
pub type ContentCallback = Box<dyn FnOnce(Result<(), SyncError>) + Send>;

/// Ordered content owned by an aggregate root
#[async_trait]
pub trait ContentSource: Send + Sync + 'static {
    /// Item at `index`, if any
    fn content_item(&self, index: usize) -> Option<NodeRef>;

    /// Number of items
    fn content_len(&self) -> usize;

    /// Single-flight state for this source
    fn content_stream(&self) -> &ContentStream;

    /// Name used in logs
    fn content_label(&self) -> String;

    /// Fetch one pending item, claiming it only once the fetch may start
    async fn retrieve_content_item(&self, item: NodeRef) -> Result<(), SyncError>;
}

#[derive(Default)]
struct Flight {
    in_progress: bool,
    pending_another_pass: bool,
    pending_callback: Option<ContentCallback>,
}

/// Single-flight state of one aggregate root
#[derive(Default)]
pub struct ContentStream {
    flight: Mutex<Flight>,
    passes: AtomicU64,
}

impl fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flight = self.flight.lock();
        f.debug_struct("ContentStream")
            .field("in_progress", &flight.in_progress)
            .field("pending_another_pass", &flight.pending_another_pass)
            .field("passes", &self.passes())
            .finish()
    }
}

impl ContentStream {
    /// Create an idle stream
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Passes run so far
    #[must_use]
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Acquire)
    }

    /// Whether a pass is running
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.flight.lock().in_progress
    }

    /// Claim the flight, or coalesce into the running one.
    ///
    /// Returns the callback back when the caller now owns the flight.
    fn claim(&self, callback: Option<ContentCallback>) -> Result<Option<ContentCallback>, ()> {
        let mut flight = self.flight.lock();
        if flight.in_progress {
            flight.pending_another_pass = true;
            if flight.pending_callback.is_some() {
                debug!("superseding earlier content callback");
            }
            flight.pending_callback = callback;
            return Err(());
        }
        flight.in_progress = true;
        Ok(callback)
    }

    /// Decide what happens after a pass, under the lock.
    ///
    /// `Some(callback)` means run another pass with that callback.
    fn next_pass(&self) -> Option<Option<ContentCallback>> {
        let mut flight = self.flight.lock();
        if flight.pending_another_pass {
            flight.pending_another_pass = false;
            Some(flight.pending_callback.take())
        } else {
            flight.in_progress = false;
            None
        }
    }

    fn release(&self) {
        let mut flight = self.flight.lock();
        flight.in_progress = false;
        flight.pending_another_pass = false;
        flight.pending_callback = None;
    }
}

/// Mark `count` items from `from` pending and make sure a pass runs.
///
/// `count == 0` means through the end of the list. The callback runs once
/// its pass completes; a later request made while this one is still waiting
/// replaces it.
pub fn request_content<S: ContentSource>(
    source: &Arc<S>,
    from: usize,
    count: usize,
    callback: Option<ContentCallback>,
) {
    let len = source.content_len();
    let end = if count == 0 {
        len
    } else {
        from.saturating_add(count).min(len)
    };
    for index in from..end {
        if let Some(item) = source.content_item(index) {
            item.object().latch().mark_pending();
        }
    }

    let stream = source.content_stream();
    let Ok(callback) = stream.claim(callback) else {
        debug!(source = %source.content_label(), "content pass already running, coalesced");
        return;
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(drive(Arc::clone(source), callback));
        }
        Err(_) => {
            stream.release();
            warn!(source = %source.content_label(), "no async runtime for content pass");
            if let Some(callback) = callback {
                callback(Err(SyncError::Unknown("no async runtime".into())));
            }
        }
    }
}

/// Gives the flight back if a pass or callback unwinds
struct Release<'a> {
    stream: &'a ContentStream,
    armed: bool,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("content pass ended abnormally, releasing flight");
            self.stream.release();
        }
    }
}

async fn drive<S: ContentSource>(source: Arc<S>, mut callback: Option<ContentCallback>) {
    let mut release = Release {
        stream: source.content_stream(),
        armed: true,
    };
    let mut carried: Option<SyncError> = None;
    loop {
        let pass_error = run_pass(&*source).await;
        source.content_stream().passes.fetch_add(1, Ordering::AcqRel);
        if let Some(err) = pass_error {
            if carried.is_none() {
                carried = Some(err);
            } else {
                debug!(error = %err, "later content error dropped");
            }
        }

        if let Some(callback) = callback.take() {
            callback(carried.clone().map_or(Ok(()), Err));
        }

        match source.content_stream().next_pass() {
            Some(next) => callback = next,
            None => break,
        }
    }
    release.armed = false;
}

async fn run_pass<S: ContentSource>(source: &S) -> Option<SyncError> {
    let label = source.content_label();
    info!(source = %label, items = source.content_len(), "content pass starting");
    let mut first = None;
    let mut retrieved = 0usize;
    let mut index = 0;
    while let Some(item) = source.content_item(index) {
        index += 1;
        if item.retrieve_state() != RetrieveState::PendingRetrieval {
            continue;
        }
        match source.retrieve_content_item(Arc::clone(&item)).await {
            Ok(()) if item.retrieve_state() == RetrieveState::Synced => retrieved += 1,
            Ok(()) => {}
            Err(err) => {
                warn!(source = %label, item = %item.unique_identifier(), error = %err, "content item failed");
                first.get_or_insert(err);
            }
        }
    }
    info!(source = %label, retrieved, "content pass finished");
    first
}
