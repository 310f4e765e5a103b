//! Story prefetcher
//!
//! Warms stories ahead of display. Operations wait in one of two bands and
//! at most `concurrency` run at once; a free slot always goes to the High
//! band first. Cancelling removes waiting operations and stops running
//! ones for the targeted stories.
//!
//! A recursive prefetch keeps re-queuing itself at the back of its band
//! until the story reports every moment (or the first moment) retrieved,
//! so other stories interleave with it.
//!
//! Prefetches read from wherever the story was loaded, and moment fetches
//! go through the story's mutation queue like content passes do.

use crate::context::SyncContext;
use crate::entities::Story;
use crate::node::EntityNode;
use crate::state::RetrieveState;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_store::{CancelGate, EntityId, Priority, SyncError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Priority band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// Visible or about to be
    High,
    /// Speculative
    Low,
}

/// What to prefetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchKind {
    /// Story, venue and author
    Digest,
    /// One moment by position
    Moment(usize),
    /// Digest first, then the first moment
    First,
    /// Digest first, then the first moment not yet synced
    Next,
}

/// Result of one prefetch operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// Something was retrieved
    Fetched,
    /// Digest was already resident
    DigestRetrieved,
    /// Digest and first moment were already resident
    FirstMomentRetrieved,
    /// Digest and every moment were already resident
    AllMomentsRetrieved,
}

type Reply = oneshot::Sender<Result<PrefetchOutcome, SyncError>>;

struct Waiting {
    op_id: u64,
    story: Arc<Story>,
    kind: PrefetchKind,
    band: Band,
    reply: Reply,
}

struct Running {
    op_id: u64,
    story: Arc<Story>,
    band: Band,
    gate: Arc<CancelGate>,
}

#[derive(Default)]
struct State {
    high: VecDeque<Waiting>,
    low: VecDeque<Waiting>,
    running: Vec<Running>,
    loops: HashMap<u64, (EntityId, Band, bool)>,
}

impl State {
    fn band(&mut self, band: Band) -> &mut VecDeque<Waiting> {
        match band {
            Band::High => &mut self.high,
            Band::Low => &mut self.low,
        }
    }
}

struct Inner {
    context: Arc<SyncContext>,
    concurrency: usize,
    state: Mutex<State>,
    next_id: AtomicU64,
}

/// Handle to a queued prefetch
#[derive(Debug)]
pub struct PrefetchHandle {
    op_id: u64,
    rx: oneshot::Receiver<Result<PrefetchOutcome, SyncError>>,
}

impl PrefetchHandle {
    /// Operation id
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.op_id
    }

    /// Wait for the operation; a removed operation resolves as cancelled
    pub async fn outcome(self) -> Result<PrefetchOutcome, SyncError> {
        self.rx.await.unwrap_or(Err(SyncError::Cancelled))
    }
}

/// Bounded, two-band story prefetcher
#[derive(Clone)]
pub struct Prefetcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("concurrency", &self.inner.concurrency)
            .field("waiting_high", &self.waiting(Band::High))
            .field("waiting_low", &self.waiting(Band::Low))
            .field("running", &self.running())
            .finish()
    }
}

impl Prefetcher {
    /// Prefetcher sized from the context's configuration
    pub fn new(context: Arc<SyncContext>) -> Self {
        let concurrency = context.config().prefetch_concurrency.max(1);
        Self::with_concurrency(context, concurrency)
    }

    /// Prefetcher running at most `concurrency` operations at once
    pub fn with_concurrency(context: Arc<SyncContext>, concurrency: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                concurrency: concurrency.max(1),
                state: Mutex::new(State::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Operations waiting in `band`
    #[must_use]
    pub fn waiting(&self, band: Band) -> usize {
        self.inner.state.lock().band(band).len()
    }

    /// Operations running now
    #[must_use]
    pub fn running(&self) -> usize {
        self.inner.state.lock().running.len()
    }

    /// Queue one operation
    pub fn queue(&self, story: Arc<Story>, kind: PrefetchKind, band: Band) -> PrefetchHandle {
        let op_id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        let (reply, rx) = oneshot::channel();
        debug!(op_id, story = %story.unique_identifier(), ?kind, ?band, "prefetch queued");
        self.inner.state.lock().band(band).push_back(Waiting {
            op_id,
            story,
            kind,
            band,
            reply,
        });
        pump(&self.inner);
        PrefetchHandle { op_id, rx }
    }

    /// Keep queuing `kind` until the story reports nothing left to fetch.
    ///
    /// Stops at the first error, or with `Cancelled` once the story or its
    /// band is cancelled.
    pub async fn queue_recursive(
        &self,
        story: Arc<Story>,
        kind: PrefetchKind,
        band: Band,
    ) -> Result<PrefetchOutcome, SyncError> {
        let loop_id = self.inner.next_id.fetch_add(1, Ordering::AcqRel);
        self.inner
            .state
            .lock()
            .loops
            .insert(loop_id, (story.unique_identifier(), band, false));

        let result = loop {
            let cancelled = self
                .inner
                .state
                .lock()
                .loops
                .get(&loop_id)
                .map_or(true, |(_, _, cancelled)| *cancelled);
            if cancelled {
                break Err(SyncError::Cancelled);
            }
            match self.queue(Arc::clone(&story), kind, band).outcome().await {
                Ok(PrefetchOutcome::Fetched) => continue,
                other => break other,
            }
        };

        self.inner.state.lock().loops.remove(&loop_id);
        result
    }

    /// Cancel every operation for `story` in `band`
    pub fn cancel(&self, story: &EntityId, band: Band) {
        self.cancel_where(band, |id| id == story);
    }

    /// Cancel every operation in `band` except those for `keep`
    pub fn cancel_all_but(&self, keep: &EntityId, band: Band) {
        self.cancel_where(band, |id| id != keep);
    }

    /// Cancel every operation in `band`
    pub fn cancel_all(&self, band: Band) {
        self.cancel_where(band, |_| true);
    }

    fn cancel_where(&self, band: Band, matches: impl Fn(&EntityId) -> bool) {
        let mut stopped = Vec::new();
        let removed: Vec<Waiting> = {
            let mut state = self.inner.state.lock();
            for (id, loop_band, cancelled) in state.loops.values_mut() {
                if *loop_band == band && matches(id) {
                    *cancelled = true;
                }
            }
            for running in state.running.iter().filter(|r| r.band == band) {
                if matches(&running.story.unique_identifier()) {
                    running.gate.cancel();
                    stopped.push(Arc::clone(&running.story));
                }
            }
            let queue = state.band(band);
            let (removed, kept): (Vec<Waiting>, Vec<Waiting>) = std::mem::take(queue)
                .into_iter()
                .partition(|w| matches(&w.story.unique_identifier()));
            *queue = kept.into();
            removed
        };

        for waiting in removed {
            debug!(op_id = waiting.op_id, "prefetch cancelled while waiting");
            let _ = waiting.reply.send(Err(SyncError::Cancelled));
        }
        for story in stopped {
            story.cancel_retrieve();
        }
    }
}

fn pump(inner: &Arc<Inner>) {
    loop {
        let (waiting, gate) = {
            let mut state = inner.state.lock();
            if state.running.len() >= inner.concurrency {
                return;
            }
            let Some(waiting) = state.high.pop_front().or_else(|| state.low.pop_front()) else {
                return;
            };
            let gate = Arc::new(CancelGate::new());
            state.running.push(Running {
                op_id: waiting.op_id,
                story: Arc::clone(&waiting.story),
                band: waiting.band,
                gate: Arc::clone(&gate),
            });
            (waiting, gate)
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(execute(Arc::clone(inner), waiting, gate));
            }
            Err(_) => {
                warn!(op_id = waiting.op_id, "no async runtime for prefetch");
                inner.state.lock().running.retain(|r| r.op_id != waiting.op_id);
                let _ = waiting
                    .reply
                    .send(Err(SyncError::Unknown("no async runtime".into())));
            }
        }
    }
}

async fn execute(inner: Arc<Inner>, waiting: Waiting, gate: Arc<CancelGate>) {
    let Waiting {
        op_id,
        story,
        kind,
        band,
        reply,
    } = waiting;
    let ticket = gate.ticket();
    let priority = match band {
        Band::High => inner.context.config().recursive_priority,
        Band::Low => Priority::Background,
    };
    inner.context.scheduler().after(Duration::ZERO, priority).await;

    let result = gate.guard(ticket, run(&story, kind)).await;
    match &result {
        Ok(outcome) => debug!(op_id, ?outcome, "prefetch finished"),
        Err(err) if err.is_cancelled() => info!(op_id, "prefetch cancelled"),
        Err(err) => warn!(op_id, error = %err, "prefetch failed"),
    }
    let _ = reply.send(result);

    inner.state.lock().running.retain(|r| r.op_id != op_id);
    pump(&inner);
}

async fn run(story: &Arc<Story>, kind: PrefetchKind) -> Result<PrefetchOutcome, SyncError> {
    if !story.is_digest_retrieved() {
        let (scope, tier) = story.content_location();
        story.retrieve_digest(scope, tier).await?;
        if !matches!(kind, PrefetchKind::Moment(_)) {
            return Ok(PrefetchOutcome::Fetched);
        }
    }

    let synced = |index: usize| {
        story
            .moment(index)
            .is_some_and(|m| m.retrieve_state() == RetrieveState::Synced)
    };
    let index = match kind {
        PrefetchKind::Digest => return Ok(PrefetchOutcome::DigestRetrieved),
        PrefetchKind::Moment(index) => index,
        PrefetchKind::First if story.moment(0).is_none() => {
            return Ok(PrefetchOutcome::AllMomentsRetrieved)
        }
        PrefetchKind::First if synced(0) => return Ok(PrefetchOutcome::FirstMomentRetrieved),
        PrefetchKind::First => 0,
        PrefetchKind::Next => {
            let count = story.moments().len();
            match (0..count).find(|&i| !synced(i)) {
                Some(index) => index,
                None => return Ok(PrefetchOutcome::AllMomentsRetrieved),
            }
        }
    };

    story.retrieve_moment(index).await?;
    Ok(PrefetchOutcome::Fetched)
}
