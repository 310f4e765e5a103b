//! Scripted remote backend
//!
//! Behaves like the in-memory remote, plus:
//! - scripted failures per verb and id, consumed in order
//! - random transient failures at a seeded rate
//! - fixed latency per call
//! - a log of every call, shared across record kinds

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_store::{EntityId, Existence, Record, RemoteStore, StoreError, TransportErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteVerb {
    Fetch,
    Upload,
    Remove,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub kind: &'static str,
    pub verb: RemoteVerb,
    pub id: EntityId,
}

/// Fault configuration shared by every scripted remote of one harness
pub struct FaultPlan {
    scripted: Mutex<HashMap<(RemoteVerb, EntityId), VecDeque<StoreError>>>,
    permanent: Mutex<HashMap<(RemoteVerb, EntityId), StoreError>>,
    failure_rate: Mutex<f64>,
    rng: Mutex<StdRng>,
    latency: Mutex<Duration>,
    indeterminate: Mutex<bool>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl fmt::Debug for FaultPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultPlan")
            .field("failure_rate", &*self.failure_rate.lock())
            .field("latency", &*self.latency.lock())
            .field("calls", &self.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for FaultPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::seeded(0)
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            scripted: Mutex::new(HashMap::new()),
            permanent: Mutex::new(HashMap::new()),
            failure_rate: Mutex::new(0.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            latency: Mutex::new(Duration::ZERO),
            indeterminate: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next calls of `verb` on `id` with `errors`, in order
    pub fn fail_next(
        &self,
        verb: RemoteVerb,
        id: impl Into<EntityId>,
        errors: impl IntoIterator<Item = StoreError>,
    ) {
        self.scripted
            .lock()
            .entry((verb, id.into()))
            .or_default()
            .extend(errors);
    }

    /// Fail every call of `verb` on `id`
    pub fn fail_always(&self, verb: RemoteVerb, id: impl Into<EntityId>, error: StoreError) {
        self.permanent.lock().insert((verb, id.into()), error);
    }

    pub fn clear_failures(&self) {
        self.scripted.lock().clear();
        self.permanent.lock().clear();
        *self.failure_rate.lock() = 0.0;
    }

    /// Fail fetches, uploads and removes at random with a transient error
    pub fn set_failure_rate(&self, rate: f64) {
        *self.failure_rate.lock() = rate.clamp(0.0, 1.0);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Make every existence probe come back indeterminate
    pub fn set_indeterminate(&self, indeterminate: bool) {
        *self.indeterminate.lock() = indeterminate;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, verb: RemoteVerb, id: &EntityId) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.verb == verb && &c.id == id)
            .count()
    }

    pub fn count_verb(&self, verb: RemoteVerb) -> usize {
        self.calls.lock().iter().filter(|c| c.verb == verb).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, kind: &'static str, verb: RemoteVerb, id: &EntityId) -> Result<(), StoreError> {
        self.calls.lock().push(RemoteCall {
            kind,
            verb,
            id: id.clone(),
        });

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let key = (verb, id.clone());
        if let Some(err) = self.scripted.lock().get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = self.permanent.lock().get(&key) {
            return Err(err.clone());
        }
        if verb != RemoteVerb::Exists {
            let rate = *self.failure_rate.lock();
            if rate > 0.0 && self.rng.lock().random_bool(rate) {
                return Err(StoreError::Transport(TransportErrorKind::TimedOut));
            }
        }
        Ok(())
    }
}

/// Remote backend for one record kind driven by a `FaultPlan`
pub struct ScriptedRemote<T> {
    objects: DashMap<EntityId, T>,
    faults: Arc<FaultPlan>,
    uploaded_bytes: AtomicU64,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Record> fmt::Debug for ScriptedRemote<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedRemote")
            .field("kind", &T::KIND)
            .field("objects", &self.objects.len())
            .finish_non_exhaustive()
    }
}

impl<T: Record> ScriptedRemote<T> {
    pub fn new(faults: Arc<FaultPlan>) -> Self {
        Self {
            objects: DashMap::new(),
            faults,
            uploaded_bytes: AtomicU64::new(0),
            _kind: PhantomData,
        }
    }

    pub fn seed(&self, id: impl Into<EntityId>, record: T) {
        self.objects.insert(id.into(), record);
    }

    pub fn get(&self, id: &EntityId) -> Option<T> {
        self.objects.get(id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.objects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<T: Record> RemoteStore<T> for ScriptedRemote<T> {
    async fn fetch(&self, id: &EntityId) -> Result<T, StoreError> {
        self.faults.enter(T::KIND, RemoteVerb::Fetch, id).await?;
        self.get(id).ok_or(StoreError::NotFound)
    }

    async fn upload(&self, id: &EntityId, record: &T) -> Result<(), StoreError> {
        self.faults.enter(T::KIND, RemoteVerb::Upload, id).await?;
        let bytes = serde_json::to_vec(record)?;
        self.uploaded_bytes
            .fetch_add(bytes.len() as u64, Ordering::AcqRel);
        self.objects.insert(id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &EntityId) -> Result<(), StoreError> {
        self.faults.enter(T::KIND, RemoteVerb::Remove, id).await?;
        self.objects
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn exists(&self, id: &EntityId) -> Existence {
        if self.faults.enter(T::KIND, RemoteVerb::Exists, id).await.is_err()
            || *self.faults.indeterminate.lock()
        {
            return Existence::Indeterminate;
        }
        if self.objects.contains_key(id) {
            Existence::Present
        } else {
            Existence::Absent
        }
    }
}
