//! Generic tiered object
//!
//! `TieredObject<T>` holds one entity's payload and implements the
//! single-node verbs on top of a `TieredStore<T>`:
//! - retrieve: memory, then the local tier
//! - retrieve from local then remote: memory, local tier, remote; a remote
//!   hit is written back to the local tier before returning
//! - save to local and remote: local first, then a probed remote upload
//! - delete from local and remote: remote, then both local tiers regardless
//!
//! A version counter tracks edits so an unmodified payload already on the
//! remote is never uploaded again. Local copies carry an unsynced marker,
//! so edits reloaded from a draft still count as modified.

use crate::node::{ReadyHook, StoredObject};
use crate::state::{RetrieveLatch, RetrieveState};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_store::{
    CancelGate, EntityId, LocalTier, Record, SaveOutcome, SyncError, Tier, TierSet, TieredStore,
};
use tracing::{debug, warn};

/// One entity's payload bound to its tiered store
pub struct TieredObject<T: Record> {
    id: EntityId,
    store: Arc<TieredStore<T>>,
    payload: RwLock<Option<T>>,
    tiers: Mutex<TierSet>,
    version: AtomicU64,
    remote_version: AtomicU64,
    latch: RetrieveLatch,
    retrieve_gate: CancelGate,
    save_gate: CancelGate,
}

impl<T: Record> fmt::Debug for TieredObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredObject")
            .field("kind", &T::KIND)
            .field("id", &self.id)
            .field("tiers", &self.tiers())
            .field("state", &self.latch.state())
            .finish_non_exhaustive()
    }
}

impl<T: Record> TieredObject<T> {
    /// Freshly created content, resident in memory and not yet persisted
    pub fn new(id: EntityId, store: Arc<TieredStore<T>>, payload: T) -> Self {
        Self {
            id,
            store,
            payload: RwLock::new(Some(payload)),
            tiers: Mutex::new(TierSet::empty().with(Tier::Memory)),
            version: AtomicU64::new(1),
            remote_version: AtomicU64::new(0),
            latch: RetrieveLatch::new(RetrieveState::Synced),
            retrieve_gate: CancelGate::new(),
            save_gate: CancelGate::new(),
        }
    }

    /// Unretrieved reference to content that lives in some store
    pub fn reference(id: EntityId, store: Arc<TieredStore<T>>) -> Self {
        Self {
            id,
            store,
            payload: RwLock::new(None),
            tiers: Mutex::new(TierSet::empty()),
            version: AtomicU64::new(0),
            remote_version: AtomicU64::new(0),
            latch: RetrieveLatch::default(),
            retrieve_gate: CancelGate::new(),
            save_gate: CancelGate::new(),
        }
    }

    /// Clone of the payload, if resident
    #[must_use]
    pub fn payload(&self) -> Option<T> {
        self.payload.read().clone()
    }

    /// Read a projection of the payload, if resident
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.payload.read().as_ref().map(f)
    }

    /// Mutate the payload in place, marking it modified
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, SyncError> {
        let mut guard = self.payload.write();
        let payload = guard.as_mut().ok_or_else(|| self.not_resident())?;
        let out = f(payload);
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(out)
    }

    /// Whether the payload changed since it was last in sync with the remote
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.version.load(Ordering::Acquire) != self.remote_version.load(Ordering::Acquire)
    }

    /// The backing store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<TieredStore<T>> {
        &self.store
    }

    fn not_resident(&self) -> SyncError {
        SyncError::PermanentValidation(format!("{} {} is not resident in memory", T::KIND, self.id))
    }

    fn snapshot(&self) -> Result<(T, u64), SyncError> {
        let guard = self.payload.read();
        let payload = guard.as_ref().ok_or_else(|| self.not_resident())?;
        Ok((payload.clone(), self.version.load(Ordering::Acquire)))
    }

    fn install(&self, record: T, found_in: TierSet, synced: bool) {
        *self.payload.write() = Some(record);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        if synced {
            self.remote_version.store(version, Ordering::Release);
        }
        let mut tiers = self.tiers.lock();
        for tier in found_in.with(Tier::Memory).iter() {
            tiers.insert(tier);
        }
    }

    fn fire(ready: Option<&ReadyHook>) {
        if let Some(ready) = ready {
            ready.fire();
        }
    }
}

#[async_trait]
impl<T: Record> StoredObject for TieredObject<T> {
    fn id(&self) -> &EntityId {
        &self.id
    }

    fn tiers(&self) -> TierSet {
        *self.tiers.lock()
    }

    fn is_resident(&self) -> bool {
        self.payload.read().is_some()
    }

    fn latch(&self) -> &RetrieveLatch {
        &self.latch
    }

    fn retrieve_gate(&self) -> &CancelGate {
        &self.retrieve_gate
    }

    fn save_gate(&self) -> &CancelGate {
        &self.save_gate
    }

    async fn retrieve(&self, tier: LocalTier, forced: bool) -> Result<(), SyncError> {
        if !forced && self.is_resident() {
            return Ok(());
        }
        let copy = self.store.retrieve_local(&self.id, tier).await?;
        self.install(copy.record, TierSet::empty().with(tier), !copy.unsynced);
        Ok(())
    }

    async fn retrieve_from_local_then_remote(
        &self,
        tier: LocalTier,
        forced: bool,
        ready: Option<ReadyHook>,
    ) -> Result<(), SyncError> {
        let cancel = self.retrieve_gate.scope();
        if !forced {
            if self.is_resident() {
                Self::fire(ready.as_ref());
                return Ok(());
            }
            match self.store.retrieve_local(&self.id, tier).await {
                Ok(copy) => {
                    self.install(copy.record, TierSet::empty().with(tier), !copy.unsynced);
                    Self::fire(ready.as_ref());
                    return Ok(());
                }
                Err(err) if err.is_not_found() => {
                    debug!(kind = T::KIND, id = %self.id, %tier, "local miss, going remote");
                }
                Err(err) => {
                    warn!(kind = T::KIND, id = %self.id, %tier, error = %err, "local retrieve failed, going remote");
                }
            }
        }

        let record = self.store.retrieve_remote(&self.id, Some(tier), cancel).await?;
        self.install(
            record,
            TierSet::empty().with(tier).with(Tier::Remote),
            true,
        );
        Self::fire(ready.as_ref());
        Ok(())
    }

    async fn save(&self, tier: LocalTier) -> Result<(), SyncError> {
        let (record, version) = self.snapshot()?;
        let unsynced = version != self.remote_version.load(Ordering::Acquire);
        self.store.save_local(&self.id, tier, &record, unsynced).await?;
        self.tiers.lock().insert(tier);
        Ok(())
    }

    async fn save_to_local_and_remote(&self, tier: LocalTier) -> Result<(), SyncError> {
        let cancel = self.save_gate.scope();
        let (record, version) = self.snapshot()?;
        let modified = version != self.remote_version.load(Ordering::Acquire);
        self.store.save_local(&self.id, tier, &record, modified).await?;
        self.tiers.lock().insert(tier);

        let outcome = self
            .store
            .save_remote(&self.id, &record, modified, cancel)
            .await?;
        if outcome == SaveOutcome::Uploaded {
            debug!(kind = T::KIND, id = %self.id, "uploaded");
        }
        self.remote_version.store(version, Ordering::Release);
        // clear the local marker unless an edit landed during the upload
        if modified && self.version.load(Ordering::Acquire) == version {
            self.store.save_local(&self.id, tier, &record, false).await?;
        }
        self.tiers.lock().insert(Tier::Remote);
        Ok(())
    }

    async fn delete(&self, tier: LocalTier) -> Result<(), SyncError> {
        self.store.delete_local(&self.id, tier).await?;
        self.tiers.lock().remove(tier);
        Ok(())
    }

    async fn delete_from_local_and_remote(&self) -> Result<(), SyncError> {
        let cancel = self.save_gate.scope();
        let remote = self.store.delete_remote(&self.id, cancel).await;
        if remote.is_ok() {
            self.tiers.lock().remove(Tier::Remote);
            self.remote_version.store(0, Ordering::Release);
        }

        let draft = self.delete(LocalTier::Draft).await;
        let cache = self.delete(LocalTier::Cache).await;
        remote.map(|_| ()).and(draft).and(cache)
    }
}
