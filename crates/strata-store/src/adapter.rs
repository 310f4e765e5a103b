//! Tiered store adapter
//!
//! Backends implement two narrow traits:
//! - `LocalStore` for the on-device cache and draft tiers
//! - `RemoteStore` for the authoritative remote store, plus an existence probe
//!
//! `TieredStore` wraps one of each for a record kind and adds the policy the
//! engine relies on: bounded retry per tier, copy-down to the local cache
//! after a remote fetch, existence probes that turn repeat saves and deletes
//! into no-ops, idempotent local deletes, and cancellation of in-flight
//! remote verbs.

use crate::cancel::CancelScope;
use crate::error::{StoreError, SyncError};
use crate::ids::EntityId;
use crate::retry::{self, RetryPolicy};
use crate::scheduler::Scheduler;
use crate::tier::{Existence, LocalTier};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A persistable payload
pub trait Record:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Namespace the record is stored under
    const KIND: &'static str;
}

/// A record as kept on device.
///
/// `unsynced` survives a reload, so an edit checkpointed locally is still
/// uploaded by a later remote save even though the remote holds a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalCopy<T> {
    /// Payload
    pub record: T,
    /// Holds changes the remote has not seen
    #[serde(default)]
    pub unsynced: bool,
}

impl<T> LocalCopy<T> {
    /// Copy that matches what the remote holds
    #[inline]
    pub fn synced(record: T) -> Self {
        Self {
            record,
            unsynced: false,
        }
    }

    /// Copy carrying edits not yet uploaded
    #[inline]
    pub fn unsynced(record: T) -> Self {
        Self {
            record,
            unsynced: true,
        }
    }
}

/// On-device storage for one record kind
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LocalStore<T: Record>: Send + Sync {
    /// Load a record; `StoreError::NotFound` on a miss
    async fn load(&self, tier: LocalTier, id: &EntityId) -> Result<LocalCopy<T>, StoreError>;

    /// Write a record, replacing any previous copy
    async fn store(&self, tier: LocalTier, id: &EntityId, copy: &LocalCopy<T>) -> Result<(), StoreError>;

    /// Remove a record
    async fn remove(&self, tier: LocalTier, id: &EntityId) -> Result<(), StoreError>;

    /// Remove every record of this kind from a tier
    async fn purge(&self, tier: LocalTier) -> Result<(), StoreError>;
}

/// Remote authoritative storage for one record kind
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore<T: Record>: Send + Sync {
    /// Download a record
    async fn fetch(&self, id: &EntityId) -> Result<T, StoreError>;

    /// Upload a record
    async fn upload(&self, id: &EntityId, record: &T) -> Result<(), StoreError>;

    /// Delete a record
    async fn remove(&self, id: &EntityId) -> Result<(), StoreError>;

    /// Probe whether the remote holds a record
    async fn exists(&self, id: &EntityId) -> Existence;
}

/// Retry policies per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorePolicy {
    /// Applied to cache and draft verbs
    pub local: RetryPolicy,
    /// Applied to remote verbs
    pub remote: RetryPolicy,
}

impl StorePolicy {
    /// Policy for structured records
    #[must_use]
    pub const fn record() -> Self {
        Self {
            local: RetryPolicy::local(),
            remote: RetryPolicy::record(),
        }
    }

    /// Policy for media files
    #[must_use]
    pub const fn file() -> Self {
        Self {
            local: RetryPolicy::local(),
            remote: RetryPolicy::file(),
        }
    }
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self::record()
    }
}

/// Result of a remote save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Payload was uploaded
    Uploaded,
    /// Remote already held the object; nothing was sent
    AlreadyPresent,
}

/// Result of a remote delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Remote object was removed
    Deleted,
    /// Remote never held the object
    AlreadyAbsent,
}

/// Local and remote backends for one record kind, with retry policy applied
pub struct TieredStore<T: Record> {
    local: Arc<dyn LocalStore<T>>,
    remote: Arc<dyn RemoteStore<T>>,
    policy: StorePolicy,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Record> fmt::Debug for TieredStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TieredStore")
            .field("kind", &T::KIND)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T: Record> TieredStore<T> {
    /// Assemble a store from its backends
    #[must_use]
    pub fn new(
        local: Arc<dyn LocalStore<T>>,
        remote: Arc<dyn RemoteStore<T>>,
        policy: StorePolicy,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            local,
            remote,
            policy,
            scheduler,
        }
    }

    /// Record kind this store serves
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        T::KIND
    }

    /// Retry policies in effect
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    fn label(verb: &str, id: &EntityId) -> String {
        format!("{verb} {} {id}", T::KIND)
    }

    /// Load a record from a local tier
    pub async fn retrieve_local(&self, id: &EntityId, tier: LocalTier) -> Result<LocalCopy<T>, SyncError> {
        retry::run(
            &Self::label("load", id),
            &self.policy.local,
            &self.scheduler,
            move |_| self.local.load(tier, id),
        )
        .await
        .map_err(|e| e.into_sync(T::KIND, id))
    }

    /// Fetch a record from the remote, copying it down to `copy_down` on success.
    ///
    /// A failed copy-down is logged and does not fail the fetch.
    pub async fn retrieve_remote(
        &self,
        id: &EntityId,
        copy_down: Option<LocalTier>,
        cancel: CancelScope<'_>,
    ) -> Result<T, SyncError> {
        cancel.check()?;
        let record = cancel
            .guard(retry::run(
                &Self::label("fetch", id),
                &self.policy.remote,
                &self.scheduler,
                move |_| self.remote.fetch(id),
            ))
            .await
            .map_err(|e| e.into_sync(T::KIND, id))?;

        if let Some(tier) = copy_down {
            if let Err(err) = self.save_local(id, tier, &record, false).await {
                warn!(kind = T::KIND, %id, %tier, error = %err, "copy-down after remote fetch failed");
            }
        }
        Ok(record)
    }

    /// Write a record to a local tier; `unsynced` marks edits the remote
    /// has not seen yet
    pub async fn save_local(
        &self,
        id: &EntityId,
        tier: LocalTier,
        record: &T,
        unsynced: bool,
    ) -> Result<(), SyncError> {
        let copy = LocalCopy {
            record: record.clone(),
            unsynced,
        };
        let copy = &copy;
        retry::run(
            &Self::label("store", id),
            &self.policy.local,
            &self.scheduler,
            move |_| self.local.store(tier, id, copy),
        )
        .await
        .map_err(|e| e.into_sync(T::KIND, id))
    }

    /// Upload a record unless the remote already holds an unmodified copy.
    ///
    /// `modified` reports whether the payload changed since it was last in
    /// sync with the remote. An indeterminate probe is treated as absent; a
    /// resulting conflict means the object was there after all.
    pub async fn save_remote(
        &self,
        id: &EntityId,
        record: &T,
        modified: bool,
        cancel: CancelScope<'_>,
    ) -> Result<SaveOutcome, SyncError> {
        cancel.check()?;
        match cancel.guard(self.probe(id)).await? {
            Existence::Present if !modified => {
                debug!(kind = T::KIND, %id, "already on remote, skipping upload");
                return Ok(SaveOutcome::AlreadyPresent);
            }
            Existence::Indeterminate => {
                debug!(kind = T::KIND, %id, "existence indeterminate, uploading");
            }
            _ => {}
        }

        let uploaded = cancel
            .guard(retry::run(
                &Self::label("upload", id),
                &self.policy.remote,
                &self.scheduler,
                move |_| self.remote.upload(id, record),
            ))
            .await;
        match uploaded {
            Ok(()) => Ok(SaveOutcome::Uploaded),
            Err(StoreError::Conflict) => {
                debug!(kind = T::KIND, %id, "upload conflicted, object already on remote");
                Ok(SaveOutcome::AlreadyPresent)
            }
            Err(err) => Err(err.into_sync(T::KIND, id)),
        }
    }

    /// Remove a record from a local tier; absence is success
    pub async fn delete_local(&self, id: &EntityId, tier: LocalTier) -> Result<(), SyncError> {
        let removed = retry::run(
            &Self::label("remove", id),
            &self.policy.local,
            &self.scheduler,
            move |_| self.local.remove(tier, id),
        )
        .await;
        match removed {
            Ok(()) | Err(StoreError::NotFound) => Ok(()),
            Err(err) => Err(err.into_sync(T::KIND, id)),
        }
    }

    /// Remove a record from the remote; absence is success with no retries
    pub async fn delete_remote(
        &self,
        id: &EntityId,
        cancel: CancelScope<'_>,
    ) -> Result<DeleteOutcome, SyncError> {
        cancel.check()?;
        if cancel.guard(self.probe(id)).await? == Existence::Absent {
            debug!(kind = T::KIND, %id, "not on remote, nothing to delete");
            return Ok(DeleteOutcome::AlreadyAbsent);
        }

        let removed = cancel
            .guard(retry::run(
                &Self::label("delete", id),
                &self.policy.remote,
                &self.scheduler,
                move |_| self.remote.remove(id),
            ))
            .await;
        match removed {
            Ok(()) => Ok(DeleteOutcome::Deleted),
            Err(StoreError::NotFound) => Ok(DeleteOutcome::AlreadyAbsent),
            Err(err) => Err(err.into_sync(T::KIND, id)),
        }
    }

    /// Clear every record of this kind from a local tier
    pub async fn purge(&self, tier: LocalTier) -> Result<(), SyncError> {
        debug!(kind = T::KIND, %tier, "purging local tier");
        self.local.purge(tier).await.map_err(SyncError::from)
    }

    async fn probe(&self, id: &EntityId) -> Result<Existence, StoreError> {
        Ok(self.remote.exists(id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelGate;
    use crate::memory::MemoryLocalStore;
    use crate::scheduler::{Priority, TokioScheduler};
    use mockall::predicate::eq;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    impl Record for Note {
        const KIND: &'static str = "note";
    }

    fn fast_policy() -> StorePolicy {
        StorePolicy {
            local: RetryPolicy::once(),
            remote: RetryPolicy::new(3, 0, Priority::Utility),
        }
    }

    fn store_with(remote: MockRemoteStore<Note>) -> (TieredStore<Note>, Arc<MemoryLocalStore<Note>>) {
        let local = Arc::new(MemoryLocalStore::<Note>::new());
        let store = TieredStore::new(
            Arc::clone(&local) as Arc<dyn LocalStore<Note>>,
            Arc::new(remote),
            fast_policy(),
            Arc::new(TokioScheduler),
        );
        (store, local)
    }

    #[tokio::test]
    async fn present_unmodified_save_uploads_nothing() {
        let id = EntityId::new("n1");
        let mut remote = MockRemoteStore::<Note>::new();
        remote
            .expect_exists()
            .with(eq(id.clone()))
            .times(1)
            .returning(|_| Existence::Present);
        remote.expect_upload().never();
        let (store, _) = store_with(remote);

        let gate = CancelGate::new();
        let note = Note { text: "hi".into() };
        let outcome = store.save_remote(&id, &note, false, gate.scope()).await;
        assert_eq!(outcome, Ok(SaveOutcome::AlreadyPresent));
    }

    #[tokio::test]
    async fn modified_payload_is_uploaded_even_when_present() {
        let id = EntityId::new("n2");
        let mut remote = MockRemoteStore::<Note>::new();
        remote.expect_exists().returning(|_| Existence::Present);
        remote.expect_upload().times(1).returning(|_, _| Ok(()));
        let (store, _) = store_with(remote);

        let gate = CancelGate::new();
        let note = Note { text: "edited".into() };
        let outcome = store.save_remote(&id, &note, true, gate.scope()).await;
        assert_eq!(outcome, Ok(SaveOutcome::Uploaded));
    }

    #[tokio::test]
    async fn indeterminate_probe_attempts_upload_and_absorbs_conflict() {
        let id = EntityId::new("n3");
        let mut remote = MockRemoteStore::<Note>::new();
        remote.expect_exists().returning(|_| Existence::Indeterminate);
        remote
            .expect_upload()
            .times(1)
            .returning(|_, _| Err(StoreError::Conflict));
        let (store, _) = store_with(remote);

        let gate = CancelGate::new();
        let note = Note { text: "x".into() };
        let outcome = store.save_remote(&id, &note, false, gate.scope()).await;
        assert_eq!(outcome, Ok(SaveOutcome::AlreadyPresent));
    }

    #[tokio::test]
    async fn absent_remote_delete_is_a_no_op() {
        let id = EntityId::new("gone");
        let mut remote = MockRemoteStore::<Note>::new();
        remote.expect_exists().times(1).returning(|_| Existence::Absent);
        remote.expect_remove().never();
        let (store, _) = store_with(remote);

        let gate = CancelGate::new();
        let outcome = store.delete_remote(&id, gate.scope()).await;
        assert_eq!(outcome, Ok(DeleteOutcome::AlreadyAbsent));
    }

    #[tokio::test]
    async fn remote_fetch_copies_down_before_returning() {
        let id = EntityId::new("n4");
        let mut remote = MockRemoteStore::<Note>::new();
        remote.expect_fetch().times(1).returning(|_| {
            Ok(Note {
                text: "remote".into(),
            })
        });
        let (store, local) = store_with(remote);

        let gate = CancelGate::new();
        let fetched = store
            .retrieve_remote(&id, Some(LocalTier::Cache), gate.scope())
            .await
            .unwrap();
        assert_eq!(fetched.text, "remote");
        assert_eq!(
            local.load(LocalTier::Cache, &id).await.unwrap(),
            LocalCopy::synced(fetched)
        );
    }

    #[tokio::test]
    async fn remote_fetch_retries_transient_failures_up_to_ceiling() {
        let id = EntityId::new("n5");
        let mut remote = MockRemoteStore::<Note>::new();
        remote.expect_fetch().times(3).returning(|_| {
            Err(StoreError::Http {
                status: 503,
                message: "unavailable".into(),
            })
        });
        let (store, _) = store_with(remote);

        let gate = CancelGate::new();
        let err = store.retrieve_remote(&id, None, gate.scope()).await.unwrap_err();
        assert!(matches!(err, SyncError::TransientIo(_)));
    }

    #[tokio::test]
    async fn remote_not_found_is_not_retried() {
        let id = EntityId::new("n6");
        let mut remote = MockRemoteStore::<Note>::new();
        remote
            .expect_fetch()
            .times(1)
            .returning(|_| Err(StoreError::NotFound));
        let (store, _) = store_with(remote);

        let gate = CancelGate::new();
        let err = store.retrieve_remote(&id, None, gate.scope()).await.unwrap_err();
        assert_eq!(err, SyncError::not_found("note", "n6"));
    }

    #[tokio::test]
    async fn cancelled_scope_starts_no_remote_work() {
        let id = EntityId::new("n7");
        let mut remote = MockRemoteStore::<Note>::new();
        remote.expect_fetch().never();
        let (store, _) = store_with(remote);

        let gate = CancelGate::new();
        let scope = gate.scope();
        gate.cancel();
        let err = store.retrieve_remote(&id, None, scope).await.unwrap_err();
        assert_eq!(err, SyncError::Cancelled);
    }

    #[tokio::test]
    async fn unsynced_marker_survives_a_reload() {
        let remote = MockRemoteStore::<Note>::new();
        let (store, _) = store_with(remote);
        let id = EntityId::new("n8");
        let note = Note { text: "edit".into() };

        store.save_local(&id, LocalTier::Draft, &note, true).await.unwrap();
        let copy = store.retrieve_local(&id, LocalTier::Draft).await.unwrap();
        assert_eq!(copy, LocalCopy::unsynced(note.clone()));

        store.save_local(&id, LocalTier::Draft, &note, false).await.unwrap();
        assert!(!store.retrieve_local(&id, LocalTier::Draft).await.unwrap().unsynced);
    }

    #[tokio::test]
    async fn local_delete_of_missing_record_succeeds() {
        let remote = MockRemoteStore::<Note>::new();
        let (store, _) = store_with(remote);
        assert_eq!(store.delete_local(&EntityId::new("none"), LocalTier::Draft).await, Ok(()));
    }
}
