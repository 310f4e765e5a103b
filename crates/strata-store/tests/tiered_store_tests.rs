//! Tiered store behaviour against a scripted remote

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use strata_store::prelude::*;
use strata_store::{DeleteOutcome, SaveOutcome, Scheduler, StoreError, TransportErrorKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Place {
    name: String,
}

impl Record for Place {
    const KIND: &'static str = "place";
}

/// Remote whose next failures are scripted; every call is logged
#[derive(Default)]
struct FlakyRemote {
    inner: MemoryRemoteStore<Place>,
    failures: Mutex<VecDeque<StoreError>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FlakyRemote {
    fn failing(errors: impl IntoIterator<Item = StoreError>) -> Arc<Self> {
        let remote = Self::default();
        remote.failures.lock().extend(errors);
        Arc::new(remote)
    }

    fn enter(&self, verb: &'static str) -> Result<(), StoreError> {
        self.calls.lock().push(verb);
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteStore<Place> for FlakyRemote {
    async fn fetch(&self, id: &EntityId) -> Result<Place, StoreError> {
        self.enter("fetch")?;
        self.inner.fetch(id).await
    }

    async fn upload(&self, id: &EntityId, record: &Place) -> Result<(), StoreError> {
        self.enter("upload")?;
        self.inner.upload(id, record).await
    }

    async fn remove(&self, id: &EntityId) -> Result<(), StoreError> {
        self.enter("remove")?;
        self.inner.remove(id).await
    }

    async fn exists(&self, id: &EntityId) -> Existence {
        self.calls.lock().push("exists");
        self.inner.exists(id).await
    }
}

fn policy() -> StorePolicy {
    StorePolicy {
        local: RetryPolicy::local(),
        remote: RetryPolicy::record().with_delay(Duration::from_millis(1)),
    }
}

fn store(remote: &Arc<FlakyRemote>) -> (Arc<MemoryLocalStore<Place>>, TieredStore<Place>) {
    let local = Arc::new(MemoryLocalStore::new());
    let store = TieredStore::new(
        Arc::clone(&local) as Arc<dyn LocalStore<Place>>,
        Arc::clone(remote) as Arc<dyn RemoteStore<Place>>,
        policy(),
        Arc::new(TokioScheduler) as Arc<dyn Scheduler>,
    );
    (local, store)
}

fn unavailable() -> StoreError {
    StoreError::Http {
        status: 503,
        message: "unavailable".into(),
    }
}

#[tokio::test]
async fn transient_failures_stop_at_the_ceiling() {
    let remote = FlakyRemote::failing(std::iter::repeat_with(unavailable).take(10));
    let (_, store) = store(&remote);
    let gate = CancelGate::new();

    let err = store
        .retrieve_remote(&EntityId::new("p1"), None, gate.scope())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::TransientIo(_)));
    assert_eq!(remote.calls().len(), 5);
}

#[tokio::test]
async fn terminal_status_is_not_retried() {
    let remote = FlakyRemote::failing([StoreError::Http {
        status: 403,
        message: "forbidden".into(),
    }]);
    let (_, store) = store(&remote);
    let gate = CancelGate::new();

    let err = store
        .retrieve_remote(&EntityId::new("p1"), None, gate.scope())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::PermanentValidation(_)));
    assert_eq!(remote.calls(), vec!["fetch"]);
}

#[tokio::test]
async fn remote_404_surfaces_as_not_found() {
    let remote = FlakyRemote::failing([StoreError::Http {
        status: 404,
        message: "no such key".into(),
    }]);
    let (local, store) = store(&remote);
    let gate = CancelGate::new();
    let id = EntityId::new("p404");

    let err = store
        .retrieve_remote(&id, Some(LocalTier::Cache), gate.scope())
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::not_found("place", "p404"));
    assert_eq!(remote.calls(), vec!["fetch"]);
    assert!(!local.contains(LocalTier::Cache, &id));
}

#[tokio::test]
async fn recovers_after_transient_failure_and_copies_down() {
    let remote = FlakyRemote::failing([StoreError::Transport(TransportErrorKind::NetworkConnectionLost)]);
    let id = EntityId::new("p2");
    remote.inner.seed(id.clone(), Place { name: "Harbor".into() });
    let (local, store) = store(&remote);
    let gate = CancelGate::new();

    let place = store
        .retrieve_remote(&id, Some(LocalTier::Cache), gate.scope())
        .await
        .unwrap();

    assert_eq!(place.name, "Harbor");
    assert_eq!(remote.calls(), vec!["fetch", "fetch"]);
    assert!(local.contains(LocalTier::Cache, &id));
    assert!(!local.contains(LocalTier::Draft, &id));
}

#[tokio::test]
async fn cancelled_scope_makes_no_remote_call() {
    let remote = FlakyRemote::failing([]);
    let (_, store) = store(&remote);
    let gate = CancelGate::new();
    let scope = gate.scope();
    gate.cancel();

    let err = store
        .save_remote(&EntityId::new("p3"), &Place { name: "x".into() }, true, scope)
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::Cancelled);
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn delete_and_save_are_idempotent_on_the_remote() {
    let remote = FlakyRemote::failing([]);
    let (_, store) = store(&remote);
    let gate = CancelGate::new();
    let id = EntityId::new("p4");
    let place = Place { name: "Pier".into() };

    assert_eq!(
        store.delete_remote(&id, gate.scope()).await.unwrap(),
        DeleteOutcome::AlreadyAbsent
    );
    assert_eq!(
        store.save_remote(&id, &place, true, gate.scope()).await.unwrap(),
        SaveOutcome::Uploaded
    );
    assert_eq!(
        store.save_remote(&id, &place, false, gate.scope()).await.unwrap(),
        SaveOutcome::AlreadyPresent
    );
    assert_eq!(
        store.delete_remote(&id, gate.scope()).await.unwrap(),
        DeleteOutcome::Deleted
    );

    assert_eq!(
        remote.calls(),
        vec!["exists", "exists", "upload", "exists", "exists", "remove"]
    );
}

#[tokio::test]
async fn upload_conflict_counts_as_present() {
    let remote = FlakyRemote::failing([StoreError::Conflict]);
    let (_, store) = store(&remote);
    let gate = CancelGate::new();

    let outcome = store
        .save_remote(&EntityId::new("p5"), &Place { name: "y".into() }, true, gate.scope())
        .await
        .unwrap();
    assert_eq!(outcome, SaveOutcome::AlreadyPresent);
}

#[tokio::test]
async fn copy_down_lands_on_disk_and_local_deletes_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let remote = FlakyRemote::failing([]);
    let id = EntityId::new("p6");
    remote.inner.seed(id.clone(), Place { name: "Dock".into() });

    let on_disk = || {
        TieredStore::new(
            Arc::new(FsLocalStore::<Place>::new(dir.path())) as Arc<dyn LocalStore<Place>>,
            Arc::clone(&remote) as Arc<dyn RemoteStore<Place>>,
            policy(),
            Arc::new(TokioScheduler) as Arc<dyn Scheduler>,
        )
    };
    let gate = CancelGate::new();

    on_disk()
        .retrieve_remote(&id, Some(LocalTier::Cache), gate.scope())
        .await
        .unwrap();
    assert!(dir.path().join("cache/place/p6.json").exists());

    let reopened = on_disk();
    assert_eq!(
        reopened.retrieve_local(&id, LocalTier::Cache).await.unwrap().record.name,
        "Dock"
    );
    assert_eq!(
        reopened.retrieve_local(&id, LocalTier::Draft).await.unwrap_err(),
        SyncError::not_found("place", "p6")
    );

    reopened.delete_local(&id, LocalTier::Cache).await.unwrap();
    reopened.delete_local(&id, LocalTier::Cache).await.unwrap();
    assert!(!dir.path().join("cache/place/p6.json").exists());
    assert_eq!(remote.calls(), vec!["fetch"]);
}
