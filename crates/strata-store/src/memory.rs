//! In-memory backends
//!
//! DashMap-backed local and remote stores. Used by the simulator and as the
//! default backend in tests; the remote variant counts uploaded bytes so
//! callers can observe skipped uploads.

use crate::adapter::{LocalCopy, LocalStore, Record, RemoteStore};
use crate::error::StoreError;
use crate::ids::EntityId;
use crate::tier::{Existence, LocalTier};
use async_trait::async_trait;
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// Local tiers held in a concurrent map, keyed by tier and id
#[derive(Debug)]
pub struct MemoryLocalStore<T> {
    records: DashMap<(LocalTier, EntityId), LocalCopy<T>>,
}

impl<T: Record> MemoryLocalStore<T> {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Number of records held in a tier
    #[must_use]
    pub fn len(&self, tier: LocalTier) -> usize {
        self.records.iter().filter(|e| e.key().0 == tier).count()
    }

    /// Check whether a record is held in a tier
    #[must_use]
    pub fn contains(&self, tier: LocalTier, id: &EntityId) -> bool {
        self.records.contains_key(&(tier, id.clone()))
    }

    /// Copy of a record held in a tier
    #[must_use]
    pub fn get(&self, tier: LocalTier, id: &EntityId) -> Option<LocalCopy<T>> {
        self.records.get(&(tier, id.clone())).map(|e| e.value().clone())
    }
}

impl<T: Record> Default for MemoryLocalStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> LocalStore<T> for MemoryLocalStore<T> {
    async fn load(&self, tier: LocalTier, id: &EntityId) -> Result<LocalCopy<T>, StoreError> {
        self.records
            .get(&(tier, id.clone()))
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn store(&self, tier: LocalTier, id: &EntityId, copy: &LocalCopy<T>) -> Result<(), StoreError> {
        self.records.insert((tier, id.clone()), copy.clone());
        Ok(())
    }

    async fn remove(&self, tier: LocalTier, id: &EntityId) -> Result<(), StoreError> {
        self.records
            .remove(&(tier, id.clone()))
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn purge(&self, tier: LocalTier) -> Result<(), StoreError> {
        self.records.retain(|(t, _), _| *t != tier);
        Ok(())
    }
}

/// Remote store held in a concurrent map
#[derive(Debug)]
pub struct MemoryRemoteStore<T> {
    records: DashMap<EntityId, T>,
    uploaded_bytes: AtomicU64,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Record> MemoryRemoteStore<T> {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            uploaded_bytes: AtomicU64::new(0),
            _kind: PhantomData,
        }
    }

    /// Seed a record without counting it as an upload
    pub fn seed(&self, id: EntityId, record: T) {
        self.records.insert(id, record);
    }

    /// Check whether a record is held
    #[must_use]
    pub fn contains(&self, id: &EntityId) -> bool {
        self.records.contains_key(id)
    }

    /// Copy of a held record
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<T> {
        self.records.get(id).map(|e| e.value().clone())
    }

    /// Number of records held
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total serialized bytes received through `upload`
    #[must_use]
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded_bytes.load(Ordering::Relaxed)
    }
}

impl<T: Record> Default for MemoryRemoteStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Record> RemoteStore<T> for MemoryRemoteStore<T> {
    async fn fetch(&self, id: &EntityId) -> Result<T, StoreError> {
        self.records
            .get(id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn upload(&self, id: &EntityId, record: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        self.uploaded_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.records.insert(id.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: &EntityId) -> Result<(), StoreError> {
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn exists(&self, id: &EntityId) -> Existence {
        if self.records.contains_key(id) {
            Existence::Present
        } else {
            Existence::Absent
        }
    }
}
