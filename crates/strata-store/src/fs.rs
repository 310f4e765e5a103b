//! Filesystem local backend
//!
//! Records are JSON files laid out as `<root>/<tier>/<kind>/<id>.json`.
//! Writes go through a temporary file and a rename so a crash never leaves
//! a half-written record behind.

use crate::adapter::{LocalCopy, LocalStore, Record};
use crate::error::StoreError;
use crate::ids::EntityId;
use crate::tier::LocalTier;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Local tiers persisted as JSON files under a root directory
#[derive(Debug, Clone)]
pub struct FsLocalStore<T> {
    root: PathBuf,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Record> FsLocalStore<T> {
    /// Create a store rooted at `root`; directories are created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            _kind: PhantomData,
        }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tier_dir(&self, tier: LocalTier) -> PathBuf {
        self.root.join(tier.as_str()).join(T::KIND)
    }

    fn record_path(&self, tier: LocalTier, id: &EntityId) -> Result<PathBuf, StoreError> {
        let key = id.as_str();
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StoreError::Invalid(format!("unsafe record key {key:?}")));
        }
        Ok(self.tier_dir(tier).join(format!("{key}.json")))
    }
}

#[async_trait]
impl<T: Record> LocalStore<T> for FsLocalStore<T> {
    async fn load(&self, tier: LocalTier, id: &EntityId) -> Result<LocalCopy<T>, StoreError> {
        let path = self.record_path(tier, id)?;
        let bytes = tokio::fs::read(&path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn store(&self, tier: LocalTier, id: &EntityId, copy: &LocalCopy<T>) -> Result<(), StoreError> {
        let path = self.record_path(tier, id)?;
        tokio::fs::create_dir_all(self.tier_dir(tier)).await?;

        let bytes = serde_json::to_vec(copy)?;
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &path).await?;
        debug!(kind = T::KIND, %id, %tier, bytes = bytes.len(), "record written");
        Ok(())
    }

    async fn remove(&self, tier: LocalTier, id: &EntityId) -> Result<(), StoreError> {
        let path = self.record_path(tier, id)?;
        tokio::fs::remove_file(&path).await?;
        Ok(())
    }

    async fn purge(&self, tier: LocalTier) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(self.tier_dir(tier)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
