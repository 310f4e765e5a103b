//! Sync context
//!
//! The composition root: configuration, one tiered store per record kind,
//! the scheduler, and the signed-in user. Entities hold an `Arc` to it
//! instead of reaching for process-wide globals.

use crate::config::SyncConfig;
use crate::entities::{MarkupRecord, MediaRecord, MomentRecord, StoryRecord, UserRecord, VenueRecord};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use strata_store::{
    EntityId, FsLocalStore, LocalStore, LocalTier, MemoryLocalStore, MemoryRemoteStore, Record,
    RemoteStore, Scheduler, StorePolicy, SyncError, TieredStore, TokioScheduler,
};

/// Factory for the local and remote backend of each record kind
pub trait Backends {
    /// Local backend for `T`
    fn local<T: Record>(&self) -> Arc<dyn LocalStore<T>>;

    /// Remote backend for `T`
    fn remote<T: Record>(&self) -> Arc<dyn RemoteStore<T>>;
}

/// Everything in memory
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackends;

impl Backends for MemoryBackends {
    fn local<T: Record>(&self) -> Arc<dyn LocalStore<T>> {
        Arc::new(MemoryLocalStore::<T>::new())
    }

    fn remote<T: Record>(&self) -> Arc<dyn RemoteStore<T>> {
        Arc::new(MemoryRemoteStore::<T>::new())
    }
}

/// Local tiers on disk under `root`, remote in memory
#[derive(Debug, Clone)]
pub struct DiskBackends {
    root: PathBuf,
}

impl DiskBackends {
    /// Persist local tiers under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Backends for DiskBackends {
    fn local<T: Record>(&self) -> Arc<dyn LocalStore<T>> {
        Arc::new(FsLocalStore::<T>::new(self.root.clone()))
    }

    fn remote<T: Record>(&self) -> Arc<dyn RemoteStore<T>> {
        Arc::new(MemoryRemoteStore::<T>::new())
    }
}

/// One tiered store per record kind
#[derive(Debug, Clone)]
pub struct Stores {
    /// Stories
    pub stories: Arc<TieredStore<StoryRecord>>,
    /// Moments
    pub moments: Arc<TieredStore<MomentRecord>>,
    /// Photo and video files
    pub media: Arc<TieredStore<MediaRecord>>,
    /// Markup overlays
    pub markups: Arc<TieredStore<MarkupRecord>>,
    /// Venues
    pub venues: Arc<TieredStore<VenueRecord>>,
    /// Users
    pub users: Arc<TieredStore<UserRecord>>,
}

impl Stores {
    /// Build every store from `backends`
    pub fn build(backends: &impl Backends, config: &SyncConfig, scheduler: &Arc<dyn Scheduler>) -> Self {
        fn one<T: Record>(
            backends: &impl Backends,
            policy: StorePolicy,
            scheduler: &Arc<dyn Scheduler>,
        ) -> Arc<TieredStore<T>> {
            Arc::new(TieredStore::new(
                backends.local::<T>(),
                backends.remote::<T>(),
                policy,
                Arc::clone(scheduler),
            ))
        }

        let records = config.record_policy();
        Self {
            stories: one(backends, records, scheduler),
            moments: one(backends, records, scheduler),
            media: one(backends, config.file_policy(), scheduler),
            markups: one(backends, records, scheduler),
            venues: one(backends, records, scheduler),
            users: one(backends, records, scheduler),
        }
    }

    /// Clear one local tier for every record kind
    pub async fn purge(&self, tier: LocalTier) -> Result<(), SyncError> {
        self.stories.purge(tier).await?;
        self.moments.purge(tier).await?;
        self.media.purge(tier).await?;
        self.markups.purge(tier).await?;
        self.venues.purge(tier).await?;
        self.users.purge(tier).await
    }
}

/// Composition root shared by every entity
#[derive(Debug)]
pub struct SyncContext {
    config: SyncConfig,
    stores: Stores,
    scheduler: Arc<dyn Scheduler>,
    current_user: RwLock<Option<EntityId>>,
}

impl SyncContext {
    /// Assemble a context
    pub fn new(config: SyncConfig, backends: &impl Backends, scheduler: Arc<dyn Scheduler>) -> Arc<Self> {
        let stores = Stores::build(backends, &config, &scheduler);
        Arc::new(Self {
            config,
            stores,
            scheduler,
            current_user: RwLock::new(None),
        })
    }

    /// In-memory backends on the tokio timer
    pub fn in_memory(config: SyncConfig) -> Arc<Self> {
        Self::new(config, &MemoryBackends, Arc::new(TokioScheduler))
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Stores
    #[inline]
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Scheduler
    #[inline]
    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Signed-in user
    #[must_use]
    pub fn current_user(&self) -> Option<EntityId> {
        self.current_user.read().clone()
    }

    /// Sign a user in or out
    pub fn set_current_user(&self, user: Option<EntityId>) {
        *self.current_user.write() = user;
    }

    /// Whether `id` is the signed-in user
    #[must_use]
    pub fn is_current_user(&self, id: &EntityId) -> bool {
        self.current_user.read().as_ref() == Some(id)
    }
}
