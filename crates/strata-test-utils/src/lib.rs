//! Testing utilities for the Strata workspace
//!
//! Shared backends, schedulers and fixtures.

#![allow(missing_docs)]

mod remote;

pub use remote::{FaultPlan, RemoteCall, RemoteVerb, ScriptedRemote};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strata_graph::{
    Backends, Markup, Media, MediaKind, Moment, Story, SyncConfig, SyncContext, User, UserRecord,
    Venue, VenueRecord,
};
use strata_store::{LocalStore, MemoryLocalStore, Priority, Record, RemoteStore, RetryPolicy, Scheduler};

type AnyStore = Arc<dyn Any + Send + Sync>;

/// In-memory local tiers and scripted remotes sharing one fault plan.
///
/// Every store handed out is remembered so tests can seed and inspect it.
#[derive(Debug, Default)]
pub struct ScriptedBackends {
    faults: Arc<FaultPlan>,
    locals: Mutex<HashMap<TypeId, AnyStore>>,
    remotes: Mutex<HashMap<TypeId, AnyStore>>,
}

impl ScriptedBackends {
    pub fn new(faults: Arc<FaultPlan>) -> Self {
        Self {
            faults,
            locals: Mutex::new(HashMap::new()),
            remotes: Mutex::new(HashMap::new()),
        }
    }

    pub fn faults(&self) -> &Arc<FaultPlan> {
        &self.faults
    }

    pub fn local_store<T: Record>(&self) -> Option<Arc<MemoryLocalStore<T>>> {
        let any = self.locals.lock().get(&TypeId::of::<T>()).cloned()?;
        any.downcast::<MemoryLocalStore<T>>().ok()
    }

    pub fn remote_store<T: Record>(&self) -> Option<Arc<ScriptedRemote<T>>> {
        let any = self.remotes.lock().get(&TypeId::of::<T>()).cloned()?;
        any.downcast::<ScriptedRemote<T>>().ok()
    }
}

impl Backends for ScriptedBackends {
    fn local<T: Record>(&self) -> Arc<dyn LocalStore<T>> {
        let store = Arc::new(MemoryLocalStore::<T>::new());
        self.locals
            .lock()
            .insert(TypeId::of::<T>(), Arc::clone(&store) as AnyStore);
        store
    }

    fn remote<T: Record>(&self) -> Arc<dyn RemoteStore<T>> {
        let store = Arc::new(ScriptedRemote::<T>::new(Arc::clone(&self.faults)));
        self.remotes
            .lock()
            .insert(TypeId::of::<T>(), Arc::clone(&store) as AnyStore);
        store
    }
}

/// Scheduler that records every deferral and never sleeps
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<(Duration, Priority)>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(Duration, Priority)> {
        self.calls.lock().clone()
    }

    /// Deferrals that waited, i.e. retries
    pub fn retries(&self) -> usize {
        self.calls.lock().iter().filter(|(d, _)| !d.is_zero()).count()
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn after(&self, delay: Duration, priority: Priority) {
        self.calls.lock().push((delay, priority));
        tokio::task::yield_now().await;
    }
}

/// Configuration with short retry delays so tests run fast
pub fn fast_config() -> SyncConfig {
    let delay = Duration::from_millis(1);
    SyncConfig::default()
        .with_record_retry(RetryPolicy::record().with_delay(delay))
        .with_file_retry(RetryPolicy::file().with_delay(delay))
        .with_local_retry(RetryPolicy::local())
}

/// A context over scripted backends
#[derive(Debug)]
pub struct Harness {
    pub backends: ScriptedBackends,
    pub scheduler: Arc<RecordingScheduler>,
    pub context: Arc<SyncContext>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_faults(config, Arc::new(FaultPlan::new()))
    }

    pub fn with_faults(config: SyncConfig, faults: Arc<FaultPlan>) -> Self {
        let backends = ScriptedBackends::new(faults);
        let scheduler = Arc::new(RecordingScheduler::new());
        let context = SyncContext::new(config, &backends, Arc::clone(&scheduler) as Arc<dyn Scheduler>);
        Self {
            backends,
            scheduler,
            context,
        }
    }

    pub fn faults(&self) -> &Arc<FaultPlan> {
        self.backends.faults()
    }

    pub fn remote<T: Record>(&self) -> Arc<ScriptedRemote<T>> {
        self.backends
            .remote_store::<T>()
            .expect("every record kind has a remote")
    }

    pub fn local<T: Record>(&self) -> Arc<MemoryLocalStore<T>> {
        self.backends
            .local_store::<T>()
            .expect("every record kind has a local store")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Photo moment named `name` with a derived thumbnail
pub fn photo_moment(context: &Arc<SyncContext>, name: &str) -> Arc<Moment> {
    media_moment(context, name, MediaKind::Photo)
}

pub fn media_moment(context: &Arc<SyncContext>, name: &str, kind: MediaKind) -> Arc<Moment> {
    let media = Media::with_file_name(
        context,
        format!("{name}.{}", kind.extension()),
        kind,
        name.as_bytes().to_vec(),
    );
    let thumbnail = Media::with_file_name(
        context,
        Media::thumbnail_file_name(media.file_name()),
        MediaKind::Photo,
        vec![0xff, 0xd8],
    );
    Moment::create(context, media, thumbnail)
}

/// Story with `moments` photo moments, a venue, an author and one markup
/// on the first moment
pub fn story_tree(context: &Arc<SyncContext>, title: &str, moments: usize) -> Arc<Story> {
    let story = Story::create(context, title);
    for i in 0..moments {
        let moment = photo_moment(context, &format!("{title}-{i}"));
        if i == 0 {
            moment
                .add_markup(Markup::create(
                    context,
                    serde_json::json!({ "sticker": "star" }),
                    Some("star".into()),
                ))
                .expect("new moment is resident");
            story
                .set_thumbnail(moment.thumbnail().expect("new moment has a thumbnail"))
                .expect("new story is resident");
        }
        story.add_moment(moment).expect("new story is resident");
    }
    story
        .set_venue(Some(Venue::create(context, VenueRecord::named(format!("{title} venue")))))
        .expect("new story is resident");
    story
        .set_author(Some(User::create(context, UserRecord::named("author"))))
        .expect("new story is resident");
    story
}
