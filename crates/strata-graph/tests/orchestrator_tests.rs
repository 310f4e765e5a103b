//! Recursive save, retrieve and delete over a full story tree

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use strata_graph::prelude::*;
use strata_graph::{
    FanOut, MarkupRecord, MediaRecord, MomentRecord, ReadyHook, RetrieveState, StoredObject, StoryRecord,
    UserRecord, VenueRecord,
};
use strata_store::StoreError;
use strata_test_utils::{story_tree, Harness, RemoteVerb};

fn forbidden() -> StoreError {
    StoreError::Http {
        status: 403,
        message: "forbidden".into(),
    }
}

#[tokio::test]
async fn children_reach_the_remote_before_their_parent() {
    let h = Harness::new();
    let story = story_tree(&h.context, "trip", 2);

    story
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();

    let uploads: Vec<_> = h
        .faults()
        .calls()
        .into_iter()
        .filter(|c| c.verb == RemoteVerb::Upload)
        .collect();
    // two moments with media and thumbnail, one markup, venue, author, story
    assert_eq!(uploads.len(), 10);
    assert_eq!(uploads.last().map(|c| c.kind), Some("story"));
    assert!(h.remote::<StoryRecord>().contains(&story.unique_identifier()));

    let position = |id: EntityId| uploads.iter().position(|c| c.id == id).unwrap();
    for moment in story.moments() {
        let media = moment.media().unwrap();
        assert!(position(media.unique_identifier()) < position(moment.unique_identifier()));
    }
}

#[tokio::test]
async fn unchanged_tree_resaves_without_uploading() {
    let h = Harness::new();
    let story = story_tree(&h.context, "again", 2);
    story
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    h.faults().clear_calls();

    story
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();

    assert_eq!(h.faults().count_verb(RemoteVerb::Upload), 0);
    assert_eq!(h.faults().count_verb(RemoteVerb::Exists), 10);

    story.set_title("renamed").unwrap();
    h.faults().clear_calls();
    story
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    assert_eq!(h.faults().count_verb(RemoteVerb::Upload), 1);
}

#[tokio::test]
async fn failed_child_keeps_parent_off_the_remote() {
    let h = Harness::new();
    let story = story_tree(&h.context, "broken", 2);
    let media = story.moment(1).and_then(|m| m.media()).unwrap();
    h.faults()
        .fail_always(RemoteVerb::Upload, media.unique_identifier(), forbidden());

    let err = story
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::PermanentValidation(_)));
    assert_eq!(h.faults().count(RemoteVerb::Upload, &media.unique_identifier()), 1);
    assert!(!h.remote::<StoryRecord>().contains(&story.unique_identifier()));
    assert!(!h.remote::<MomentRecord>().contains(&story.moment(1).unwrap().unique_identifier()));
    // siblings that succeeded stay saved
    assert!(h.remote::<MomentRecord>().contains(&story.moment(0).unwrap().unique_identifier()));
    assert!(h.remote::<VenueRecord>().contains(&story.venue().unwrap().unique_identifier()));
}

#[tokio::test]
async fn leaf_saves_directly() {
    let h = Harness::new();
    let venue = Venue::create(&h.context, VenueRecord::named("Pier 39"));

    venue
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();

    assert_eq!(h.faults().count_verb(RemoteVerb::Upload), 1);
    assert!(h.remote::<VenueRecord>().contains(&venue.unique_identifier()));
    assert!(h.local::<VenueRecord>().contains(LocalTier::Cache, &venue.unique_identifier()));
}

#[tokio::test]
async fn transient_failures_stop_at_the_configured_ceiling() {
    let h = Harness::new();
    let venue = Venue::create(&h.context, VenueRecord::named("Flaky"));
    h.faults().fail_always(
        RemoteVerb::Upload,
        venue.unique_identifier(),
        StoreError::Http {
            status: 503,
            message: "unavailable".into(),
        },
    );

    let err = venue
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::TransientIo(_)));
    assert_eq!(h.faults().count(RemoteVerb::Upload, &venue.unique_identifier()), 5);
    assert_eq!(h.scheduler.retries(), 4);
    // local write happened before the remote gave up
    assert!(h.local::<VenueRecord>().contains(LocalTier::Cache, &venue.unique_identifier()));
}

#[tokio::test]
async fn cold_retrieve_rebuilds_the_tree_from_the_remote() {
    let h = Harness::new();
    let original = story_tree(&h.context, "cold", 3);
    original
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    h.context.stores().purge(LocalTier::Cache).await.unwrap();

    let story = Story::reference(&h.context, original.unique_identifier());
    story
        .retrieve_recursive(Scope::LocalThenRemote, LocalTier::Cache, false, None)
        .await
        .unwrap();

    assert!(story.is_retrieved());
    assert_eq!(story.retrieve_state(), RetrieveState::Synced);
    assert_eq!(story.title().as_deref(), Some("cold"));
    assert_eq!(story.moments().len(), 3);
    assert_eq!(story.moment(0).unwrap().markups().len(), 1);
    assert_eq!(
        story.thumbnail().map(|t| t.file_name().to_string()),
        original.thumbnail().map(|t| t.file_name().to_string())
    );
    assert_eq!(story.venue().and_then(|v| v.name()).as_deref(), Some("cold venue"));
    assert_eq!(story.author().and_then(|a| a.username()).as_deref(), Some("author"));
    for moment in story.moments() {
        assert!(moment.is_media_ready());
        assert_eq!(moment.retrieve_state(), RetrieveState::Synced);
    }
    // copied down on the way in
    assert!(h.local::<StoryRecord>().contains(LocalTier::Cache, &story.unique_identifier()));
}

#[tokio::test]
async fn local_hits_never_reach_the_remote() {
    let h = Harness::new();
    let original = story_tree(&h.context, "warm", 2);
    original
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    h.faults().clear_calls();

    let story = Story::reference(&h.context, original.unique_identifier());
    story
        .retrieve_recursive(Scope::LocalThenRemote, LocalTier::Cache, false, None)
        .await
        .unwrap();

    assert!(story.is_retrieved());
    assert_eq!(h.faults().count_verb(RemoteVerb::Fetch), 0);
}

#[tokio::test]
async fn local_only_retrieve_does_not_fall_back() {
    let h = Harness::new();
    let original = story_tree(&h.context, "draftless", 1);
    original
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    h.faults().clear_calls();

    let story = Story::reference(&h.context, original.unique_identifier());
    let err = story
        .retrieve_recursive(Scope::LocalOnly, LocalTier::Draft, false, None)
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(story.retrieve_state(), RetrieveState::NotAvailable);
    assert!(h.faults().calls().is_empty());
}

#[tokio::test]
async fn delete_spares_shared_entities_and_repeats_cleanly() {
    let h = Harness::new();
    let story = story_tree(&h.context, "gone", 2);
    story
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    let venue = story.venue().unwrap().unique_identifier();
    let author = story.author().unwrap().unique_identifier();

    story
        .delete_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();

    assert!(h.remote::<StoryRecord>().is_empty());
    assert!(h.remote::<MomentRecord>().is_empty());
    assert!(h.remote::<MediaRecord>().is_empty());
    assert!(h.remote::<MarkupRecord>().is_empty());
    assert!(h.remote::<VenueRecord>().contains(&venue));
    assert!(h.remote::<UserRecord>().contains(&author));
    assert!(!h.local::<VenueRecord>().contains(LocalTier::Cache, &venue));
    assert!(!h.local::<UserRecord>().contains(LocalTier::Cache, &author));

    h.faults().clear_calls();
    story
        .delete_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    assert_eq!(h.faults().count_verb(RemoteVerb::Remove), 0);
}

#[tokio::test]
async fn current_user_survives_story_delete() {
    let h = Harness::new();
    let story = story_tree(&h.context, "mine", 1);
    let author = story.author().unwrap().unique_identifier();
    h.context.set_current_user(Some(author.clone()));
    story
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();

    story
        .delete_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();

    assert!(h.local::<UserRecord>().contains(LocalTier::Cache, &author));
}

#[tokio::test]
async fn deleting_something_never_saved_succeeds() {
    let h = Harness::new();
    let story = Story::reference(&h.context, EntityId::new("never-saved"));

    story
        .delete_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    assert_eq!(h.faults().count_verb(RemoteVerb::Remove), 0);
}

/// Child that finishes after a fixed delay, logging when it does
struct TimedChild {
    venue: Arc<Venue>,
    index: usize,
    latency: Duration,
    fails: bool,
    finished: Arc<Mutex<Vec<usize>>>,
}

impl TimedChild {
    fn error(index: usize) -> SyncError {
        SyncError::TransientIo(format!("child {index} failed"))
    }
}

#[async_trait]
impl EntityNode for TimedChild {
    fn type_name(&self) -> &'static str {
        "TimedChild"
    }

    fn object(&self) -> &dyn StoredObject {
        self.venue.object()
    }

    async fn retrieve_recursive(
        &self,
        _scope: Scope,
        _tier: LocalTier,
        _forced: bool,
        ready: Option<ReadyHook>,
    ) -> Result<(), SyncError> {
        tokio::time::sleep(self.latency).await;
        self.finished.lock().push(self.index);
        if self.fails {
            return Err(Self::error(self.index));
        }
        if let Some(ready) = ready {
            ready.fire();
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fan_out_reports_every_child_and_the_first_failure(
        children in prop::collection::vec((0u64..20, any::<bool>()), 0..8)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        runtime.block_on(async {
            let h = Harness::new();
            let finished = Arc::new(Mutex::new(Vec::new()));
            let fired = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&fired);
            let mut fan = FanOut::new("timed", Some(ReadyHook::new(move || flag.store(true, Ordering::SeqCst))));
            for (index, (millis, fails)) in children.iter().enumerate() {
                let child = TimedChild {
                    venue: Venue::create(&h.context, VenueRecord::named(format!("venue-{index}"))),
                    index,
                    latency: Duration::from_millis(*millis),
                    fails: *fails,
                    finished: Arc::clone(&finished),
                };
                fan.retrieve_child(Arc::new(child) as NodeRef, Scope::LocalThenRemote, LocalTier::Cache, false);
            }
            let result = fan.join().await;

            let finished = finished.lock().clone();
            prop_assert_eq!(finished.len(), children.len());
            let first_failure = finished.iter().copied().find(|&i| children[i].1);
            match first_failure {
                Some(index) => prop_assert_eq!(result, Err(TimedChild::error(index))),
                None => prop_assert_eq!(result, Ok(())),
            }
            if !children.is_empty() {
                prop_assert_eq!(fired.load(Ordering::SeqCst), first_failure.is_none());
            }
            Ok(())
        })?;
    }
}
