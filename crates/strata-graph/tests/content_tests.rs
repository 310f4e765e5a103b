//! Single-flight content passes and per-story serialization

use pretty_assertions::assert_eq;
use std::time::Duration;
use strata_graph::prelude::*;
use strata_graph::{ContentCallback, RetrieveState};
use strata_store::StoreError;
use strata_test_utils::{fast_config, story_tree, Harness, RemoteVerb};
use tokio::sync::oneshot;

/// A saved story, reloaded cold with only its digest resident
async fn cold_story(h: &Harness, moments: usize) -> Arc<Story> {
    let original = story_tree(&h.context, "stream", moments);
    original
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    h.context.stores().purge(LocalTier::Cache).await.unwrap();
    h.faults().clear_calls();

    let story = Story::reference(&h.context, original.unique_identifier());
    story
        .retrieve_digest(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    story
}

fn reply() -> (ContentCallback, oneshot::Receiver<Result<(), SyncError>>) {
    let (tx, rx) = oneshot::channel();
    let callback: ContentCallback = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (callback, rx)
}

fn states(story: &Story) -> Vec<RetrieveState> {
    story.moments().iter().map(|m| m.retrieve_state()).collect()
}

#[tokio::test]
async fn digest_leaves_moments_unretrieved() {
    let h = Harness::new();
    let story = cold_story(&h, 2).await;

    assert!(story.is_digest_retrieved());
    assert!(!story.is_retrieved());
    assert_eq!(states(&story), vec![RetrieveState::NotAvailable; 2]);
    assert_eq!(h.faults().count_verb(RemoteVerb::Fetch), 3);
}

#[tokio::test]
async fn overlapping_requests_coalesce_into_one_more_pass() {
    let h = Harness::new();
    let story = cold_story(&h, 3).await;

    let (first, first_rx) = reply();
    let (second, second_rx) = reply();
    let (third, third_rx) = reply();
    story.request_content(0, 0, Some(first));
    assert!(story.content().is_in_progress());
    story.request_content(0, 0, Some(second));
    story.request_content(0, 0, Some(third));

    assert_eq!(first_rx.await.unwrap(), Ok(()));
    // superseded by the newer request before its pass began
    assert!(second_rx.await.is_err());
    assert_eq!(third_rx.await.unwrap(), Ok(()));

    assert_eq!(story.content().passes(), 2);
    assert!(!story.content().is_in_progress());
    assert!(story.is_retrieved());
    for moment in story.moments() {
        assert_eq!(h.faults().count(RemoteVerb::Fetch, &moment.unique_identifier()), 1);
    }
}

#[tokio::test]
async fn first_error_is_carried_through_the_streak() {
    let h = Harness::new();
    let story = cold_story(&h, 3).await;
    let broken = story.moment(1).unwrap().unique_identifier();
    h.faults().fail_always(
        RemoteVerb::Fetch,
        broken.clone(),
        StoreError::Http {
            status: 403,
            message: "forbidden".into(),
        },
    );

    let (first, first_rx) = reply();
    let (second, second_rx) = reply();
    story.request_content(0, 0, Some(first));
    story.request_content(0, 0, Some(second));

    assert!(matches!(first_rx.await.unwrap(), Err(SyncError::PermanentValidation(_))));
    // the follow-up pass has nothing to do but still reports the streak's error
    assert!(matches!(second_rx.await.unwrap(), Err(SyncError::PermanentValidation(_))));
    assert_eq!(
        states(&story),
        vec![
            RetrieveState::Synced,
            RetrieveState::NotAvailable,
            RetrieveState::Synced
        ]
    );

    h.faults().clear_failures();
    let (retry, retry_rx) = reply();
    story.request_content(1, 1, Some(retry));
    assert_eq!(retry_rx.await.unwrap(), Ok(()));
    assert!(story.is_retrieved());
}

#[tokio::test]
async fn window_limits_what_a_pass_claims() {
    let h = Harness::new();
    let story = cold_story(&h, 3).await;

    let (done, done_rx) = reply();
    story.request_content(1, 1, Some(done));
    assert_eq!(done_rx.await.unwrap(), Ok(()));

    assert_eq!(
        states(&story),
        vec![
            RetrieveState::NotAvailable,
            RetrieveState::Synced,
            RetrieveState::NotAvailable
        ]
    );
    let first = story.moment(0).unwrap().unique_identifier();
    assert_eq!(h.faults().count(RemoteVerb::Fetch, &first), 0);
}

#[tokio::test]
async fn configured_window_sizes_each_request() {
    let h = Harness::with_config(fast_config().with_content_window(2));
    let story = cold_story(&h, 3).await;

    let (done, done_rx) = reply();
    story.request_content_window(1, Some(done));
    assert_eq!(done_rx.await.unwrap(), Ok(()));

    assert_eq!(
        states(&story),
        vec![
            RetrieveState::NotAvailable,
            RetrieveState::Synced,
            RetrieveState::Synced
        ]
    );
}

#[test]
fn without_a_runtime_the_callback_reports_failure() {
    let h = Harness::new();
    let story = story_tree(&h.context, "offline", 1);
    let (tx, rx) = std::sync::mpsc::channel();

    story.request_content(
        0,
        0,
        Some(Box::new(move |result| {
            let _ = tx.send(result);
        })),
    );

    assert!(matches!(rx.recv().unwrap(), Err(SyncError::Unknown(_))));
    assert!(!story.content().is_in_progress());
}

#[tokio::test]
async fn cancel_retrieve_stops_running_and_queued_retrievals() {
    let h = Harness::new();
    let original = story_tree(&h.context, "slow", 2);
    original
        .save_recursive(Scope::LocalThenRemote, LocalTier::Cache)
        .await
        .unwrap();
    h.context.stores().purge(LocalTier::Cache).await.unwrap();
    h.faults().set_latency(Duration::from_millis(50));

    let story = Story::reference(&h.context, original.unique_identifier());
    let spawn_retrieve = |story: &Arc<Story>| {
        let story = Arc::clone(story);
        tokio::spawn(async move {
            story
                .retrieve_recursive(Scope::LocalThenRemote, LocalTier::Cache, false, None)
                .await
        })
    };
    let running = spawn_retrieve(&story);
    tokio::task::yield_now().await;
    let queued = spawn_retrieve(&story);
    tokio::time::sleep(Duration::from_millis(10)).await;

    story.cancel_retrieve();

    assert_eq!(running.await.unwrap(), Err(SyncError::Cancelled));
    assert_eq!(queued.await.unwrap(), Err(SyncError::Cancelled));
    assert_eq!(story.retrieve_state(), RetrieveState::NotAvailable);

    h.faults().set_latency(Duration::ZERO);
    story
        .retrieve_recursive(Scope::LocalThenRemote, LocalTier::Cache, false, None)
        .await
        .unwrap();
    assert!(story.is_retrieved());
}

#[tokio::test]
async fn story_operations_run_one_at_a_time() {
    let h = Harness::new();
    let story = story_tree(&h.context, "serial", 2);
    h.faults().set_latency(Duration::from_millis(2));

    let save = story.save_recursive(Scope::LocalThenRemote, LocalTier::Cache);
    let delete = story.delete_recursive(Scope::LocalThenRemote, LocalTier::Cache);
    let (saved, deleted) = tokio::join!(save, delete);
    saved.unwrap();
    deleted.unwrap();

    // the delete was queued behind the save, so nothing is left behind
    assert!(h.remote::<strata_graph::StoryRecord>().is_empty());
    assert!(h.remote::<strata_graph::MomentRecord>().is_empty());
    assert_eq!(story.queue().stats().completed, 2);
}

#[tokio::test]
async fn content_pass_waits_for_a_running_delete() {
    let h = Harness::new();
    let story = cold_story(&h, 2).await;
    h.faults().set_latency(Duration::from_millis(10));

    let delete = {
        let story = Arc::clone(&story);
        tokio::spawn(async move {
            story
                .delete_recursive(Scope::LocalThenRemote, LocalTier::Cache)
                .await
        })
    };
    while !story.queue().stats().running {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let (done, done_rx) = reply();
    story.request_content(0, 0, Some(done));

    delete.await.unwrap().unwrap();
    assert_eq!(done_rx.await.unwrap(), Ok(()));

    // the delete already read every moment, so the pass had nothing to fetch
    for moment in story.moments() {
        assert_eq!(h.faults().count(RemoteVerb::Fetch, &moment.unique_identifier()), 1);
    }
    assert_eq!(h.local::<strata_graph::MomentRecord>().len(LocalTier::Cache), 0);
    assert_eq!(h.local::<strata_graph::MediaRecord>().len(LocalTier::Cache), 0);
    assert!(h.remote::<strata_graph::MomentRecord>().is_empty());
}

#[tokio::test]
async fn panicking_callback_does_not_wedge_the_stream() {
    let h = Harness::new();
    let story = cold_story(&h, 2).await;

    story.request_content(0, 1, Some(Box::new(|_| panic!("callback blew up"))));
    while story.content().is_in_progress() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let (done, done_rx) = reply();
    story.request_content(1, 1, Some(done));
    let result = tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("a fresh pass runs");
    assert_eq!(result.unwrap(), Ok(()));
    assert_eq!(story.content().passes(), 2);
    assert!(story.is_retrieved());
}
