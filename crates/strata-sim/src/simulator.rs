//! Story workload simulator
//!
//! Three phases, each checked against the remote afterwards:
//! 1. Save every story recursively to the cache tier and the remote
//! 2. Purge the local cache and stream every saved story back in
//! 3. Delete a random subset everywhere
//!
//! A failed operation is fine under injected faults; an operation that
//! reports success but left the tiers inconsistent is a violation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use strata_graph::{
    Band, EntityNode, MarkupRecord, MediaRecord, MomentRecord, Prefetcher, PrefetchKind,
    RetrieveState, Story, StoryRecord, SyncConfig, UserRecord, VenueRecord,
};
use strata_store::{EntityId, LocalTier, Scope, SyncError};
use strata_test_utils::{story_tree, FaultPlan, Harness};
use tracing::{info, warn};

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Stories to create
    pub stories: usize,
    /// Moments per story
    pub moments: usize,
    /// Probability that a remote call fails transiently
    pub failure_rate: f64,
    /// Engine configuration
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            stories: 20,
            moments: 4,
            failure_rate: 0.05,
            sync: strata_test_utils::fast_config(),
        }
    }
}

/// An operation that reported success without its effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Save succeeded but the story is missing from the remote
    SavedButMissing {
        /// Story
        story: EntityId,
    },
    /// Retrieve succeeded but a moment is not synced
    RetrievedButIncomplete {
        /// Story
        story: EntityId,
        /// Moments not synced
        unsynced: usize,
    },
    /// Delete succeeded but the story is still on the remote
    DeletedButPresent {
        /// Story
        story: EntityId,
    },
}

/// Counters gathered during a run
#[derive(Debug, Clone, Default)]
pub struct SimulatorStats {
    /// Stories saved successfully
    pub saves_succeeded: usize,
    /// Stories whose save failed
    pub saves_failed: usize,
    /// Stories retrieved successfully
    pub retrieves_succeeded: usize,
    /// Stories whose retrieval failed
    pub retrieves_failed: usize,
    /// Stories deleted successfully
    pub deletes_succeeded: usize,
    /// Stories whose delete failed
    pub deletes_failed: usize,
    /// Remote calls made
    pub remote_calls: usize,
    /// Retries scheduled
    pub retries: usize,
    /// Bytes uploaded across record kinds
    pub uploaded_bytes: u64,
}

/// Final report
#[derive(Debug, Clone)]
pub struct SimulatorReport {
    /// Configuration used
    pub config: SimulatorConfig,
    /// Counters
    pub stats: SimulatorStats,
    /// Consistency violations found
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether every successful operation held up
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Human readable summary
    #[must_use]
    pub fn generate_text(&self) -> String {
        let s = &self.stats;
        let mut report = String::new();
        report.push_str("=== Strata Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!(
            "Stories: {} x {} moments, failure rate {:.2}\n",
            self.config.stories, self.config.moments, self.config.failure_rate
        ));
        report.push_str(&format!("Saves: {} ok, {} failed\n", s.saves_succeeded, s.saves_failed));
        report.push_str(&format!(
            "Retrieves: {} ok, {} failed\n",
            s.retrieves_succeeded, s.retrieves_failed
        ));
        report.push_str(&format!(
            "Deletes: {} ok, {} failed\n",
            s.deletes_succeeded, s.deletes_failed
        ));
        report.push_str(&format!("Remote calls: {}\n", s.remote_calls));
        report.push_str(&format!("Retries: {}\n", s.retries));
        report.push_str(&format!("Uploaded bytes: {}\n", s.uploaded_bytes));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {v:?}\n", i + 1));
            }
        }
        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));
        report
    }
}

/// Run the simulator
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SyncError> {
    let faults = Arc::new(FaultPlan::seeded(config.seed));
    let harness = Harness::with_faults(config.sync.clone(), Arc::clone(&faults));
    let context = Arc::clone(&harness.context);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut stats = SimulatorStats::default();
    let mut violations = Vec::new();
    let remote_stories = harness.remote::<StoryRecord>();

    faults.set_failure_rate(config.failure_rate);

    // Phase 1: save
    let mut saved = Vec::new();
    for i in 0..config.stories {
        let story = story_tree(&context, &format!("story-{i}"), config.moments);
        let id = story.unique_identifier();
        match story.save_recursive(Scope::LocalThenRemote, LocalTier::Cache).await {
            Ok(()) => {
                stats.saves_succeeded += 1;
                if remote_stories.contains(&id) {
                    saved.push(id);
                } else {
                    violations.push(Violation::SavedButMissing { story: id });
                }
            }
            Err(err) => {
                stats.saves_failed += 1;
                warn!(story = %id, error = %err, "save failed");
            }
        }
    }
    info!(saved = saved.len(), "save phase done");

    // Phase 2: cold retrieve through the prefetcher
    context.stores().purge(LocalTier::Cache).await?;

    let prefetcher = Prefetcher::new(Arc::clone(&context));
    let mut retrieved = Vec::new();
    for id in &saved {
        let story = Story::reference(&context, id.clone());
        match prefetcher
            .queue_recursive(Arc::clone(&story), PrefetchKind::Next, Band::High)
            .await
        {
            Ok(_) => {
                stats.retrieves_succeeded += 1;
                let unsynced = story
                    .moments()
                    .iter()
                    .filter(|m| m.retrieve_state() != RetrieveState::Synced)
                    .count();
                if unsynced > 0 {
                    violations.push(Violation::RetrievedButIncomplete {
                        story: id.clone(),
                        unsynced,
                    });
                }
                retrieved.push(story);
            }
            Err(err) => {
                stats.retrieves_failed += 1;
                warn!(story = %id, error = %err, "retrieve failed");
            }
        }
    }
    info!(retrieved = retrieved.len(), "retrieve phase done");

    // Phase 3: delete a random half
    for story in retrieved {
        if !rng.random_bool(0.5) {
            continue;
        }
        let id = story.unique_identifier();
        match story.delete_recursive(Scope::LocalThenRemote, LocalTier::Cache).await {
            Ok(()) => {
                stats.deletes_succeeded += 1;
                if remote_stories.contains(&id) {
                    violations.push(Violation::DeletedButPresent { story: id });
                }
            }
            Err(err) => {
                stats.deletes_failed += 1;
                warn!(story = %id, error = %err, "delete failed");
            }
        }
    }

    stats.remote_calls = faults.calls().len();
    stats.retries = harness.scheduler.retries();
    stats.uploaded_bytes = remote_stories.uploaded_bytes()
        + harness.remote::<MomentRecord>().uploaded_bytes()
        + harness.remote::<MediaRecord>().uploaded_bytes()
        + harness.remote::<MarkupRecord>().uploaded_bytes()
        + harness.remote::<VenueRecord>().uploaded_bytes()
        + harness.remote::<UserRecord>().uploaded_bytes();

    Ok(SimulatorReport {
        config,
        stats,
        violations,
    })
}
