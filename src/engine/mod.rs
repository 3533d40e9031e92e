pub mod locks;
pub mod merge;

pub use locks::KeyLocks;
pub use merge::{merge_segments, MergeReport};

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    db::WatchState,
    error::{require_id, Result, TrackError},
    grid::PresenceSet,
    log_debug, log_error, log_info, log_warn,
    settings::TrackerSettings,
    store::{SaveOutcome, WatchStateStore},
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_batch_size: usize,
    pub lock_timeout: Duration,
    pub max_conflict_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&TrackerSettings::default())
    }
}

impl From<&TrackerSettings> for EngineConfig {
    fn from(settings: &TrackerSettings) -> Self {
        Self {
            max_batch_size: settings.max_batch_size,
            lock_timeout: Duration::from_millis(settings.lock_timeout_ms),
            max_conflict_retries: settings.max_conflict_retries,
        }
    }
}

/// State after a batch was applied.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub viewer_id: String,
    pub media_id: String,
    pub presence: PresenceSet,
    pub resume_position_secs: f64,
    pub completion_percentage: f64,
    pub report: MergeReport,
    /// Stored version; 0 when nothing has been persisted yet.
    pub version: u64,
}

impl UpdateOutcome {
    fn from_state(state: &WatchState, report: MergeReport) -> Self {
        Self {
            viewer_id: state.viewer_id.clone(),
            media_id: state.media_id.clone(),
            presence: state.presence.clone(),
            resume_position_secs: state.resume_position_secs,
            completion_percentage: state.completion_percentage(),
            report,
            version: state.version,
        }
    }

    /// `0|1` per segment.
    pub fn presence_snapshot(&self) -> Vec<u8> {
        self.presence.to_bits()
    }
}

/// Merges reported segment indices into stored watch states.
///
/// Each call holds the (viewer, media) lock for its whole read-merge-write
/// and additionally writes with compare-and-swap, retrying a bounded number
/// of times when a writer outside this engine (another process on the same
/// database, an admin reset, a timeline re-registration) wins the race.
pub struct UpdateEngine {
    store: Arc<dyn WatchStateStore>,
    locks: KeyLocks,
    config: EngineConfig,
}

impl UpdateEngine {
    pub fn new(store: Arc<dyn WatchStateStore>, config: EngineConfig) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
            config,
        }
    }

    pub async fn apply_watched_segments(
        &self,
        viewer_id: &str,
        media_id: &str,
        candidates: &[i64],
    ) -> Result<UpdateOutcome> {
        require_id(viewer_id, "viewer id")?;
        require_id(media_id, "media id")?;
        if candidates.is_empty() {
            return Err(TrackError::invalid("no segment indices reported"));
        }
        if candidates.len() > self.config.max_batch_size {
            return Err(TrackError::invalid(format!(
                "batch of {} indices exceeds the limit of {}",
                candidates.len(),
                self.config.max_batch_size
            )));
        }

        let _guard = self
            .locks
            .acquire(viewer_id, media_id, self.config.lock_timeout)
            .await?;

        let attempts = self.config.max_conflict_retries + 1;
        for attempt in 1..=attempts {
            // Re-read every attempt: a conflict may mean the grid moved.
            let timeline = self.store.timeline(media_id).await?.ok_or_else(|| {
                TrackError::NotFound(format!("no timeline registered for media {media_id}"))
            })?;
            let segment_count = timeline.segment_count()?;

            let mut state = self.store.load_or_create(viewer_id, &timeline).await?;
            if state.presence.segment_count() != segment_count {
                log_warn!(
                    "Watch state ({viewer_id}, {media_id}) has {} segments but the timeline has {segment_count}; attempt {attempt}/{attempts}",
                    state.presence.segment_count()
                );
                continue;
            }

            let expected_version = state.version;
            let report = merge_segments(&mut state, candidates, timeline.segment_width_secs);

            if !report.changed() {
                // Nothing new: no write, no version bump, and no state is
                // created for a batch that was entirely out of range.
                log_debug!(
                    "No new segments for ({viewer_id}, {media_id}); {} duplicate, {} dropped",
                    report.duplicates,
                    report.dropped
                );
                return Ok(UpdateOutcome::from_state(&state, report));
            }

            state.updated_at = Utc::now();
            match self.store.save(&state, &timeline, expected_version).await? {
                SaveOutcome::Saved { version } => {
                    state.version = version;
                    log_info!(
                        "Merged {} new segment(s) for ({viewer_id}, {media_id}); {} duplicate, {} dropped, version {version}",
                        report.accepted,
                        report.duplicates,
                        report.dropped
                    );
                    return Ok(UpdateOutcome::from_state(&state, report));
                }
                SaveOutcome::Conflict => {
                    log_warn!(
                        "Write conflict on ({viewer_id}, {media_id}) at version {expected_version}; attempt {attempt}/{attempts}"
                    );
                }
            }
        }

        log_error!("Giving up on ({viewer_id}, {media_id}) after {attempts} conflicting attempts");
        Err(TrackError::Conflict(format!(
            "watch state ({viewer_id}, {media_id}) kept changing; gave up after {attempts} attempts"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MediaTimeline};
    use crate::store::{MemoryStore, SqliteStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    async fn engine_with(store: Arc<dyn WatchStateStore>) -> UpdateEngine {
        store
            .put_timeline(&MediaTimeline::new("movie-1", 60.0, 5.0).unwrap())
            .await
            .unwrap();
        UpdateEngine::new(store, EngineConfig::default())
    }

    async fn memory_engine() -> UpdateEngine {
        engine_with(Arc::new(MemoryStore::new())).await
    }

    fn watched(outcome: &UpdateOutcome) -> Vec<u32> {
        outcome.presence.iter().collect()
    }

    #[tokio::test]
    async fn test_applying_same_batch_twice_is_idempotent() {
        let engine = memory_engine().await;
        let first = engine
            .apply_watched_segments("alice", "movie-1", &[1, 2, 3])
            .await
            .unwrap();
        let second = engine
            .apply_watched_segments("alice", "movie-1", &[1, 2, 3])
            .await
            .unwrap();

        assert_eq!(first.presence, second.presence);
        assert_eq!(first.resume_position_secs, second.resume_position_secs);
        assert_eq!(first.completion_percentage, second.completion_percentage);
        assert_eq!(second.report.accepted, 0);
        assert_eq!(second.version, first.version);
    }

    #[tokio::test]
    async fn test_out_of_range_indices_do_not_fail_the_batch() {
        let engine = memory_engine().await;
        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[11, 12, 99])
            .await
            .unwrap();

        assert_eq!(watched(&outcome), vec![11]);
        assert_eq!(outcome.report.dropped, 2);
        assert_eq!(outcome.resume_position_secs, 55.0);
    }

    #[tokio::test]
    async fn test_resume_position_guards_against_regression() {
        let engine = memory_engine().await;
        engine
            .apply_watched_segments("alice", "movie-1", &[10])
            .await
            .unwrap();
        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[2])
            .await
            .unwrap();

        assert_eq!(outcome.resume_position_secs, 50.0);
    }

    #[tokio::test]
    async fn test_percentage_counts_unique_segments() {
        let engine = memory_engine().await;
        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[3, 4, 3, 4, 4])
            .await
            .unwrap();

        assert_eq!(outcome.completion_percentage, 2.0 / 12.0 * 100.0);
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_in_any_report_order() {
        let engine = memory_engine().await;
        let batches: [&[i64]; 5] = [&[9], &[0, 1], &[9, 9], &[4], &[11, 2]];

        let mut last_resume = 0.0;
        let mut last_pct = 0.0;
        for batch in batches {
            let outcome = engine
                .apply_watched_segments("alice", "movie-1", batch)
                .await
                .unwrap();
            assert!(outcome.resume_position_secs >= last_resume);
            assert!(outcome.completion_percentage >= last_pct);
            assert!(outcome.completion_percentage <= 100.0);
            last_resume = outcome.resume_position_secs;
            last_pct = outcome.completion_percentage;
        }
        assert_eq!(last_resume, 55.0);
    }

    #[tokio::test]
    async fn test_concurrent_reports_on_same_key_are_both_kept() {
        let engine = Arc::new(memory_engine().await);

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_watched_segments("alice", "movie-1", &[3]).await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.apply_watched_segments("alice", "movie-1", &[7]).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[3])
            .await
            .unwrap();
        assert_eq!(watched(&outcome), vec![3, 7]);
        assert_eq!(outcome.resume_position_secs, 35.0);
    }

    #[tokio::test]
    async fn test_separate_engines_on_one_database_do_not_lose_updates() {
        let store: Arc<dyn WatchStateStore> =
            Arc::new(SqliteStore::new(Database::in_memory().unwrap()));
        let first = engine_with(Arc::clone(&store)).await;
        let second = UpdateEngine::new(Arc::clone(&store), EngineConfig::default());

        let (a, b) = tokio::join!(
            first.apply_watched_segments("alice", "movie-1", &[3]),
            second.apply_watched_segments("alice", "movie-1", &[7]),
        );
        a.unwrap();
        b.unwrap();

        let state = store.load("alice", "movie-1").await.unwrap().unwrap();
        assert_eq!(state.presence.iter().collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(state.resume_position_secs, 35.0);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let store: Arc<dyn WatchStateStore> = Arc::new(MemoryStore::new());
        store
            .put_timeline(&MediaTimeline::new("movie-1", 60.0, 5.0).unwrap())
            .await
            .unwrap();
        let engine = UpdateEngine::new(
            Arc::clone(&store),
            EngineConfig {
                max_batch_size: 4,
                ..EngineConfig::default()
            },
        );

        let empty = engine.apply_watched_segments("alice", "movie-1", &[]).await;
        assert!(matches!(empty, Err(TrackError::InvalidInput(_))));

        let oversized = engine
            .apply_watched_segments("alice", "movie-1", &[0, 1, 2, 3, 4])
            .await;
        assert!(matches!(oversized, Err(TrackError::InvalidInput(_))));
        assert!(store.load("alice", "movie-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_media_is_not_found() {
        let engine = memory_engine().await;
        let result = engine.apply_watched_segments("alice", "nope", &[1]).await;
        assert!(matches!(result, Err(TrackError::NotFound(_))));

        let result = engine.apply_watched_segments("", "movie-1", &[1]).await;
        assert!(matches!(result, Err(TrackError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_fully_dropped_batch_creates_no_state() {
        let store: Arc<dyn WatchStateStore> = Arc::new(MemoryStore::new());
        let engine = engine_with(Arc::clone(&store)).await;

        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[12, 500])
            .await
            .unwrap();
        assert_eq!(outcome.version, 0);
        assert!(outcome.presence.is_empty());
        assert!(store.load("alice", "movie-1").await.unwrap().is_none());
    }

    /// Memory store with scripted interference around loads and saves.
    #[derive(Default)]
    struct ScriptedStore {
        inner: MemoryStore,
        /// A rival writer bumps the version before this many saves.
        races_left: AtomicU32,
        /// Re-registered during the next load.
        regrid_on_load: parking_lot::Mutex<Option<MediaTimeline>>,
        stall_load: AtomicBool,
        stall_after_save: AtomicBool,
    }

    #[async_trait]
    impl WatchStateStore for ScriptedStore {
        async fn timeline(&self, media_id: &str) -> Result<Option<MediaTimeline>> {
            self.inner.timeline(media_id).await
        }

        async fn put_timeline(&self, timeline: &MediaTimeline) -> Result<MediaTimeline> {
            self.inner.put_timeline(timeline).await
        }

        async fn load(&self, viewer_id: &str, media_id: &str) -> Result<Option<WatchState>> {
            if self.stall_load.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let regrid = self.regrid_on_load.lock().take();
            if let Some(regrid) = regrid {
                self.inner.put_timeline(&regrid).await?;
            }
            self.inner.load(viewer_id, media_id).await
        }

        async fn save(
            &self,
            state: &WatchState,
            grid: &MediaTimeline,
            expected_version: u64,
        ) -> Result<SaveOutcome> {
            let race = self
                .races_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if race {
                let mut rival = self.inner.load_or_create(&state.viewer_id, grid).await?;
                let rival_version = rival.version;
                rival.presence.insert(0).unwrap();
                self.inner.save(&rival, grid, rival_version).await?;
            }
            let outcome = self.inner.save(state, grid, expected_version).await?;
            if self.stall_after_save.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(outcome)
        }

        async fn list_for_viewer(&self, viewer_id: &str) -> Result<Vec<WatchState>> {
            self.inner.list_for_viewer(viewer_id).await
        }

        async fn reset(&self, viewer_id: &str, media_id: &str) -> Result<bool> {
            self.inner.reset(viewer_id, media_id).await
        }
    }

    #[tokio::test]
    async fn test_conflict_is_retried_with_fresh_state() {
        let store = Arc::new(ScriptedStore {
            races_left: AtomicU32::new(2),
            ..ScriptedStore::default()
        });
        let engine = engine_with(store.clone()).await;

        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[5])
            .await
            .unwrap();

        // The rival's segment survives alongside ours.
        assert_eq!(watched(&outcome), vec![0, 5]);
        assert_eq!(outcome.version, 3);
    }

    #[tokio::test]
    async fn test_conflict_gives_up_after_bounded_retries() {
        let store = Arc::new(ScriptedStore {
            races_left: AtomicU32::new(u32::MAX),
            ..ScriptedStore::default()
        });
        store
            .put_timeline(&MediaTimeline::new("movie-1", 60.0, 5.0).unwrap())
            .await
            .unwrap();
        let engine = UpdateEngine::new(
            store,
            EngineConfig {
                max_conflict_retries: 2,
                ..EngineConfig::default()
            },
        );

        let result = engine.apply_watched_segments("alice", "movie-1", &[5]).await;
        assert!(matches!(result, Err(TrackError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_regrid_before_first_write_is_picked_up() {
        let store = Arc::new(ScriptedStore::default());
        let engine = engine_with(store.clone()).await;
        *store.regrid_on_load.lock() = Some(MediaTimeline::new("movie-1", 60.0, 10.0).unwrap());

        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[3])
            .await
            .unwrap();
        assert_eq!(outcome.presence.segment_count(), 6);
        assert_eq!(watched(&outcome), vec![3]);
        assert_eq!(outcome.resume_position_secs, 30.0);

        let stored = store.load("alice", "movie-1").await.unwrap().unwrap();
        assert_eq!(stored.presence.segment_count(), 6);

        let again = engine
            .apply_watched_segments("alice", "movie-1", &[4])
            .await
            .unwrap();
        assert_eq!(watched(&again), vec![3, 4]);
        assert_eq!(again.version, 2);
    }

    #[tokio::test]
    async fn test_lock_held_past_timeout_is_conflict() {
        let store: Arc<dyn WatchStateStore> = Arc::new(MemoryStore::new());
        store
            .put_timeline(&MediaTimeline::new("movie-1", 60.0, 5.0).unwrap())
            .await
            .unwrap();
        let engine = UpdateEngine::new(
            Arc::clone(&store),
            EngineConfig {
                lock_timeout: Duration::from_millis(20),
                ..EngineConfig::default()
            },
        );

        let held = engine
            .locks
            .acquire("alice", "movie-1", Duration::from_secs(1))
            .await
            .unwrap();
        let result = engine.apply_watched_segments("alice", "movie-1", &[1]).await;
        assert!(matches!(result, Err(TrackError::Conflict(_))));
        assert!(store.load("alice", "movie-1").await.unwrap().is_none());

        drop(held);
        assert!(engine
            .apply_watched_segments("alice", "movie-1", &[1])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_abandoned_call_before_write_leaves_state_untouched() {
        let store = Arc::new(ScriptedStore::default());
        let engine = engine_with(store.clone()).await;
        engine
            .apply_watched_segments("alice", "movie-1", &[1])
            .await
            .unwrap();

        store.stall_load.store(true, Ordering::SeqCst);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            engine.apply_watched_segments("alice", "movie-1", &[2, 3]),
        )
        .await;
        assert!(abandoned.is_err());

        let stored = store.inner.load("alice", "movie-1").await.unwrap().unwrap();
        assert_eq!(stored.presence.iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(stored.version, 1);

        store.stall_load.store(false, Ordering::SeqCst);
        let outcome = engine
            .apply_watched_segments("alice", "movie-1", &[4])
            .await
            .unwrap();
        assert_eq!(watched(&outcome), vec![1, 4]);
        assert_eq!(engine.locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_call_after_write_keeps_whole_batch() {
        let store = Arc::new(ScriptedStore::default());
        let engine = engine_with(store.clone()).await;

        store.stall_after_save.store(true, Ordering::SeqCst);
        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            engine.apply_watched_segments("alice", "movie-1", &[2, 3]),
        )
        .await;
        assert!(abandoned.is_err());

        let stored = store.load("alice", "movie-1").await.unwrap().unwrap();
        assert_eq!(stored.presence.iter().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(stored.version, 1);

        store.stall_after_save.store(false, Ordering::SeqCst);
        let retried = engine
            .apply_watched_segments("alice", "movie-1", &[2, 3])
            .await
            .unwrap();
        assert_eq!(retried.report.accepted, 0);
        assert_eq!(retried.version, 1);
        assert_eq!(engine.locks.active_keys(), 0);
    }
}
