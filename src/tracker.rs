use std::sync::Arc;

use anyhow::Result as AnyResult;
use log::{info, warn};

use crate::{
    db::{Database, MediaTimeline},
    engine::{EngineConfig, UpdateEngine, UpdateOutcome},
    error::{require_id, Result, TrackError},
    reporter::ProgressReporter,
    settings::TrackerSettings,
    store::{MemoryStore, SqliteStore, WatchStateStore},
};

/// Everything a transport needs: timeline registration, the update engine
/// and the progress reporter over one shared store.
#[derive(Clone)]
pub struct WatchTracker {
    store: Arc<dyn WatchStateStore>,
    engine: Arc<UpdateEngine>,
    reporter: Arc<ProgressReporter>,
    default_segment_width: f64,
    max_segment_count: u32,
}

impl WatchTracker {
    pub fn new(store: Arc<dyn WatchStateStore>, settings: &TrackerSettings) -> Self {
        Self {
            engine: Arc::new(UpdateEngine::new(
                Arc::clone(&store),
                EngineConfig::from(settings),
            )),
            reporter: Arc::new(ProgressReporter::new(Arc::clone(&store))),
            store,
            default_segment_width: settings.segment_width_secs,
            max_segment_count: settings.max_segment_count,
        }
    }

    /// SQLite-backed tracker at `settings.database_path`.
    pub fn open(settings: &TrackerSettings) -> AnyResult<Self> {
        settings.validate()?;
        let db = Database::new(settings.database_path.clone())?;
        Ok(Self::new(Arc::new(SqliteStore::new(db)), settings))
    }

    pub fn in_memory(settings: &TrackerSettings) -> Self {
        Self::new(Arc::new(MemoryStore::new()), settings)
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub async fn register_timeline(
        &self,
        media_id: &str,
        duration_secs: f64,
        segment_width_secs: Option<f64>,
    ) -> Result<MediaTimeline> {
        let width = segment_width_secs.unwrap_or(self.default_segment_width);
        let timeline = MediaTimeline::new(media_id, duration_secs, width)?;
        let segment_count = timeline.segment_count()?;
        if segment_count > self.max_segment_count {
            return Err(TrackError::invalid(format!(
                "{duration_secs}s at {width}s segments is {segment_count} segments; the limit is {}",
                self.max_segment_count
            )));
        }
        let stored = self.store.put_timeline(&timeline).await?;

        info!(
            "Registered timeline {} ({}s, {}s segments, {} segments)",
            stored.media_id,
            stored.duration_secs,
            stored.segment_width_secs,
            stored.segment_count()?
        );
        Ok(stored)
    }

    pub async fn apply_watched_segments(
        &self,
        viewer_id: &str,
        media_id: &str,
        candidates: &[i64],
    ) -> Result<UpdateOutcome> {
        self.engine
            .apply_watched_segments(viewer_id, media_id, candidates)
            .await
    }

    /// Administrative removal of a viewer's progress on one media.
    ///
    /// A merge racing with the reset loses its compare-and-swap, reloads and
    /// starts a fresh state from its own batch.
    pub async fn reset_progress(&self, viewer_id: &str, media_id: &str) -> Result<bool> {
        require_id(viewer_id, "viewer id")?;
        require_id(media_id, "media id")?;
        let removed = self.store.reset(viewer_id, media_id).await?;
        if removed {
            warn!("Reset watch progress for ({viewer_id}, {media_id})");
        }
        Ok(removed)
    }
}
