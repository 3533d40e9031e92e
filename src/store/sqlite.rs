use async_trait::async_trait;

use super::{SaveOutcome, WatchStateStore};
use crate::db::{Database, MediaTimeline, TimelineUpsert, WatchState};
use crate::error::{Result, TrackError};

/// Store backed by the SQLite worker thread.
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl WatchStateStore for SqliteStore {
    async fn timeline(&self, media_id: &str) -> Result<Option<MediaTimeline>> {
        Ok(self.db.get_timeline(media_id).await?)
    }

    async fn put_timeline(&self, timeline: &MediaTimeline) -> Result<MediaTimeline> {
        match self.db.upsert_timeline(timeline).await? {
            TimelineUpsert::Stored(stored) => Ok(stored),
            TimelineUpsert::GridLocked {
                existing,
                watch_states,
            } => Err(TrackError::invalid(format!(
                "media {} already has {watch_states} watch state(s) on a {}s grid; \
                 changing its segment grid requires a migration",
                existing.media_id, existing.segment_width_secs
            ))),
        }
    }

    async fn load(&self, viewer_id: &str, media_id: &str) -> Result<Option<WatchState>> {
        Ok(self.db.get_watch_state(viewer_id, media_id).await?)
    }

    async fn save(
        &self,
        state: &WatchState,
        grid: &MediaTimeline,
        expected_version: u64,
    ) -> Result<SaveOutcome> {
        let applied = self.db.save_watch_state(state, grid, expected_version).await?;
        if applied {
            Ok(SaveOutcome::Saved {
                version: expected_version + 1,
            })
        } else {
            Ok(SaveOutcome::Conflict)
        }
    }

    async fn list_for_viewer(&self, viewer_id: &str) -> Result<Vec<WatchState>> {
        Ok(self.db.list_watch_states_for_viewer(viewer_id).await?)
    }

    async fn reset(&self, viewer_id: &str, media_id: &str) -> Result<bool> {
        Ok(self.db.delete_watch_state(viewer_id, media_id).await?)
    }
}
