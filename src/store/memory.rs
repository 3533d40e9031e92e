use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{SaveOutcome, WatchStateStore};
use crate::db::{MediaTimeline, WatchState};
use crate::error::{Result, TrackError};

type StateKey = (String, String);

/// In-process store with the same versioning rules as the SQLite store.
/// Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    timelines: RwLock<HashMap<String, MediaTimeline>>,
    states: RwLock<HashMap<StateKey, WatchState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(viewer_id: &str, media_id: &str) -> StateKey {
        (viewer_id.to_string(), media_id.to_string())
    }
}

#[async_trait]
impl WatchStateStore for MemoryStore {
    async fn timeline(&self, media_id: &str) -> Result<Option<MediaTimeline>> {
        Ok(self.timelines.read().get(media_id).cloned())
    }

    async fn put_timeline(&self, timeline: &MediaTimeline) -> Result<MediaTimeline> {
        // Lock order: timelines, then states.
        let mut timelines = self.timelines.write();
        let mut stored = timeline.clone();

        if let Some(existing) = timelines.get(&timeline.media_id) {
            if !existing.same_grid_as(timeline) {
                let watch_states = self
                    .states
                    .read()
                    .values()
                    .filter(|state| state.media_id == timeline.media_id)
                    .count();
                if watch_states > 0 {
                    return Err(TrackError::invalid(format!(
                        "media {} already has {watch_states} watch state(s) on a {}s grid; \
                         changing its segment grid requires a migration",
                        existing.media_id, existing.segment_width_secs
                    )));
                }
            }
            stored.created_at = existing.created_at;
        }

        timelines.insert(stored.media_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn load(&self, viewer_id: &str, media_id: &str) -> Result<Option<WatchState>> {
        Ok(self
            .states
            .read()
            .get(&Self::key(viewer_id, media_id))
            .cloned())
    }

    async fn save(
        &self,
        state: &WatchState,
        grid: &MediaTimeline,
        expected_version: u64,
    ) -> Result<SaveOutcome> {
        // Held across the write so a re-grid cannot slip in between.
        let timelines = self.timelines.read();
        let grid_matches = timelines.get(&state.media_id).is_some_and(|current| {
            current.same_grid_as(grid)
                && current.segment_count().ok() == Some(state.presence.segment_count())
        });
        if !grid_matches {
            return Ok(SaveOutcome::Conflict);
        }

        let mut states = self.states.write();
        let key = Self::key(&state.viewer_id, &state.media_id);
        let current_version = states.get(&key).map_or(0, |stored| stored.version);

        if current_version != expected_version {
            return Ok(SaveOutcome::Conflict);
        }

        let version = expected_version + 1;
        let mut record = state.clone();
        record.version = version;
        states.insert(key, record);

        Ok(SaveOutcome::Saved { version })
    }

    async fn list_for_viewer(&self, viewer_id: &str) -> Result<Vec<WatchState>> {
        let mut states: Vec<WatchState> = self
            .states
            .read()
            .values()
            .filter(|state| state.viewer_id == viewer_id)
            .cloned()
            .collect();
        states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(states)
    }

    async fn reset(&self, viewer_id: &str, media_id: &str) -> Result<bool> {
        Ok(self
            .states
            .write()
            .remove(&Self::key(viewer_id, media_id))
            .is_some())
    }
}
