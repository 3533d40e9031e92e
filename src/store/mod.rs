//! Watch-state persistence contract.
//!
//! The engine only ever talks to a [`WatchStateStore`]; concrete backends
//! decide where the records live. Writes are compare-and-swap on the
//! state's `version`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::db::{MediaTimeline, WatchState};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { version: u64 },
    /// The stored record no longer matches the expected version.
    Conflict,
}

#[async_trait]
pub trait WatchStateStore: Send + Sync {
    async fn timeline(&self, media_id: &str) -> Result<Option<MediaTimeline>>;

    /// Registers or updates a timeline. Fails with `InvalidInput` if the new
    /// grid would invalidate existing watch states.
    async fn put_timeline(&self, timeline: &MediaTimeline) -> Result<MediaTimeline>;

    /// Reads a watch state without creating one.
    async fn load(&self, viewer_id: &str, media_id: &str) -> Result<Option<WatchState>>;

    /// Returns the stored state or a fresh, unsaved one (version 0).
    async fn load_or_create(&self, viewer_id: &str, timeline: &MediaTimeline) -> Result<WatchState> {
        match self.load(viewer_id, &timeline.media_id).await? {
            Some(state) => Ok(state),
            None => Ok(WatchState::empty(
                viewer_id,
                &timeline.media_id,
                timeline.segment_count()?,
            )),
        }
    }

    /// Compare-and-swap write of `state`, merged against `grid`.
    ///
    /// Also a `Conflict` when the stored timeline no longer has `grid`'s
    /// segment layout, so a state is never written under a grid it was not
    /// built for.
    async fn save(
        &self,
        state: &WatchState,
        grid: &MediaTimeline,
        expected_version: u64,
    ) -> Result<SaveOutcome>;

    /// Most recently updated first.
    async fn list_for_viewer(&self, viewer_id: &str) -> Result<Vec<WatchState>>;

    /// Administrative removal of a watch state. Not used by the update path.
    async fn reset(&self, viewer_id: &str, media_id: &str) -> Result<bool>;
}
