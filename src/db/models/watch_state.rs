//! Per-viewer, per-media watch state.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::grid::PresenceSet;

/// One viewer's progress through one timeline.
///
/// `version` is 0 until the state is first persisted and increases by one
/// on every successful save; stores use it for compare-and-swap writes.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchState {
    pub id: String,
    pub viewer_id: String,
    pub media_id: String,
    pub presence: PresenceSet,
    pub resume_position_secs: f64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WatchState {
    pub fn empty(viewer_id: &str, media_id: &str, segment_count: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            viewer_id: viewer_id.to_string(),
            media_id: media_id.to_string(),
            presence: PresenceSet::with_len(segment_count),
            resume_position_secs: 0.0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Unique watched segments over all segments, in `[0, 100]`.
    pub fn completion_percentage(&self) -> f64 {
        let total = self.presence.segment_count();
        if total == 0 {
            return 0.0;
        }
        let pct = f64::from(self.presence.watched_count()) / f64::from(total) * 100.0;
        pct.clamp(0.0, 100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.presence.watched_count() == self.presence.segment_count()
    }
}
