//! Read-only projections of watch state for display.
//!
//! Reads never create a watch state and may observe the state from just
//! before a concurrent update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::{MediaTimeline, WatchState},
    error::{require_id, Result, TrackError},
    store::WatchStateStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentPresence {
    pub index: u32,
    pub watched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub viewer_id: String,
    pub media_id: String,
    pub segment_count: u32,
    pub segment_width_secs: f64,
    /// `0|1` per segment.
    pub presence: Vec<u8>,
    pub resume_position: f64,
    pub completion_percentage: f64,
    pub completed: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

pub struct ProgressReporter {
    store: Arc<dyn WatchStateStore>,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn WatchStateStore>) -> Self {
        Self { store }
    }

    async fn timeline(&self, media_id: &str) -> Result<MediaTimeline> {
        require_id(media_id, "media id")?;
        self.store
            .timeline(media_id)
            .await?
            .ok_or_else(|| TrackError::NotFound(format!("no timeline registered for media {media_id}")))
    }

    async fn state(&self, viewer_id: &str, media_id: &str) -> Result<Option<WatchState>> {
        require_id(viewer_id, "viewer id")?;
        self.store.load(viewer_id, media_id).await
    }

    /// One entry per segment of the timeline, in order.
    pub async fn get_presence_snapshot(
        &self,
        viewer_id: &str,
        media_id: &str,
    ) -> Result<Vec<SegmentPresence>> {
        let timeline = self.timeline(media_id).await?;
        let segment_count = timeline.segment_count()?;
        let state = self.state(viewer_id, media_id).await?;

        Ok((0..segment_count)
            .map(|index| SegmentPresence {
                index,
                watched: state
                    .as_ref()
                    .is_some_and(|state| state.presence.contains(index)),
            })
            .collect())
    }

    /// Seconds; 0 when the viewer has no state for this media.
    pub async fn get_resume_position(&self, viewer_id: &str, media_id: &str) -> Result<f64> {
        self.timeline(media_id).await?;
        Ok(self
            .state(viewer_id, media_id)
            .await?
            .map_or(0.0, |state| state.resume_position_secs))
    }

    pub async fn get_completion_percentage(&self, viewer_id: &str, media_id: &str) -> Result<f64> {
        self.timeline(media_id).await?;
        Ok(self
            .state(viewer_id, media_id)
            .await?
            .map_or(0.0, |state| state.completion_percentage()))
    }

    pub async fn get_progress(&self, viewer_id: &str, media_id: &str) -> Result<ProgressReport> {
        let timeline = self.timeline(media_id).await?;
        let segment_count = timeline.segment_count()?;
        let state = self.state(viewer_id, media_id).await?;

        Ok(match state {
            Some(state) => build_report(&state, &timeline),
            None => ProgressReport {
                viewer_id: viewer_id.to_string(),
                media_id: media_id.to_string(),
                segment_count,
                segment_width_secs: timeline.segment_width_secs,
                presence: vec![0; segment_count as usize],
                resume_position: 0.0,
                completion_percentage: 0.0,
                completed: false,
                updated_at: None,
            },
        })
    }

    /// Partially watched media for a viewer, most recently touched first.
    pub async fn continue_watching(&self, viewer_id: &str, limit: usize) -> Result<Vec<ProgressReport>> {
        require_id(viewer_id, "viewer id")?;
        let states = self.store.list_for_viewer(viewer_id).await?;

        let mut reports = Vec::new();
        for state in states {
            if reports.len() >= limit {
                break;
            }
            if state.presence.is_empty() || state.is_complete() {
                continue;
            }
            // Timelines are never deleted while states reference them.
            if let Some(timeline) = self.store.timeline(&state.media_id).await? {
                reports.push(build_report(&state, &timeline));
            }
        }
        Ok(reports)
    }
}

fn build_report(state: &WatchState, timeline: &MediaTimeline) -> ProgressReport {
    ProgressReport {
        viewer_id: state.viewer_id.clone(),
        media_id: state.media_id.clone(),
        segment_count: state.presence.segment_count(),
        segment_width_secs: timeline.segment_width_secs,
        presence: state.presence.to_bits(),
        resume_position: state.resume_position_secs,
        completion_percentage: state.completion_percentage(),
        completed: state.is_complete(),
        updated_at: Some(state.updated_at),
    }
}
