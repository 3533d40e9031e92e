//! Media timeline data model.
//!
//! A timeline fixes the segment grid for one piece of media. Its width and
//! duration-derived segment count are frozen once any viewer has progress
//! recorded against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{require_id, Result};
use crate::grid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaTimeline {
    pub media_id: String,
    pub duration_secs: f64,
    pub segment_width_secs: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaTimeline {
    pub fn new(media_id: &str, duration_secs: f64, segment_width_secs: f64) -> Result<Self> {
        require_id(media_id, "media id")?;
        // Validates both the duration and the width.
        grid::segment_count(duration_secs, segment_width_secs)?;

        let now = Utc::now();
        Ok(Self {
            media_id: media_id.to_string(),
            duration_secs,
            segment_width_secs,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn segment_count(&self) -> Result<u32> {
        grid::segment_count(self.duration_secs, self.segment_width_secs)
    }

    /// True when existing presence sets stay valid under `other`'s grid.
    pub fn same_grid_as(&self, other: &MediaTimeline) -> bool {
        self.segment_width_secs == other.segment_width_secs
            && matches!(
                (self.segment_count(), other.segment_count()),
                (Ok(a), Ok(b)) if a == b
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_grid_inputs() {
        assert!(MediaTimeline::new("m1", 60.0, 5.0).is_ok());
        assert!(MediaTimeline::new("m1", 0.0, 5.0).is_err());
        assert!(MediaTimeline::new("m1", 60.0, 0.0).is_err());
        assert!(MediaTimeline::new("  ", 60.0, 5.0).is_err());
    }

    #[test]
    fn test_same_grid_tolerates_duration_within_last_segment() {
        let base = MediaTimeline::new("m1", 60.0, 5.0).unwrap();
        let trimmed = MediaTimeline::new("m1", 57.5, 5.0).unwrap();
        let longer = MediaTimeline::new("m1", 61.0, 5.0).unwrap();
        let rewidth = MediaTimeline::new("m1", 60.0, 10.0).unwrap();

        assert!(base.same_grid_as(&trimmed));
        assert!(!base.same_grid_as(&longer));
        assert!(!base.same_grid_as(&rewidth));
    }
}
