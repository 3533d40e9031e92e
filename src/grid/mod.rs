//! Fixed-width discretization of a media timeline.
//!
//! Every conversion between seconds and segment indices goes through this
//! module so the engine and the reporter can never disagree on boundaries.

pub mod presence;

pub use presence::PresenceSet;

use crate::error::{Result, TrackError};

pub const DEFAULT_SEGMENT_WIDTH_SECS: f64 = 5.0;

/// Hard ceiling on segments per timeline; a full snapshot stays in the
/// tens of megabytes. Deployments usually configure a lower limit.
pub const MAX_SEGMENT_COUNT: u32 = 1 << 24;

/// Default configured limit: about 139 hours at the default width.
pub const DEFAULT_MAX_SEGMENT_COUNT: u32 = 100_000;

fn check_width(segment_width: f64) -> Result<()> {
    if !segment_width.is_finite() || segment_width <= 0.0 {
        return Err(TrackError::invalid(format!(
            "segment width must be a positive number of seconds, got {segment_width}"
        )));
    }
    Ok(())
}

/// `floor(timestamp / segment_width)`.
pub fn segment_index(timestamp: f64, segment_width: f64) -> Result<u32> {
    check_width(segment_width)?;
    if !timestamp.is_finite() || timestamp < 0.0 {
        return Err(TrackError::invalid(format!(
            "timestamp must be a non-negative number of seconds, got {timestamp}"
        )));
    }

    let index = (timestamp / segment_width).floor();
    if index > f64::from(u32::MAX) {
        return Err(TrackError::invalid(format!(
            "timestamp {timestamp} is beyond the addressable segment range"
        )));
    }
    Ok(index as u32)
}

/// `ceil(duration / segment_width)`, never less than one.
pub fn segment_count(duration: f64, segment_width: f64) -> Result<u32> {
    check_width(segment_width)?;
    if !duration.is_finite() || duration <= 0.0 {
        return Err(TrackError::invalid(format!(
            "duration must be a positive number of seconds, got {duration}"
        )));
    }

    let count = (duration / segment_width).ceil();
    if count > f64::from(MAX_SEGMENT_COUNT) {
        return Err(TrackError::invalid(format!(
            "duration {duration}s yields too many segments at width {segment_width}s"
        )));
    }
    Ok((count as u32).max(1))
}

pub fn segment_start_time(index: u32, segment_width: f64) -> f64 {
    f64::from(index) * segment_width
}
