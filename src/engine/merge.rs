use crate::db::WatchState;
use crate::grid;

/// What a single merge did with the reported indices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Indices that were not yet in the presence set.
    pub accepted: usize,
    /// In-range indices that were already present (or repeated in the batch).
    pub duplicates: usize,
    /// Negative or `>= segment_count` indices, silently ignored.
    pub dropped: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.accepted > 0
    }
}

/// Union `candidates` into the state's presence set and lift the resume
/// position to the start of the highest watched segment.
///
/// Out-of-range indices never touch the state. The resume position comes
/// from the whole presence set, so reporting an early segment after a late
/// one cannot move it backwards.
pub fn merge_segments(state: &mut WatchState, candidates: &[i64], segment_width: f64) -> MergeReport {
    let segment_count = state.presence.segment_count();
    let mut report = MergeReport::default();

    for &candidate in candidates {
        let index = match u32::try_from(candidate) {
            Ok(index) if index < segment_count => index,
            _ => {
                report.dropped += 1;
                continue;
            }
        };

        match state.presence.insert(index) {
            Ok(true) => report.accepted += 1,
            Ok(false) => report.duplicates += 1,
            Err(_) => report.dropped += 1,
        }
    }

    if let Some(max_index) = state.presence.max() {
        let resume = grid::segment_start_time(max_index, segment_width);
        state.resume_position_secs = state.resume_position_secs.max(resume);
    }

    report
}
