use anyhow::Result;
use rusqlite::{params, Row, TransactionBehavior};

use super::timelines::select_timeline;
use crate::db::{
    connection::Database,
    helpers::{column_error, parse_datetime, to_i64, to_u32, to_u64},
    models::{MediaTimeline, WatchState},
};
use crate::grid::PresenceSet;

const WATCH_STATE_COLUMNS: &str = "id, viewer_id, media_id, presence, segment_count, \
     resume_position_secs, version, created_at, updated_at";

fn row_to_watch_state(row: &Row) -> Result<WatchState> {
    let presence: Vec<u8> = row.get("presence")?;
    let segment_count: i64 = row.get("segment_count")?;
    let version: i64 = row.get("version")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let segment_count = to_u32(segment_count, "segment_count")?;
    let presence = PresenceSet::from_bytes(segment_count, &presence).map_err(column_error)?;

    Ok(WatchState {
        id: row.get("id")?,
        viewer_id: row.get("viewer_id")?,
        media_id: row.get("media_id")?,
        presence,
        resume_position_secs: row.get("resume_position_secs")?,
        version: to_u64(version, "version")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn get_watch_state(
        &self,
        viewer_id: &str,
        media_id: &str,
    ) -> Result<Option<WatchState>> {
        let viewer_id = viewer_id.to_string();
        let media_id = media_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WATCH_STATE_COLUMNS}
                 FROM watch_states
                 WHERE viewer_id = ?1 AND media_id = ?2"
            ))?;

            let mut rows = stmt.query(params![viewer_id, media_id])?;
            let state = match rows.next()? {
                Some(row) => Some(row_to_watch_state(row)?),
                None => None,
            };
            Ok(state)
        })
        .await
    }

    /// Compare-and-swap write of a watch state.
    ///
    /// `expected_version == 0` inserts a new row; anything else updates the
    /// row only if it is still at `expected_version`. The stored timeline
    /// must still have `grid`'s segment layout and the state's segment count.
    /// Returns `false` when any of that no longer holds.
    pub async fn save_watch_state(
        &self,
        state: &WatchState,
        grid: &MediaTimeline,
        expected_version: u64,
    ) -> Result<bool> {
        let record = state.clone();
        let grid = grid.clone();
        self.execute(move |conn| {
            let next_version = to_i64(expected_version + 1)?;
            let presence = record.presence.to_bytes();
            let segment_count = record.presence.segment_count();

            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let grid_matches = match select_timeline(&tx, &record.media_id)? {
                Some(current) => {
                    current.same_grid_as(&grid) && current.segment_count()? == segment_count
                }
                None => false,
            };
            if !grid_matches {
                return Ok(false);
            }

            let rows_affected = if expected_version == 0 {
                tx.execute(
                    "INSERT INTO watch_states (id, viewer_id, media_id, presence, segment_count, resume_position_secs, version, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(viewer_id, media_id) DO NOTHING",
                    params![
                        record.id,
                        record.viewer_id,
                        record.media_id,
                        presence,
                        i64::from(segment_count),
                        record.resume_position_secs,
                        next_version,
                        record.created_at.to_rfc3339(),
                        record.updated_at.to_rfc3339(),
                    ],
                )?
            } else {
                tx.execute(
                    "UPDATE watch_states
                     SET presence = ?1,
                         segment_count = ?2,
                         resume_position_secs = ?3,
                         version = ?4,
                         updated_at = ?5
                     WHERE viewer_id = ?6 AND media_id = ?7 AND version = ?8",
                    params![
                        presence,
                        i64::from(segment_count),
                        record.resume_position_secs,
                        next_version,
                        record.updated_at.to_rfc3339(),
                        record.viewer_id,
                        record.media_id,
                        to_i64(expected_version)?,
                    ],
                )?
            };
            tx.commit()?;

            Ok(rows_affected == 1)
        })
        .await
    }

    /// All watch states of a viewer, most recently updated first.
    pub async fn list_watch_states_for_viewer(&self, viewer_id: &str) -> Result<Vec<WatchState>> {
        let viewer_id = viewer_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {WATCH_STATE_COLUMNS}
                 FROM watch_states
                 WHERE viewer_id = ?1
                 ORDER BY updated_at DESC"
            ))?;

            let mut rows = stmt.query(params![viewer_id])?;
            let mut states = Vec::new();
            while let Some(row) = rows.next()? {
                states.push(row_to_watch_state(row)?);
            }
            Ok(states)
        })
        .await
    }

    pub async fn delete_watch_state(&self, viewer_id: &str, media_id: &str) -> Result<bool> {
        let viewer_id = viewer_id.to_string();
        let media_id = media_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "DELETE FROM watch_states WHERE viewer_id = ?1 AND media_id = ?2",
                params![viewer_id, media_id],
            )?;
            Ok(rows_affected > 0)
        })
        .await
    }
}
