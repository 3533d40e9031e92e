use anyhow::Result;
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{connection::Database, helpers::parse_datetime, models::MediaTimeline};

/// Result of registering a timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineUpsert {
    Stored(MediaTimeline),
    /// The new grid would invalidate presence sets that already exist.
    GridLocked {
        existing: MediaTimeline,
        watch_states: u64,
    },
}

fn row_to_timeline(row: &Row) -> Result<MediaTimeline> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(MediaTimeline {
        media_id: row.get("media_id")?,
        duration_secs: row.get("duration_secs")?,
        segment_width_secs: row.get("segment_width_secs")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

pub(super) fn select_timeline(conn: &rusqlite::Connection, media_id: &str) -> Result<Option<MediaTimeline>> {
    let mut stmt = conn.prepare(
        "SELECT media_id, duration_secs, segment_width_secs, created_at, updated_at
         FROM media_timelines
         WHERE media_id = ?1",
    )?;

    let mut rows = stmt.query(params![media_id])?;
    let timeline = match rows.next()? {
        Some(row) => Some(row_to_timeline(row)?),
        None => None,
    };
    Ok(timeline)
}

impl Database {
    pub async fn get_timeline(&self, media_id: &str) -> Result<Option<MediaTimeline>> {
        let media_id = media_id.to_string();
        self.execute(move |conn| select_timeline(conn, &media_id))
            .await
    }

    /// Insert or update a timeline.
    ///
    /// The grid check and the write happen inside one DB task so a watch
    /// state cannot appear between them.
    pub async fn upsert_timeline(&self, timeline: &MediaTimeline) -> Result<TimelineUpsert> {
        let record = timeline.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let existing = select_timeline(&tx, &record.media_id)?;
            let created_at = match &existing {
                Some(existing) => {
                    if !existing.same_grid_as(&record) {
                        let watch_states: i64 = tx
                            .query_row(
                                "SELECT COUNT(*) FROM watch_states WHERE media_id = ?1",
                                params![record.media_id],
                                |row| row.get(0),
                            )
                            .optional()?
                            .unwrap_or(0);
                        if watch_states > 0 {
                            return Ok(TimelineUpsert::GridLocked {
                                existing: existing.clone(),
                                watch_states: watch_states as u64,
                            });
                        }
                    }
                    existing.created_at
                }
                None => record.created_at,
            };

            tx.execute(
                "INSERT INTO media_timelines (media_id, duration_secs, segment_width_secs, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(media_id) DO UPDATE SET
                     duration_secs = excluded.duration_secs,
                     segment_width_secs = excluded.segment_width_secs,
                     updated_at = excluded.updated_at",
                params![
                    record.media_id,
                    record.duration_secs,
                    record.segment_width_secs,
                    created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )?;
            tx.commit()?;

            Ok(TimelineUpsert::Stored(MediaTimeline {
                created_at,
                ..record
            }))
        })
        .await
    }
}
