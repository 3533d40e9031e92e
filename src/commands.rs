//! JSON request/response adapter in front of [`WatchTracker`].
//!
//! Identity resolution happens upstream; requests carry viewer ids verbatim.

use serde::{Deserialize, Serialize};

use crate::{
    db::MediaTimeline,
    error::TrackError,
    reporter::ProgressReport,
    tracker::WatchTracker,
};

const DEFAULT_CONTINUE_WATCHING_LIMIT: usize = 20;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    RegisterTimeline {
        media_id: String,
        duration_secs: f64,
        segment_width_secs: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    Report {
        viewer_id: String,
        media_id: String,
        candidate_segment_indices: Vec<i64>,
    },
    #[serde(rename_all = "camelCase")]
    Progress { viewer_id: String, media_id: String },
    #[serde(rename_all = "camelCase")]
    Resume { viewer_id: String, media_id: String },
    #[serde(rename_all = "camelCase")]
    ContinueWatching {
        viewer_id: String,
        limit: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    Reset { viewer_id: String, media_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl From<&TrackError> for ErrorBody {
    fn from(err: &TrackError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    #[serde(rename_all = "camelCase")]
    Watch {
        success: bool,
        presence_snapshot: Vec<u8>,
        resume_position: f64,
        completion_percentage: f64,
        accepted: usize,
        dropped: usize,
    },
    #[serde(rename_all = "camelCase")]
    Timeline {
        success: bool,
        timeline: MediaTimeline,
        segment_count: u32,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        success: bool,
        progress: ProgressReport,
    },
    #[serde(rename_all = "camelCase")]
    Resume {
        success: bool,
        resume_position: f64,
    },
    #[serde(rename_all = "camelCase")]
    ContinueWatching {
        success: bool,
        items: Vec<ProgressReport>,
    },
    #[serde(rename_all = "camelCase")]
    Reset { success: bool, removed: bool },
    #[serde(rename_all = "camelCase")]
    Failure { success: bool, error: ErrorBody },
}

impl Response {
    fn failure(err: &TrackError) -> Self {
        Response::Failure {
            success: false,
            error: ErrorBody::from(err),
        }
    }
}

pub async fn handle_request(tracker: &WatchTracker, request: Request) -> Response {
    let result = dispatch(tracker, request).await;
    match result {
        Ok(response) => response,
        Err(err) => {
            log::debug!("Request failed: {err}");
            Response::failure(&err)
        }
    }
}

async fn dispatch(tracker: &WatchTracker, request: Request) -> Result<Response, TrackError> {
    match request {
        Request::RegisterTimeline {
            media_id,
            duration_secs,
            segment_width_secs,
        } => {
            let timeline = tracker
                .register_timeline(&media_id, duration_secs, segment_width_secs)
                .await?;
            Ok(Response::Timeline {
                success: true,
                segment_count: timeline.segment_count()?,
                timeline,
            })
        }
        Request::Report {
            viewer_id,
            media_id,
            candidate_segment_indices,
        } => {
            let outcome = tracker
                .apply_watched_segments(&viewer_id, &media_id, &candidate_segment_indices)
                .await?;
            Ok(Response::Watch {
                success: true,
                presence_snapshot: outcome.presence_snapshot(),
                resume_position: outcome.resume_position_secs,
                completion_percentage: outcome.completion_percentage,
                accepted: outcome.report.accepted,
                dropped: outcome.report.dropped,
            })
        }
        Request::Progress {
            viewer_id,
            media_id,
        } => Ok(Response::Progress {
            success: true,
            progress: tracker.reporter().get_progress(&viewer_id, &media_id).await?,
        }),
        Request::Resume {
            viewer_id,
            media_id,
        } => Ok(Response::Resume {
            success: true,
            resume_position: tracker
                .reporter()
                .get_resume_position(&viewer_id, &media_id)
                .await?,
        }),
        Request::ContinueWatching { viewer_id, limit } => Ok(Response::ContinueWatching {
            success: true,
            items: tracker
                .reporter()
                .continue_watching(&viewer_id, limit.unwrap_or(DEFAULT_CONTINUE_WATCHING_LIMIT))
                .await?,
        }),
        Request::Reset {
            viewer_id,
            media_id,
        } => Ok(Response::Reset {
            success: true,
            removed: tracker.reset_progress(&viewer_id, &media_id).await?,
        }),
    }
}

/// Parses one JSON request line and renders the JSON response line.
pub async fn handle_line(tracker: &WatchTracker, line: &str) -> String {
    let response = match serde_json::from_str::<Request>(line) {
        Ok(request) => handle_request(tracker, request).await,
        Err(err) => Response::failure(&TrackError::invalid(format!("malformed request: {err}"))),
    };

    serde_json::to_string(&response).unwrap_or_else(|err| {
        format!(
            r#"{{"success":false,"error":{{"kind":"internal","message":"failed to encode response: {}"}}}}"#,
            err.to_string().replace('"', "'")
        )
    })
}
