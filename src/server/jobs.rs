//! Read-only view of in-flight jobs.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::AppState;
use crate::persistence::WorkLogEntry;
use crate::types::JobId;

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("job not in work log: {0}")]
    NotFound(JobId),
}

impl IntoResponse for JobsError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobsError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, self.to_string()).into_response()
    }
}

/// Lists every work log entry, ordered by job id.
pub async fn list_jobs_handler<P, S>(
    State(app_state): State<AppState<P, S>>,
) -> Json<Vec<WorkLogEntry>> {
    Json(app_state.engine().context().worklog.entries())
}

/// Returns one work log entry.
pub async fn job_handler<P, S>(
    State(app_state): State<AppState<P, S>>,
    Path(job_id): Path<String>,
) -> Result<Json<WorkLogEntry>, JobsError> {
    let job_id = JobId::new(job_id);
    app_state
        .engine()
        .context()
        .worklog
        .get(&job_id)
        .map(Json)
        .ok_or(JobsError::NotFound(job_id))
}
