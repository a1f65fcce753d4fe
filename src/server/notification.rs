//! Notification endpoint.
//!
//! Accepts protocol notifications, checks the optional signature, and hands
//! each one to the engine on a spawned task before returning 202 Accepted.
//! The engine tolerates duplicates, so the bridge may redeliver freely.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::AppState;
use super::signature::{SIGNATURE_HEADER, verify_signature};
use crate::effects::{ProtocolInterpreter, ServiceInterpreter};
use crate::gateway::ServiceError;
use crate::types::JobNotification;

/// Errors that can occur when receiving a notification.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("missing required header: {0}")]
    MissingSignature(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid notification body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl IntoResponse for NotificationError {
    fn into_response(self) -> Response {
        let status = match &self {
            NotificationError::MissingSignature(_) => StatusCode::BAD_REQUEST,
            NotificationError::InvalidSignature => StatusCode::UNAUTHORIZED,
            NotificationError::InvalidJson(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Notification handler.
///
/// # Response
///
/// - 202 Accepted: notification dispatched to the engine
/// - 400 Bad Request: missing signature header or malformed JSON
/// - 401 Unauthorized: signature does not match
///
/// # Example
///
/// ```ignore
/// POST /notifications HTTP/1.1
/// Content-Type: application/json
///
/// {"job_id": "42", "phase": 2, "memos": ["{\"sourceUrl\": \"...\"}"]}
///
/// HTTP/1.1 202 Accepted
/// ```
pub async fn notification_handler<P, S>(
    State(app_state): State<AppState<P, S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), NotificationError>
where
    P: ProtocolInterpreter<Error = ServiceError> + Send + Sync + 'static,
    S: ServiceInterpreter<Error = ServiceError> + Send + Sync + 'static,
{
    if let Some(secret) = app_state.notification_secret() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(NotificationError::MissingSignature(SIGNATURE_HEADER))?;
        if !verify_signature(&body, header, secret) {
            warn!("Invalid notification signature");
            return Err(NotificationError::InvalidSignature);
        }
    }

    let notification: JobNotification = serde_json::from_slice(&body)?;
    debug!(
        job_id = %notification.job_id,
        phase = %notification.phase,
        memos = notification.memos.len(),
        "Received notification"
    );

    let engine = app_state.engine();
    tokio::spawn(async move {
        match engine.handle_notification(&notification).await {
            Ok(outcome) => {
                info!(job_id = %notification.job_id, outcome = ?outcome, "Notification handled");
            }
            Err(e) => {
                error!(job_id = %notification.job_id, error = %e, "Notification handling failed");
            }
        }
    });

    Ok((StatusCode::ACCEPTED, "Accepted"))
}
