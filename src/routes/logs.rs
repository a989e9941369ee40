use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::{ErrorResponse, LogListItem};
use crate::services::auth::AuthUser;

/// GET /api/v1/logs — the caller's activity log, newest first.
pub async fn list_logs(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<LogListItem>>, (StatusCode, Json<ErrorResponse>)> {
    let logs = queries::list_logs(&state.db, &user.user_id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to fetch logs")),
            )
        })?;

    Ok(Json(
        logs.into_iter()
            .map(|log| LogListItem {
                id: log.id,
                description: log.description,
                image_id: log.image_id,
                created_at: log.created_at,
            })
            .collect(),
    ))
}
