use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::{ErrorResponse, ImageListItem, ImageStatusResponse, ViewUrlResponse};
use crate::models::image::{ImageJob, JobStatus};
use crate::services::auth::AuthUser;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// GET /api/v1/images — list the caller's images, newest first.
pub async fn list_images(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ImageListItem>>, ApiError> {
    let jobs = queries::list_jobs(&state.db, &user.user_id)
        .await
        .map_err(internal)?;

    Ok(Json(
        jobs.into_iter()
            .map(|job| ImageListItem {
                image_id: job.id,
                image_name: job.display_name,
                status: job.status,
                created_at: job.created_at,
            })
            .collect(),
    ))
}

/// GET /api/v1/images/{image_id} — poll a job's status.
///
/// A `failed` status is provisional: a redelivery still in flight may
/// later flip the same record to `completed`.
pub async fn get_image_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ImageStatusResponse>, ApiError> {
    let job = fetch_owned(&state, image_id, &user).await?;

    Ok(Json(ImageStatusResponse {
        image_id: job.id,
        image_name: job.display_name,
        status: job.status,
        created_at: job.created_at,
        updated_at: job.updated_at,
    }))
}

/// GET /api/v1/images/{image_id}/view — presigned GET URL for the
/// processed image.
pub async fn view_image(
    State(state): State<AppState>,
    user: AuthUser,
    Path(image_id): Path<Uuid>,
) -> Result<Json<ViewUrlResponse>, ApiError> {
    let job = fetch_owned(&state, image_id, &user).await?;
    let url = presign_processed(&state, &job).await?;

    Ok(Json(ViewUrlResponse {
        url,
        expires_in_secs: state.config.presign_view_ttl_secs as u64,
    }))
}

/// GET /api/v1/images/{image_id}/download — redirect to a presigned URL.
///
/// Used for same-tab navigation, where the bearer token rides the `token`
/// query parameter instead of a header; both paths go through the same
/// verification.
pub async fn download_image(
    State(state): State<AppState>,
    user: AuthUser,
    Path(image_id): Path<Uuid>,
) -> Result<Redirect, ApiError> {
    let job = fetch_owned(&state, image_id, &user).await?;
    let url = presign_processed(&state, &job).await?;

    Ok(Redirect::temporary(&url))
}

async fn fetch_owned(state: &AppState, image_id: Uuid, user: &AuthUser) -> Result<ImageJob, ApiError> {
    queries::get_job_for_owner(&state.db, image_id, &user.user_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::new("Image not found")),
            )
        })
}

async fn presign_processed(state: &AppState, job: &ImageJob) -> Result<String, ApiError> {
    if job.status != JobStatus::Completed {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(format!(
                "Image is not ready (status: {})",
                job.status
            ))),
        ));
    }

    state
        .storage
        .presign_get(&job.processed_key, state.config.presign_view_ttl_secs)
        .await
        .map_err(|e| {
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::new(e.to_string())),
            )
        })
}

fn internal(e: sqlx::Error) -> ApiError {
    tracing::error!(error = %e, "database error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new("Failed to fetch images")),
    )
}
