use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{
    ErrorResponse, PresignUploadRequest, PresignUploadResponse, UploadRequest, UploadResponse,
};
use crate::pipeline::submit::{
    extension_for_mime, NewSubmission, SubmitError, Submitter, ALLOWED_MIME_TYPES,
};
use crate::services::auth::AuthUser;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// POST /api/v1/images — submit an image for background removal.
pub async fn submit_image(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut image: Option<(Vec<u8>, String, String)> = None;
    let mut image_name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| bad_request("Malformed multipart body"))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("image") => {
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let file_name = field.file_name().unwrap_or("image").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|_| bad_request("Failed to read image field"))?;
                image = Some((data.to_vec(), mime_type, file_name));
            }
            Some("imageName") => {
                image_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|_| bad_request("Failed to read imageName field"))?,
                );
            }
            _ => {}
        }
    }

    let Some((bytes, mime_type, file_name)) = image else {
        return Err(bad_request("No image file provided"));
    };

    let request = UploadRequest { image_name };
    request
        .validate()
        .map_err(|e| bad_request(&e.to_string()))?;

    // Fall back to the uploaded file's base name, as the web client does.
    let display_name = request.image_name.unwrap_or_else(|| {
        file_name
            .split('.')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("image")
            .to_string()
    });

    let submitter = Submitter::new(
        state.storage.as_ref(),
        &state.db,
        state.queue.as_ref(),
        state.config.max_upload_bytes,
    );

    let job = submitter
        .submit(NewSubmission {
            owner_id: &user.user_id,
            display_name: &display_name,
            mime_type: &mime_type,
            bytes: &bytes,
        })
        .await
        .map_err(submit_error_response)?;

    Ok(Json(UploadResponse {
        image_id: job.id,
        status: job.status,
        message: "Image queued for processing".to_string(),
    }))
}

/// POST /api/v1/images/presign-upload — presigned PUT URL for the
/// direct-upload flow that bypasses the server-side buffering path.
pub async fn presign_upload(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<PresignUploadRequest>,
) -> Result<Json<PresignUploadResponse>, ApiError> {
    request
        .validate()
        .map_err(|e| bad_request(&e.to_string()))?;

    if !ALLOWED_MIME_TYPES.contains(&request.mime_type.as_str()) {
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(ErrorResponse::new(format!(
                "Unsupported media type: {}",
                request.mime_type
            ))),
        ));
    }

    let key = format!(
        "{}/original/{}.{}",
        user.user_id,
        Uuid::new_v4(),
        extension_for_mime(&request.mime_type)
    );

    let ttl = state.config.presign_upload_ttl_secs;
    let url = state
        .storage
        .presign_put(&key, ttl)
        .await
        .map_err(|e| bad_gateway(&e.to_string()))?;

    Ok(Json(PresignUploadResponse {
        key,
        url,
        expires_in_secs: ttl as u64,
    }))
}

fn submit_error_response(e: SubmitError) -> ApiError {
    let status = match &e {
        SubmitError::UnsupportedMediaType(_) | SubmitError::MimeMismatch => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        SubmitError::EmptyPayload => StatusCode::BAD_REQUEST,
        SubmitError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        SubmitError::Infrastructure(_) => StatusCode::BAD_GATEWAY,
    };
    (status, Json(ErrorResponse::new(e.to_string())))
}

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message)))
}

fn bad_gateway(message: &str) -> ApiError {
    (StatusCode::BAD_GATEWAY, Json(ErrorResponse::new(message)))
}
