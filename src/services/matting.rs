use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::pipeline::{BackgroundRemover, BoxError};

/// Client for the external background-removal inference service.
///
/// The service is a stateless function over bytes: it takes an image and
/// its mime type and returns the matted result as PNG bytes.
pub struct MattingClient {
    http: Client,
    endpoint: String,
    api_token: String,
}

#[derive(Deserialize)]
struct MattingResponse {
    image: String,
}

impl MattingClient {
    pub fn new(endpoint: &str, api_token: &str) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        }
    }

    /// Send an image for matting and return the processed PNG bytes.
    pub async fn process(&self, image_bytes: &[u8], mime_type: &str) -> Result<Vec<u8>, MattingError> {
        let url = format!("{}/v1/remove-background", self.endpoint);

        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image_bytes),
            "mimeType": mime_type,
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await
            .map_err(MattingError::Http)?
            .error_for_status()
            .map_err(MattingError::Http)?;

        let body: MattingResponse = response.json().await.map_err(MattingError::Http)?;

        base64::engine::general_purpose::STANDARD
            .decode(&body.image)
            .map_err(MattingError::Decode)
    }
}

impl BackgroundRemover for MattingClient {
    async fn remove_background(&self, image: &[u8], mime_type: &str) -> Result<Vec<u8>, BoxError> {
        Ok(self.process(image, mime_type).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MattingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode inference response image: {0}")]
    Decode(#[from] base64::DecodeError),
}
