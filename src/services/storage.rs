use s3::creds::Credentials;
use s3::{Bucket, Region};

use crate::pipeline::{BlobStore, BoxError};

/// Client for S3-compatible object storage.
pub struct StorageClient {
    bucket: Box<Bucket>,
}

impl StorageClient {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    /// Upload image bytes under the given key. Last write wins.
    pub async fn upload(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }

    /// Download an object, fully buffered.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        Ok(response.to_vec())
    }

    /// Delete an object.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }

    /// Time-bounded GET URL for viewing or downloading an object.
    pub async fn presign_get(&self, key: &str, expiry_secs: u32) -> Result<String, StorageError> {
        self.bucket
            .presign_get(key, expiry_secs, None)
            .await
            .map_err(StorageError::S3)
    }

    /// Time-bounded PUT URL for direct client upload.
    pub async fn presign_put(&self, key: &str, expiry_secs: u32) -> Result<String, StorageError> {
        self.bucket
            .presign_put(key, expiry_secs, None, None)
            .await
            .map_err(StorageError::S3)
    }
}

impl BlobStore for StorageClient {
    async fn put_object(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), BoxError> {
        Ok(self.upload(key, bytes, content_type).await?)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, BoxError> {
        Ok(self.download(key).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
