//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    Client,
};
use bytes::Bytes;
use chrono::Utc;

use crate::config::StorageConfig;
use crate::error::StorageError;

use super::types::{ObjectReference, TimeBoxedUrl};
use super::ObjectStore;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        if config.endpoint.is_empty() {
            return Err(StorageError::ConnectionFailed("empty S3 endpoint".to_string()));
        }

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "reelsafe",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self { client, bucket })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<ObjectReference, StorageError> {
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("AccessDenied") || msg.contains("403") {
                    StorageError::AccessDenied(key.to_string())
                } else {
                    StorageError::SdkError(format!("Failed to put object {}: {}", key, msg))
                }
            })?;

        tracing::debug!(key = %key, size = size, "Object stored");

        Ok(ObjectReference(key.to_string()))
    }

    async fn presign_get(
        &self,
        reference: &ObjectReference,
        ttl: Duration,
    ) -> Result<TimeBoxedUrl, StorageError> {
        let presign_config =
            PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Presign(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(reference.key())
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::Presign(format!("{}: {}", reference, e)))?;

        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(TimeBoxedUrl {
            url: request.uri().to_string(),
            expires_at,
        })
    }
}
