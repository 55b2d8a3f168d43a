use crate::blob_store::{BlobStore, StorageError};
use crate::config::S3Config;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument};

/// S3-backed blob store for documents and QR images
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes.max(5 * 1024 * 1024),
        })
    }

    /// Single-part upload for small objects
    async fn simple_upload(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| backend_error(key, e))?;

        Ok(())
    }

    /// Multipart upload for large objects such as videos
    async fn multipart_upload(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| backend_error(key, e))?;

        let upload_id = create_response.upload_id().ok_or_else(|| StorageError::Backend {
            key: key.to_string(),
            message: "No upload ID in response".to_string(),
        })?;

        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(self.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let response = match self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(bytes.slice_ref(chunk)))
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    self.abort_multipart(key, upload_id).await;
                    return Err(backend_error(key, e));
                }
            };

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| backend_error(key, e))?;

        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            debug!(key = %key, error = %DisplayErrorContext(&e), "Failed to abort multipart upload");
        }
    }
}

fn backend_error<E>(key: &str, error: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Backend {
        key: key.to_string(),
        message: DisplayErrorContext(&error).to_string(),
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn store(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), StorageError> {
        if bytes.len() > self.multipart_threshold_bytes {
            self.multipart_upload(key, bytes, content_type).await?;
        } else {
            self.simple_upload(key, bytes, content_type).await?;
        }

        debug!(key = %key, "Blob uploaded to S3");
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, StorageError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    return Err(StorageError::NotFound(key.to_string()));
                }
                return Err(backend_error(key, e));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| backend_error(key, e))?;

        Ok(data.into_bytes())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        // S3 treats deleting a missing key as success
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| backend_error(key, e))?;

        debug!(key = %key, "Blob deleted from S3");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(backend_error(key, e))
                }
            }
        }
    }
}
