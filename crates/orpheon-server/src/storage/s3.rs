use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use super::{
    config::StorageConfig, BodyReader, ObjectStore, ObjectStream, PutOptions, PutReceipt,
    StorageError,
};

/// Multipart part size; S3 requires at least 5 MiB for all but the last part.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// S3-compatible object store (AWS S3, MinIO)
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: StorageConfig) -> Self {
        debug!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            region = %config.region,
            "Initializing S3 storage"
        );

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "orpheon-storage",
        );

        let mut s3_config_builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!(bucket = %config.bucket, "Storage client initialized");

        Self {
            client,
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
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
            Err(err) => match err.as_service_error() {
                Some(e) if e.is_not_found() => Ok(false),
                _ => Err(StorageError::Unavailable(format!(
                    "head {key}: {}",
                    DisplayErrorContext(&err)
                ))),
            },
        }
    }

    async fn put_single(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(data.len() as i64)
            .body(ByteStream::from(data));

        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        request.send().await.map_err(|err| {
            StorageError::Unavailable(format!("put {key}: {}", DisplayErrorContext(&err)))
        })?;
        Ok(())
    }

    /// Upload `first` and the rest of `reader` as one multipart upload.
    ///
    /// The object appears only on `CompleteMultipartUpload`; any failure, and
    /// dropping this future, aborts the upload.
    async fn put_multipart(
        &self,
        key: &str,
        first: Vec<u8>,
        reader: &mut BodyReader,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key);
        if let Some(ct) = content_type {
            request = request.content_type(ct);
        }

        let created = request.send().await.map_err(|err| {
            StorageError::Unavailable(format!(
                "create multipart upload {key}: {}",
                DisplayErrorContext(&err)
            ))
        })?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Unavailable(format!("no upload id for {key}")))?
            .to_string();

        let mut guard = AbortOnDrop {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            upload_id: upload_id.clone(),
            armed: true,
        };

        let result = self.upload_parts(key, &upload_id, first, reader).await;
        guard.armed = false;

        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.abort(key, &upload_id).await;
                Err(err)
            },
        }
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        reader: &mut BodyReader,
    ) -> Result<(), StorageError> {
        let mut parts = Vec::new();
        let mut data = first;

        loop {
            let part_number = parts.len() as i32 + 1;
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|err| {
                    StorageError::Unavailable(format!(
                        "upload part {part_number} of {key}: {}",
                        DisplayErrorContext(&err)
                    ))
                })?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            debug!(part_number, "Uploaded part of s3://{}/{}", self.bucket, key);

            if reader.is_done() {
                break;
            }
            data = reader.read_part(PART_SIZE).await?;
            if data.is_empty() {
                break;
            }
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| {
                StorageError::Unavailable(format!(
                    "complete multipart upload {key}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        abort_upload(&self.client, &self.bucket, key, upload_id).await;
    }
}

async fn abort_upload(client: &Client, bucket: &str, key: &str, upload_id: &str) {
    match client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(key)
        .upload_id(upload_id)
        .send()
        .await
    {
        Ok(_) => debug!("Aborted multipart upload of s3://{}/{}", bucket, key),
        Err(err) => warn!(
            key,
            upload_id,
            error = %DisplayErrorContext(&err),
            "Failed to abort multipart upload"
        ),
    }
}

/// Aborts a multipart upload whose `put` future was dropped mid-flight.
struct AbortOnDrop {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, upload_id = %self.upload_id, "Multipart upload left open");
            return;
        };

        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        runtime.spawn(async move {
            abort_upload(&client, &bucket, &key, &upload_id).await;
        });
    }
}

#[async_trait]
impl ObjectStore for S3Storage {
    /// Bodies up to one part go out as a single `PutObject`; larger ones as
    /// a multipart upload. Neither exposes a partial object.
    #[instrument(skip(self, body, options), fields(bucket = %self.bucket))]
    async fn put(
        &self,
        key: &str,
        body: ObjectStream,
        options: PutOptions,
    ) -> Result<PutReceipt, StorageError> {
        let content_type = options.content_type.as_deref();
        let mut reader = BodyReader::new(body, options.max_bytes);

        let first = reader.read_part(PART_SIZE).await?;
        if reader.is_done() {
            debug!("Uploading {} bytes to s3://{}/{}", first.len(), self.bucket, key);
            self.put_single(key, first, content_type).await?;
        } else {
            debug!("Starting multipart upload to s3://{}/{}", self.bucket, key);
            self.put_multipart(key, first, &mut reader, content_type).await?;
        }

        let receipt = reader.into_receipt(key);
        info!(size = receipt.size, "Uploaded s3://{}/{}", self.bucket, key);
        Ok(receipt)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<ObjectStream, StorageError> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                return match err.as_service_error() {
                    Some(e) if e.is_no_such_key() => Err(StorageError::NotFound(key.to_string())),
                    _ => Err(StorageError::Unavailable(format!(
                        "get {key}: {}",
                        DisplayErrorContext(&err)
                    ))),
                }
            },
        };

        debug!("Streaming s3://{}/{}", self.bucket, key);

        let body = stream::unfold(Some(response.body), |body| async move {
            let mut body = body?;
            match body.try_next().await {
                Ok(Some(bytes)) => Some((Ok(bytes.to_vec()), Some(body))),
                Ok(None) => None,
                Err(err) => Some((Err(std::io::Error::other(err)), None)),
            }
        });
        Ok(body.boxed())
    }

    /// S3 deletes are idempotent, so existence is checked first to report
    /// `NotFound` for missing keys.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if !self.exists(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                StorageError::Unavailable(format!("delete {key}: {}", DisplayErrorContext(&err)))
            })?;

        info!("Deleted s3://{}/{}", self.bucket, key);

        Ok(())
    }
}
