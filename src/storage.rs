use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

/// Content-addressed blob store for comment and thread attachments.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
}

/// Public URL for a stored upload; this is what clients put in `attachments`.
pub fn image_url(hash: &str) -> String {
    let base = std::env::var("PUBLIC_IMAGE_BASE").unwrap_or_else(|_| "/images".into());
    format!("{}/{}", base.trim_end_matches('/'), hash)
}

// S3 / MinIO backend
pub struct S3ImageStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
}

impl S3ImageStore {
    pub async fn new() -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "discuss-uploads".into());
        let endpoint = std::env::var("S3_ENDPOINT")
            .map_err(|_| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;
        let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into());
        let access = std::env::var("S3_ACCESS_KEY").unwrap_or_default();
        let secret = std::env::var("S3_SECRET_KEY").unwrap_or_default();

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .endpoint_url(endpoint);
        if !access.is_empty() && !secret.is_empty() {
            let creds = Credentials::new(access, secret, None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style addressing: MinIO endpoints rarely have wildcard DNS
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3 client for bucket '{bucket}'");

        if let Err(e) = client.head_bucket().bucket(&bucket).send().await {
            warn!("head_bucket failed for '{bucket}', creating it: {e:?}");
            client
                .create_bucket()
                .bucket(&bucket)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("failed to ensure bucket '{bucket}': {e}"))?;
            info!("created bucket '{bucket}'");
        }

        Ok(Self {
            bucket,
            client,
            prefix: "uploads".into(),
        })
    }

    fn key_for(&self, hash: &str) -> String {
        let shard = hash.get(0..2).unwrap_or("xx");
        format!("{}/{}/{}", self.prefix, shard, hash)
    }
}

#[async_trait]
impl ImageStore for S3ImageStore {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        use aws_sdk_s3::primitives::ByteStream;
        let key = self.key_for(hash);
        if self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .is_ok()
        {
            return Err(ImageStoreError::Duplicate);
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!("put_object failed hash={hash} key={key} bucket={} err={:?}", self.bucket, e);
            return Err(ImageStoreError::Other(e.to_string()));
        }
        Ok(())
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let key = self.key_for(hash);
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|_| ImageStoreError::NotFound)?;
        let stored_mime = obj.content_type().map(str::to_string);
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| ImageStoreError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        let mime = stored_mime
            .or_else(|| infer::get(&bytes).map(|t| t.mime_type().to_string()))
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }
}

pub async fn build_image_store() -> anyhow::Result<Arc<dyn ImageStore>> {
    Ok(Arc::new(S3ImageStore::new().await?))
}
