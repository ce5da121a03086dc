use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::StorageConfig;

/// Public route prefix under which stored photos are served.
pub const OBJECTS_ROUTE: &str = "/objects/";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not_found")]
    NotFound,
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("other: {0}")]
    Other(String),
}

/// Blob store holding claim photos. Clients upload directly through a
/// presigned URL; the service only hands out URLs and serves objects back.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Presigned PUT URL for a fresh object under the private prefix.
    async fn upload_url(&self) -> Result<String, StorageError>;
    /// Canonical `/objects/...` path for an uploaded object URL; foreign values pass through.
    fn normalize_path(&self, raw: &str) -> String;
    /// Object bytes and content type for a canonical `/objects/...` path.
    async fn load(&self, object_path: &str) -> Result<(Vec<u8>, String), StorageError>;
}

/// Path component of a URL (query and fragment dropped), or the input when it is already a path.
fn url_path(raw: &str) -> &str {
    let without_scheme = match raw.find("://") {
        Some(i) => &raw[i + 3..],
        None => return raw.split(['?', '#']).next().unwrap_or(raw),
    };
    let path = match without_scheme.find('/') {
        Some(i) => &without_scheme[i..],
        None => "/",
    };
    path.split(['?', '#']).next().unwrap_or(path)
}

/// Maps an upload URL (path-style `/<bucket>/<prefix>/<id>` or virtual-host
/// style `/<prefix>/<id>`) to `/objects/<id>`. Anything else is returned as is.
pub fn normalize_object_path(raw: &str, bucket: &str, prefix: &str) -> String {
    let raw = raw.trim();
    if !raw.starts_with("http://") && !raw.starts_with("https://") {
        return raw.to_string();
    }
    let path = urlencoding::decode(url_path(raw))
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| url_path(raw).to_string());
    let path_style = format!("/{bucket}/{prefix}/");
    let host_style = format!("/{prefix}/");
    let entity = path
        .strip_prefix(&path_style)
        .or_else(|| path.strip_prefix(&host_style));
    match entity {
        Some(id) if !id.is_empty() => format!("{OBJECTS_ROUTE}{id}"),
        _ => raw.to_string(),
    }
}

/// Storage key for a canonical object path. Rejects traversal and empty ids.
pub fn object_key(object_path: &str, prefix: &str) -> Result<String, StorageError> {
    let id = object_path
        .strip_prefix(OBJECTS_ROUTE)
        .unwrap_or(object_path)
        .trim_start_matches('/');
    if id.is_empty() || id.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(StorageError::InvalidPath(object_path.to_string()));
    }
    Ok(format!("{prefix}/{id}"))
}

fn sniff_mime(bytes: &[u8]) -> String {
    infer::get(bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into())
}

// ---------------- S3 Implementation (MinIO compatible) ----------------
pub struct S3ObjectStore {
    bucket: String,
    client: aws_sdk_s3::Client,
    prefix: String,
    upload_ttl: Duration,
}

impl S3ObjectStore {
    pub async fn new(cfg: &StorageConfig) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let endpoint = cfg
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("S3_ENDPOINT must be set (MinIO / S3 endpoint)"))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(cfg.region.clone()))
            .endpoint_url(endpoint);
        if let (Some(access), Some(secret)) = (&cfg.access_key, &cfg.secret_key) {
            let creds = Credentials::new(access.clone(), secret.clone(), None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // path-style keeps presigned URLs in the /<bucket>/<key> shape normalize_path expects
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("Initialized S3/MinIO client for bucket '{}'", cfg.bucket);

        let store = Self {
            bucket: cfg.bucket.clone(),
            client,
            prefix: cfg.private_prefix.clone(),
            upload_ttl: cfg.upload_url_ttl,
        };
        store.ensure_bucket().await?;
        Ok(store)
    }

    async fn ensure_bucket(&self) -> anyhow::Result<()> {
        let bucket = &self.bucket;
        if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
            return Ok(());
        }
        warn!("bucket '{bucket}' missing or unreachable, attempting create");
        let max_attempts = 5u32;
        for attempt in 1..=max_attempts {
            match self.client.create_bucket().bucket(bucket).send().await {
                Ok(_) => {
                    info!("created bucket '{bucket}' (attempt {attempt})");
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    let backoff_ms = 200 * u64::from(attempt.pow(2));
                    warn!("create_bucket attempt {attempt} for '{bucket}' failed: {e:?} (retrying in {backoff_ms}ms)");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => {
                    error!("create_bucket failed for '{bucket}' after {attempt} attempts: {e:?}");
                    return Err(anyhow::anyhow!("failed to ensure bucket '{bucket}': {e}"));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload_url(&self) -> Result<String, StorageError> {
        use aws_sdk_s3::presigning::PresigningConfig;
        let key = format!("{}/{}", self.prefix, uuid::Uuid::new_v4());
        let presign = PresigningConfig::expires_in(self.upload_ttl)
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let req = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .presigned(presign)
            .await
            .map_err(|e| {
                error!("presign put_object failed key={key} bucket={} err={:?}", self.bucket, e);
                StorageError::Other(e.to_string())
            })?;
        Ok(req.uri().to_string())
    }

    fn normalize_path(&self, raw: &str) -> String {
        normalize_object_path(raw, &self.bucket, &self.prefix)
    }

    async fn load(&self, object_path: &str) -> Result<(Vec<u8>, String), StorageError> {
        let key = object_key(object_path, &self.prefix)?;
        let obj = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let svc = e.into_service_error();
                if svc.is_no_such_key() {
                    StorageError::NotFound
                } else {
                    StorageError::Other(svc.to_string())
                }
            })?;
        let declared = obj.content_type().map(str::to_string);
        let data = obj
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        let bytes = data.into_bytes().to_vec();
        // presigned uploads often arrive as octet-stream; sniff in that case
        let mime = match declared {
            Some(ct) if ct != "application/octet-stream" => ct,
            _ => sniff_mime(&bytes),
        };
        Ok((bytes, mime))
    }
}

pub async fn build_object_store(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    Ok(Arc::new(S3ObjectStore::new(cfg).await?))
}
