//! Blob storage capability and its backends
//!
//! A [`BlobStore`] offers put/get by path with overwrite semantics. Backends
//! are chosen from a URL:
//! - `file:///var/etl/out` writes under a local directory
//! - `memory://` keeps objects in process memory
//! - `s3://bucket/prefix` talks to S3 (requires the `s3` feature)

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("sdk error: {0}")]
    Sdk(String),
}

impl From<std::io::Error> for BlobError {
    fn from(e: std::io::Error) -> Self {
        BlobError::Io(e.to_string())
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `path`, replacing any existing object
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), BlobError>;

    /// Read the object at `path`
    async fn get(&self, path: &str) -> Result<Bytes, BlobError>;

    /// Human readable location, used in log messages
    fn location(&self) -> String;
}

/// Open the backend addressed by `url`
pub async fn open_blob_store(url: &Url) -> Result<Arc<dyn BlobStore>, BlobError> {
    match url.scheme() {
        "file" => {
            let root = url
                .to_file_path()
                .map_err(|_| BlobError::Configuration(format!("invalid file URL: {}", url)))?;
            Ok(Arc::new(LocalBlobStore::new(root)))
        }
        "memory" => Ok(Arc::new(MemoryBlobStore::new())),
        #[cfg(feature = "s3")]
        "s3" => Ok(Arc::new(s3::S3BlobStore::from_url(url).await?)),
        other => Err(BlobError::Configuration(format!(
            "unsupported blob store scheme '{}'",
            other
        ))),
    }
}

/// Reject absolute paths and parent traversal
fn relative_key(path: &str) -> Result<PathBuf, BlobError> {
    let candidate = Path::new(path);
    if path.is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(BlobError::InvalidPath(path.to_string()));
    }
    Ok(candidate.to_path_buf())
}

/// Blob store rooted at a local directory
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), BlobError> {
        let target = self.root.join(relative_key(path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobError> {
        let target = self.root.join(relative_key(path)?);
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn location(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

/// Blob store kept in process memory
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths currently stored, sorted
    pub fn paths(&self) -> Vec<String> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = objects.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl fmt::Debug for MemoryBlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlobStore")
            .field("paths", &self.paths())
            .finish()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Bytes) -> Result<(), BlobError> {
        relative_key(path)?;
        let mut objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects.insert(path.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Bytes, BlobError> {
        let objects = self.objects.lock().unwrap_or_else(|e| e.into_inner());
        objects
            .get(path)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(path.to_string()))
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(feature = "s3")]
mod s3 {
    use super::{BlobError, BlobStore};
    use crate::storage::codec::BlobFormat;
    use async_trait::async_trait;
    use aws_config::BehaviorVersion;
    use aws_credential_types::Credentials;
    use aws_credential_types::provider::SharedCredentialsProvider;
    use aws_sdk_s3::Client;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::error::SdkError;
    use aws_sdk_s3::primitives::ByteStream;
    use bytes::Bytes;
    use url::Url;

    /// S3 backend; credentials come from the default AWS provider chain
    /// unless `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` are set.
    pub struct S3BlobStore {
        client: Client,
        bucket: String,
        prefix: String,
    }

    impl S3BlobStore {
        pub async fn from_url(url: &Url) -> Result<Self, BlobError> {
            let bucket = url
                .host_str()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| BlobError::Configuration("bucket name cannot be empty".into()))?
                .to_string();
            let prefix = url.path().trim_matches('/').to_string();

            let region =
                std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
            let mut loader =
                aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

            if let (Ok(access_key), Ok(secret_key)) = (
                std::env::var("AWS_ACCESS_KEY_ID"),
                std::env::var("AWS_SECRET_ACCESS_KEY"),
            ) {
                let credentials = Credentials::new(access_key, secret_key, None, None, "static");
                loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
            }

            let shared_config = loader.load().await;
            let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
            if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }

            Ok(Self {
                client: Client::from_conf(builder.build()),
                bucket,
                prefix,
            })
        }

        fn key(&self, path: &str) -> String {
            if self.prefix.is_empty() {
                path.to_string()
            } else {
                format!("{}/{}", self.prefix, path)
            }
        }
    }

    #[async_trait]
    impl BlobStore for S3BlobStore {
        async fn put(&self, path: &str, bytes: Bytes) -> Result<(), BlobError> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(self.key(path))
                .set_content_type(
                    BlobFormat::for_path(path).map(|f| f.content_type().to_string()),
                )
                .body(ByteStream::from(bytes.to_vec()))
                .send()
                .await
                .map_err(|e| BlobError::Sdk(e.to_string()))?;
            Ok(())
        }

        async fn get(&self, path: &str) -> Result<Bytes, BlobError> {
            let output = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(self.key(path))
                .send()
                .await
                .map_err(|err| match err {
                    SdkError::ServiceError(service_err) => {
                        let message = service_err.err().to_string();
                        if message.contains("NoSuchKey") {
                            BlobError::NotFound(path.to_string())
                        } else {
                            BlobError::Sdk(message)
                        }
                    }
                    other => BlobError::Sdk(other.to_string()),
                })?;

            let data = output
                .body
                .collect()
                .await
                .map_err(|e| BlobError::Sdk(e.to_string()))?;
            Ok(data.into_bytes())
        }

        fn location(&self) -> String {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }
}
