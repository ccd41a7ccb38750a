//! Object storage for datasets, trained models and generated documentation.
//!
//! Built on `object_store`: S3-compatible buckets in production, a local
//! directory for development and memory for tests. [`Storage`] implements the
//! [`training_core::ArtifactStore`] interface.

mod artifacts;
mod config;

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload};

pub use artifacts::{artifact_key, key_from_ref};
pub use config::{Backend, S3Config, StorageConfig};

use config::non_empty;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("invalid object key '{0}'")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectStore(object_store::Error::NotFound { .. })
        )
    }
}

/// Maps artifact keys to store paths and to the refs handed to callers.
#[derive(Debug, Clone, Default)]
struct KeyLayout {
    /// Normalized: no leading or trailing slash, never empty.
    prefix: Option<String>,
    /// Normalized: no trailing slash.
    public_url: Option<String>,
}

impl KeyLayout {
    fn new(prefix: Option<String>, public_url: Option<String>) -> Self {
        Self {
            prefix: prefix
                .and_then(non_empty)
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
            public_url: public_url
                .and_then(non_empty)
                .map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    fn path(&self, key: &str) -> Result<Path, StorageError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(match &self.prefix {
            Some(prefix) => Path::from(format!("{prefix}/{key}")),
            None => Path::from(key),
        })
    }

    fn public_ref(&self, key: &str) -> Result<String, StorageError> {
        let path = self.path(key)?;
        Ok(match &self.public_url {
            Some(base) => format!("{base}/{path}"),
            None => path.to_string(),
        })
    }
}

/// Artifact storage over one `object_store` backend.
#[derive(Clone)]
pub struct Storage {
    backend: &'static str,
    store: Arc<dyn ObjectStore>,
    layout: KeyLayout,
}

impl Storage {
    pub async fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let backend = cfg.backend.name();
        let store = cfg.backend.open()?;
        tracing::info!("Artifact storage backend: {}", backend);

        Ok(Self {
            backend,
            store,
            layout: KeyLayout::new(cfg.prefix, cfg.public_url),
        })
    }

    pub async fn from_env() -> Result<Self, StorageError> {
        Self::new(StorageConfig::from_env()?).await
    }

    /// Name of the configured backend (`s3`, `filesystem`, `memory`).
    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// The ref handed out for an object key.
    pub fn public_ref(&self, key: &str) -> Result<String, StorageError> {
        self.layout.public_ref(key)
    }

    pub async fn put(&self, key: &str, bytes: Bytes) -> Result<(), StorageError> {
        let path = self.layout.path(key)?;
        self.store.put(&path, PutPayload::from(bytes)).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.layout.path(key)?;
        Ok(self.store.get(&path).await?.bytes().await?)
    }

    pub async fn contains(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.layout.path(key)?;
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.layout.path(key)?;
        self.store.delete(&path).await?;
        Ok(())
    }
}
