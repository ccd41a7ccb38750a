//! Where artifacts are kept, and how to read that from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use object_store::ObjectStore;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;

use crate::StorageError;

const DEFAULT_FS_ROOT: &str = "./data/artifacts";
const DEFAULT_REGION: &str = "us-east-1";

/// An S3-compatible bucket (AWS, MinIO, R2...).
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            allow_http: false,
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            virtual_hosted_style: false,
        }
    }

    /// Read `S3_BUCKET`, `AWS_REGION`, `S3_ENDPOINT`, `S3_ALLOW_HTTP`,
    /// `S3_VIRTUAL_HOSTED_STYLE` and the `AWS_*` credentials.
    ///
    /// Plain-http endpoints enable `allow_http` unless it is set explicitly.
    pub fn from_env() -> Result<Self, StorageError> {
        let bucket = env_var("S3_BUCKET").ok_or_else(|| {
            StorageError::InvalidConfig("S3_BUCKET is required for the s3 backend".into())
        })?;

        let mut cfg = Self::new(bucket);
        if let Some(region) = env_var("AWS_REGION") {
            cfg.region = region;
        }
        cfg.endpoint = env_var("S3_ENDPOINT");
        cfg.allow_http = match env_flag("S3_ALLOW_HTTP")? {
            Some(flag) => flag,
            None => cfg
                .endpoint
                .as_deref()
                .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://")),
        };
        cfg.virtual_hosted_style = env_flag("S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false);
        cfg.access_key_id = env_var("AWS_ACCESS_KEY_ID");
        cfg.secret_access_key = env_var("AWS_SECRET_ACCESS_KEY");
        cfg.session_token = env_var("AWS_SESSION_TOKEN");
        Ok(cfg)
    }

    fn build(self) -> Result<AmazonS3, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(self.bucket)
            .with_region(self.region)
            .with_allow_http(self.allow_http)
            .with_virtual_hosted_style_request(self.virtual_hosted_style);

        if let Some(endpoint) = self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let Some(key) = self.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = self.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(token) = self.session_token {
            builder = builder.with_token(token);
        }

        Ok(builder.build()?)
    }
}

/// Which object store holds the artifacts.
#[derive(Debug, Clone)]
pub enum Backend {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Backend::S3(_) => "s3",
            Backend::Filesystem { .. } => "filesystem",
            Backend::Memory => "memory",
        }
    }

    /// Connect to the backend. A filesystem root is created if missing.
    pub(crate) fn open(self) -> Result<Arc<dyn ObjectStore>, StorageError> {
        let store: Arc<dyn ObjectStore> = match self {
            Backend::S3(cfg) => Arc::new(cfg.build()?),
            Backend::Filesystem { root } => {
                std::fs::create_dir_all(&root)?;
                Arc::new(LocalFileSystem::new_with_prefix(&root)?)
            }
            Backend::Memory => Arc::new(InMemory::new()),
        };
        Ok(store)
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: Backend,
    /// Key prefix shared by every artifact, e.g. `trainq/`.
    pub prefix: Option<String>,
    /// Base URL prepended to keys in returned artifact refs.
    ///
    /// Without one, refs are the bare object keys.
    pub public_url: Option<String>,
}

impl StorageConfig {
    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            prefix: None,
            public_url: None,
        }
    }

    pub fn memory() -> Self {
        Self::with_backend(Backend::Memory)
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::with_backend(Backend::Filesystem { root: root.into() })
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self::with_backend(Backend::S3(cfg))
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// `STORAGE_BACKEND` picks `s3`, `filesystem` (or `fs`) or `memory` (or
    /// `mem`); unset means filesystem under `STORAGE_FS_ROOT`, default
    /// `./data/artifacts`. The s3 backend reads [`S3Config::from_env`].
    /// `STORAGE_PREFIX` and `STORAGE_PUBLIC_URL` apply to every backend.
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = match env_var("STORAGE_BACKEND").as_deref() {
            Some("s3") => Backend::S3(S3Config::from_env()?),
            Some("filesystem" | "fs") | None => Backend::Filesystem {
                root: env_var("STORAGE_FS_ROOT")
                    .unwrap_or_else(|| DEFAULT_FS_ROOT.to_string())
                    .into(),
            },
            Some("memory" | "mem") => Backend::Memory,
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self {
            backend,
            prefix: env_var("STORAGE_PREFIX"),
            public_url: env_var("STORAGE_PUBLIC_URL"),
        })
    }
}

/// Trimmed value, or `None` when blank.
pub(crate) fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(non_empty)
}

fn parse_flag(name: &str, value: &str) -> Result<bool, StorageError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(StorageError::InvalidConfig(format!(
            "{name}={value} is not a boolean"
        ))),
    }
}

fn env_flag(name: &str) -> Result<Option<bool>, StorageError> {
    env_var(name)
        .map(|value| parse_flag(name, &value))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_accept_common_spellings() {
        assert!(parse_flag("X", "Yes").unwrap());
        assert!(parse_flag("X", "on").unwrap());
        assert!(!parse_flag("X", " 0 ").unwrap());
        assert!(matches!(
            parse_flag("X", "maybe"),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn blank_values_are_unset() {
        assert_eq!(non_empty("   ".to_string()), None);
        assert_eq!(non_empty(" a/ ".to_string()), Some("a/".to_string()));
    }

    #[test]
    fn s3_defaults() {
        let cfg = S3Config::new("models");
        assert_eq!(cfg.region, "us-east-1");
        assert!(!cfg.allow_http);
        assert_eq!(StorageConfig::s3(cfg).backend.name(), "s3");
    }
}
