//! Database connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use thiserror::Error;
use training_core::StoreError;

/// Database connection handle. Cheap to clone.
pub type Database = Surreal<Any>;

const DEFAULT_NAMESPACE: &str = "trainq";
const DEFAULT_DATABASE: &str = "main";

/// Where the job records live.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// `mem://`, `file://<path>` or `rocksdb://<path>`
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    /// Root user and password, if the server requires sign-in.
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::at("mem://")
    }
}

impl DbConfig {
    /// Any SurrealDB endpoint, with the default namespace and database.
    pub fn at(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            credentials: None,
        }
    }

    /// In-memory; every connection starts empty.
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn file(path: impl AsRef<str>) -> Self {
        Self::at(format!("file://{}", path.as_ref()))
    }

    /// Requires the `rocksdb` feature.
    pub fn rocksdb(path: impl AsRef<str>) -> Self {
        Self::at(format!("rocksdb://{}", path.as_ref()))
    }

    /// Overlay `DB_ENDPOINT`, `DB_NAMESPACE` and `DB_DATABASE` on the defaults.
    ///
    /// Credentials are used only when both `DB_USER` and `DB_PASS` are set.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let mut config = var("DB_ENDPOINT").map(Self::at).unwrap_or_default();
        if let Some(namespace) = var("DB_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Some(database) = var("DB_DATABASE") {
            config.database = database;
        }
        config.credentials = var("DB_USER").zip(var("DB_PASS"));
        config
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SurrealDB error: {0}")]
    Surreal(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Open a connection and select the configured namespace and database.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = any::connect(&config.endpoint).await?;
    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }
    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;

    tracing::info!(
        "Using database {}/{}",
        config.namespace,
        config.database
    );
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_keep_default_names() {
        let config = DbConfig::rocksdb("./data/jobs");
        assert_eq!(config.endpoint, "rocksdb://./data/jobs");
        assert_eq!(config.namespace, "trainq");
        assert_eq!(config.database, "main");
        assert!(config.credentials.is_none());

        let config = DbConfig::memory()
            .with_namespace("test")
            .with_credentials("root", "secret");
        assert_eq!(config.endpoint, "mem://");
        assert_eq!(config.namespace, "test");
        assert_eq!(config.credentials, Some(("root".into(), "secret".into())));
    }
}
