//! Artifact naming and the [`ArtifactStore`] implementation.
//!
//! Objects live under one folder per kind (`datasets/`, `models/`, `docs/`).
//! A ref is either the bare key or `<public url>/<key>`; deletion only needs
//! the last path segment of a ref, so refs written by other tools into the
//! same folders can be cleaned up too.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use training_core::{ArtifactError, ArtifactKind, ArtifactStore};
use ulid::Ulid;

use crate::{Storage, StorageError};

/// A fresh object key for an artifact of `kind`.
pub fn artifact_key(kind: ArtifactKind) -> String {
    format!("{}/{}.{}", kind.folder(), Ulid::new(), kind.extension())
}

/// Derive the object key behind `location`.
pub fn key_from_ref(location: &str, kind: ArtifactKind) -> Result<String, ArtifactError> {
    let without_query = location.split(['?', '#']).next().unwrap_or_default();
    let name = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    if name.is_empty() || name == "." || name == ".." {
        return Err(ArtifactError::InvalidRef(location.to_string()));
    }

    Ok(format!("{}/{}", kind.folder(), name))
}

impl Storage {
    /// Store an artifact under a fresh key and return its ref.
    pub async fn upload_artifact(
        &self,
        data: Bytes,
        kind: ArtifactKind,
    ) -> Result<String, ArtifactError> {
        let key = artifact_key(kind);
        let upload_err = |e: StorageError| ArtifactError::Upload {
            kind: kind.to_string(),
            reason: e.to_string(),
        };

        self.put(&key, data).await.map_err(upload_err)?;
        let location = self.public_ref(&key).map_err(upload_err)?;

        tracing::debug!("Uploaded {} artifact to {}", kind, location);
        Ok(location)
    }

    /// Delete the artifact behind `location`. Missing objects count as deleted.
    pub async fn delete_artifact(
        &self,
        location: &str,
        kind: ArtifactKind,
    ) -> Result<(), ArtifactError> {
        let key = key_from_ref(location, kind)?;

        match self.remove(&key).await {
            Ok(()) => {
                tracing::debug!("Deleted {} artifact {}", kind, key);
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} artifact {} already gone", kind, key);
                Ok(())
            }
            Err(e) => Err(ArtifactError::Delete {
                location: location.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl ArtifactStore for Storage {
    fn upload(&self, data: Bytes, kind: ArtifactKind) -> BoxFuture<'_, Result<String, ArtifactError>> {
        Box::pin(self.upload_artifact(data, kind))
    }

    fn delete<'a>(
        &'a self,
        location: &'a str,
        kind: ArtifactKind,
    ) -> BoxFuture<'a, Result<(), ArtifactError>> {
        Box::pin(self.delete_artifact(location, kind))
    }
}
