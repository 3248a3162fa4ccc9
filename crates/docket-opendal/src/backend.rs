//! Storage backend implementation.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use opendal::{Operator, services};

use crate::TRACING_TARGET;
use crate::config::StorageConfig;
use crate::error::{StorageError, StorageResult};

/// Unified storage backend that wraps an OpenDAL operator.
///
/// All pipeline blob access flows through this type; paths follow the
/// session blob contract from `docket_core::path`.
#[derive(Clone)]
pub struct StorageBackend {
    operator: Operator,
    config: StorageConfig,
}

impl StorageBackend {
    /// Creates a new storage backend from configuration.
    pub fn new(config: StorageConfig) -> StorageResult<Self> {
        let operator = Self::create_operator(&config)?;

        tracing::info!(
            target: TRACING_TARGET,
            backend = %config.backend_name(),
            "storage backend initialized"
        );

        Ok(Self { operator, config })
    }

    /// Returns the configuration for this backend.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Writes a blob, replacing any existing object at the path.
    pub async fn put(&self, path: &str, data: Bytes) -> StorageResult<()> {
        tracing::debug!(
            target: TRACING_TARGET,
            path = %path,
            size = data.len(),
            "writing blob"
        );

        self.operator
            .write(path, data)
            .await
            .map(|_| ())
            .map_err(|err| StorageError::from_opendal(path, err))
    }

    /// Reads a blob fully into memory.
    pub async fn get(&self, path: &str) -> StorageResult<Bytes> {
        let data = self
            .operator
            .read(path)
            .await
            .map_err(|err| StorageError::from_opendal(path, err))?;

        Ok(data.to_bytes())
    }

    /// Returns true if an object exists at the path.
    pub async fn exists(&self, path: &str) -> StorageResult<bool> {
        self.operator
            .exists(path)
            .await
            .map_err(|err| StorageError::from_opendal(path, err))
    }

    /// Server-side copy between two paths.
    pub async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        tracing::debug!(
            target: TRACING_TARGET,
            from = %from,
            to = %to,
            "copying blob"
        );

        self.operator
            .copy(from, to)
            .await
            .map_err(|err| StorageError::from_opendal(from, err))
    }

    /// Lists every object under a prefix, recursively.
    pub async fn list_by_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let entries = self
            .operator
            .list_with(prefix)
            .recursive(true)
            .await
            .map_err(|err| StorageError::from_opendal(prefix, err))?;

        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.path().to_string())
            .collect())
    }

    /// Deletes every object under a prefix, returning the number removed.
    ///
    /// Idempotent: a prefix with no remaining objects deletes zero.
    pub async fn delete_by_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let paths = match self.list_by_prefix(prefix).await {
            Ok(paths) => paths,
            Err(StorageError::NotFound { .. }) => return Ok(0),
            Err(err) => return Err(err),
        };

        let mut deleted = 0;
        for path in &paths {
            match self.operator.delete(path).await {
                Ok(()) => deleted += 1,
                Err(err) if err.kind() == opendal::ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::from_opendal(path, err)),
            }
        }

        tracing::debug!(
            target: TRACING_TARGET,
            prefix = %prefix,
            deleted,
            "deleted blobs under prefix"
        );

        Ok(deleted)
    }

    /// Opens a streaming reader over a blob.
    pub async fn read_stream(
        &self,
        path: &str,
    ) -> StorageResult<impl futures::Stream<Item = StorageResult<Bytes>> + Send + Unpin> {
        let reader = self
            .operator
            .reader(path)
            .await
            .map_err(|err| StorageError::from_opendal(path, err))?;

        let stream = reader
            .into_bytes_stream(0..u64::MAX)
            .await
            .map_err(|err| StorageError::from_opendal(path, err))?
            .map(|result| result.map_err(StorageError::Io));

        Ok(stream)
    }

    /// Writes a blob from a chunk stream without buffering it whole.
    pub async fn write_stream(
        &self,
        path: &str,
        mut stream: impl futures::Stream<Item = StorageResult<Bytes>> + Send + Unpin,
    ) -> StorageResult<()> {
        let mut writer = self
            .operator
            .writer(path)
            .await
            .map_err(|err| StorageError::from_opendal(path, err))?;

        while let Some(chunk) = stream.next().await {
            writer
                .write(chunk?)
                .await
                .map_err(|err| StorageError::from_opendal(path, err))?;
        }

        writer
            .close()
            .await
            .map(|_| ())
            .map_err(|err| StorageError::from_opendal(path, err))
    }

    /// Returns a presigned download URL, or `None` when the configured
    /// service has no presign capability (fs, memory).
    pub async fn presigned_url(&self, path: &str, ttl: Duration) -> StorageResult<Option<String>> {
        if !self.operator.info().full_capability().presign_read {
            return Ok(None);
        }

        let request = self
            .operator
            .presign_read(path, ttl)
            .await
            .map_err(|err| StorageError::from_opendal(path, err))?;

        Ok(Some(request.uri().to_string()))
    }

    /// Creates an OpenDAL operator based on configuration.
    fn create_operator(config: &StorageConfig) -> StorageResult<Operator> {
        match config {
            #[cfg(feature = "fs")]
            StorageConfig::Fs { root } => {
                let builder = services::Fs::default().root(root);
                Operator::new(builder)
                    .map(|op| op.finish())
                    .map_err(StorageError::Backend)
            }
            #[cfg(feature = "s3")]
            StorageConfig::S3 {
                bucket,
                region,
                endpoint,
                access_key_id,
                secret_access_key,
            } => {
                let mut builder = services::S3::default().bucket(bucket).region(region);

                if let Some(endpoint) = endpoint {
                    builder = builder.endpoint(endpoint);
                }
                if let Some(access_key_id) = access_key_id {
                    builder = builder.access_key_id(access_key_id);
                }
                if let Some(secret_access_key) = secret_access_key {
                    builder = builder.secret_access_key(secret_access_key);
                }

                Operator::new(builder)
                    .map(|op| op.finish())
                    .map_err(StorageError::Backend)
            }
            #[cfg(feature = "memory")]
            StorageConfig::Memory => Operator::new(services::Memory::default())
                .map(|op| op.finish())
                .map_err(StorageError::Backend),
        }
    }
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackend")
            .field("backend", &self.config.backend_name())
            .finish()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;

    fn memory_backend() -> StorageBackend {
        StorageBackend::new(StorageConfig::Memory).expect("memory operator")
    }

    #[tokio::test]
    async fn put_get_round_trip() -> StorageResult<()> {
        let storage = memory_backend();
        storage.put("a/b/c.pdf", Bytes::from_static(b"pdf")).await?;

        assert!(storage.exists("a/b/c.pdf").await?);
        assert_eq!(storage.get("a/b/c.pdf").await?, Bytes::from_static(b"pdf"));
        Ok(())
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let storage = memory_backend();
        let err = storage.get("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_by_prefix_counts_and_is_idempotent() -> StorageResult<()> {
        let storage = memory_backend();
        storage.put("s/1/a", Bytes::from_static(b"1")).await?;
        storage.put("s/1/b", Bytes::from_static(b"2")).await?;
        storage.put("s/2/c", Bytes::from_static(b"3")).await?;

        assert_eq!(storage.delete_by_prefix("s/1/").await?, 2);
        assert_eq!(storage.delete_by_prefix("s/1/").await?, 0);
        assert!(storage.exists("s/2/c").await?);
        Ok(())
    }

    #[tokio::test]
    async fn copy_duplicates_content() -> StorageResult<()> {
        let storage = memory_backend();
        storage.put("src", Bytes::from_static(b"x")).await?;
        storage.copy("src", "dst").await?;
        assert_eq!(storage.get("dst").await?, Bytes::from_static(b"x"));
        Ok(())
    }

    #[tokio::test]
    async fn memory_has_no_presign() -> StorageResult<()> {
        let storage = memory_backend();
        storage.put("x", Bytes::from_static(b"x")).await?;
        let url = storage
            .presigned_url("x", Duration::from_secs(60))
            .await?;
        assert!(url.is_none());
        Ok(())
    }
}
