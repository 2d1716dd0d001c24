//! 对象存储：ensure_bucket / put / get
//!
//! LocalObjectStore 以目录为 bucket 落盘；InMemoryObjectStore 供测试使用。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

use crate::core::AgentError;

pub const DEFAULT_BUCKET: &str = "hive-agent-files";

pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), AgentError>;

    /// 从 reader 读取恰好 size 字节写入对象
    async fn put(
        &self,
        bucket: &str,
        object_name: &str,
        reader: ObjectReader,
        size: u64,
        content_type: &str,
    ) -> Result<(), AgentError>;

    async fn get(&self, bucket: &str, object_name: &str, dest: &Path) -> Result<(), AgentError>;
}

/// bucket 与对象名都只允许单段名称
fn validate_name(kind: &str, name: &str) -> Result<(), AgentError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(AgentError::Storage(format!("invalid {} name: {:?}", kind, name)));
    }
    Ok(())
}

async fn read_exact_size(reader: ObjectReader, size: u64) -> Result<Vec<u8>, AgentError> {
    let mut data = Vec::with_capacity(size as usize);
    reader.take(size).read_to_end(&mut data).await?;
    if data.len() as u64 != size {
        return Err(AgentError::Storage(format!(
            "short read: expected {} bytes, got {}",
            size,
            data.len()
        )));
    }
    Ok(data)
}

pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, AgentError> {
        validate_name("bucket", bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, object_name: &str) -> Result<PathBuf, AgentError> {
        validate_name("object", object_name)?;
        Ok(self.bucket_dir(bucket)?.join(object_name))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), AgentError> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&dir).await? {
            tracing::info!(bucket, "bucket not found, creating it");
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        object_name: &str,
        reader: ObjectReader,
        size: u64,
        content_type: &str,
    ) -> Result<(), AgentError> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(AgentError::Storage(format!("bucket does not exist: {}", bucket)));
        }
        let path = self.object_path(bucket, object_name)?;
        let data = read_exact_size(reader, size).await?;
        tokio::fs::write(&path, &data).await?;
        tracing::debug!(bucket, object_name, size, content_type, "object stored");
        Ok(())
    }

    async fn get(&self, bucket: &str, object_name: &str, dest: &Path) -> Result<(), AgentError> {
        let path = self.object_path(bucket, object_name)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(AgentError::Storage(format!(
                "object not found: {}/{}",
                bucket, object_name
            )));
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&path, dest).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    buckets: RwLock<HashMap<String, HashMap<String, StoredObject>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object(&self, bucket: &str, object_name: &str) -> Option<StoredObject> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .and_then(|b| b.get(object_name))
            .cloned()
    }

    pub async fn object_count(&self, bucket: &str) -> usize {
        self.buckets.read().await.get(bucket).map_or(0, HashMap::len)
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> Result<(), AgentError> {
        validate_name("bucket", bucket)?;
        self.buckets.write().await.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn put(
        &self,
        bucket: &str,
        object_name: &str,
        reader: ObjectReader,
        size: u64,
        content_type: &str,
    ) -> Result<(), AgentError> {
        validate_name("object", object_name)?;
        let data = read_exact_size(reader, size).await?;
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| AgentError::Storage(format!("bucket does not exist: {}", bucket)))?;
        objects.insert(
            object_name.to_string(),
            StoredObject {
                data: Bytes::from(data),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, object_name: &str, dest: &Path) -> Result<(), AgentError> {
        let object = self.object(bucket, object_name).await.ok_or_else(|| {
            AgentError::Storage(format!("object not found: {}/{}", bucket, object_name))
        })?;
        tokio::fs::write(dest, &object.data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &'static [u8]) -> ObjectReader {
        Box::new(data)
    }

    #[tokio::test]
    async fn test_local_store_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path().join("objects"));

        let err = store.put(DEFAULT_BUCKET, "a.txt", reader(b"hello"), 5, "text/plain").await;
        assert!(matches!(err, Err(AgentError::Storage(_))));

        store.ensure_bucket(DEFAULT_BUCKET).await.unwrap();
        store.ensure_bucket(DEFAULT_BUCKET).await.unwrap();
        store
            .put(DEFAULT_BUCKET, "a.txt", reader(b"hello"), 5, "text/plain")
            .await
            .unwrap();

        let dest = dir.path().join("out/a.txt");
        store.get(DEFAULT_BUCKET, "a.txt", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello");

        assert!(store.get(DEFAULT_BUCKET, "missing", &dest).await.is_err());
        assert!(store.ensure_bucket("../escape").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_checks_size() {
        let store = InMemoryObjectStore::new();
        store.ensure_bucket("b").await.unwrap();
        let short = store.put("b", "x.bin", reader(b"abc"), 10, "application/octet-stream").await;
        assert!(matches!(short, Err(AgentError::Storage(_))));

        store.put("b", "x.bin", reader(b"abcdef"), 3, "application/octet-stream").await.unwrap();
        let obj = store.object("b", "x.bin").await.unwrap();
        assert_eq!(&obj.data[..], b"abc");
        assert_eq!(store.object_count("b").await, 1);
    }
}
