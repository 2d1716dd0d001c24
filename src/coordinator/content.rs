//! 结果内容后处理：把引用本地文件的 FileData 上传到对象存储，URI 改写为对象名
//!
//! 在副本上改写；任一上传失败则整体返回错误，调用方拿不到部分改写的结果。

use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::models::{Content, Part};
use crate::storage::{ObjectStore, DEFAULT_BUCKET};

const FILE_SCHEME: &str = "file://";

/// 至少两个字符的 scheme，单字母视为 Windows 盘符
static SCHEME_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn scheme_re() -> Option<&'static Regex> {
    SCHEME_RE
        .get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]+:").ok())
        .as_ref()
}

/// 无 scheme 或 `file://` 即本地路径
pub fn is_local_path(uri: &str) -> bool {
    if uri.is_empty() {
        return false;
    }
    if uri.starts_with(FILE_SCHEME) {
        return true;
    }
    match scheme_re() {
        Some(re) => !re.is_match(uri),
        None => !uri.contains("://"),
    }
}

fn local_file_path(uri: &str) -> &str {
    uri.strip_prefix(FILE_SCHEME).unwrap_or(uri)
}

pub struct ContentProcessor {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ContentProcessor {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            bucket: DEFAULT_BUCKET.to_string(),
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub async fn process(
        &self,
        contents: &[Content],
        cancel: &CancellationToken,
    ) -> Result<Vec<Content>, AgentError> {
        let mut processed = contents.to_vec();
        for content in &mut processed {
            for part in &mut content.parts {
                let Part::FileData(file) = part else {
                    continue;
                };
                if !is_local_path(&file.file_uri) {
                    continue;
                }
                tracing::info!(uri = %file.file_uri, "uploading local file to object store");
                let object_name = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    r = self.upload(&file.file_uri, &file.mime_type) => r,
                }
                .map_err(|e| {
                    tracing::error!(uri = %file.file_uri, "failed to upload file: {}", e);
                    AgentError::ContentProcessing(format!(
                        "failed to upload file '{}': {}",
                        file.file_uri, e
                    ))
                })?;
                tracing::info!(object_name = %object_name, bucket = %self.bucket, "file uploaded");
                file.file_uri = object_name;
            }
        }
        Ok(processed)
    }

    /// 返回 `<uuid><原扩展名>` 形式的对象名
    async fn upload(&self, uri: &str, content_type: &str) -> Result<String, AgentError> {
        self.store.ensure_bucket(&self.bucket).await?;

        let path = Path::new(local_file_path(uri));
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let object_name = format!("{}{}", uuid::Uuid::new_v4(), extension);

        self.store
            .put(&self.bucket, &object_name, Box::new(file), size, content_type)
            .await?;
        Ok(object_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileData, Role};
    use crate::storage::{InMemoryObjectStore, ObjectReader};
    use async_trait::async_trait;

    fn file_turn(uri: &str) -> Content {
        Content::new(
            Role::Model,
            vec![Part::FileData(FileData {
                display_name: None,
                file_uri: uri.to_string(),
                mime_type: "image/png".into(),
            })],
        )
    }

    fn uri_of(content: &Content) -> &str {
        match &content.parts[0] {
            Part::FileData(f) => &f.file_uri,
            other => panic!("unexpected part {:?}", other),
        }
    }

    #[test]
    fn test_is_local_path() {
        assert!(is_local_path("/tmp/out.png"));
        assert!(is_local_path("relative/out.png"));
        assert!(is_local_path("file:///tmp/out.png"));
        assert!(is_local_path(r"C:\tmp\out.png"));
        assert!(!is_local_path("https://example.com/a.png"));
        assert!(!is_local_path("s3://bucket/a.png"));
        assert!(!is_local_path("gs://bucket/a.png"));
        assert!(!is_local_path(""));
    }

    #[tokio::test]
    async fn test_local_file_is_uploaded_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        std::fs::write(&path, b"png-bytes").unwrap();
        let local_uri = path.to_string_lossy().to_string();

        let store = Arc::new(InMemoryObjectStore::new());
        let processor = ContentProcessor::new(store.clone());
        let input = vec![
            Content::text(Role::Model, "here is the chart"),
            file_turn(&local_uri),
            file_turn("https://example.com/a.png"),
        ];

        let out = processor.process(&input, &CancellationToken::new()).await.unwrap();
        assert_eq!(out[0], input[0]);
        assert_eq!(out[2], input[2]);

        let object_name = uri_of(&out[1]);
        assert_ne!(object_name, local_uri);
        assert!(object_name.ends_with(".png"));
        let stored = store.object(DEFAULT_BUCKET, object_name).await.unwrap();
        assert_eq!(&stored.data[..], b"png-bytes");
        assert_eq!(stored.content_type, "image/png");
        // 原输入保持不变
        assert_eq!(uri_of(&input[1]), local_uri);
    }

    #[tokio::test]
    async fn test_remote_uri_untouched() {
        let store = Arc::new(InMemoryObjectStore::new());
        let processor = ContentProcessor::new(store.clone()).with_bucket("custom");
        let input = vec![file_turn("https://example.com/a.png")];
        let out = processor.process(&input, &CancellationToken::new()).await.unwrap();
        assert_eq!(out, input);
        assert_eq!(store.object_count("custom").await, 0);
    }

    #[tokio::test]
    async fn test_missing_file_fails_whole_operation() {
        let processor = ContentProcessor::new(Arc::new(InMemoryObjectStore::new()));
        let input = vec![file_turn("/definitely/not/here.png")];
        let err = processor.process(&input, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::ContentProcessing(msg) if msg.contains("/definitely/not/here.png")));
    }

    struct RejectingStore;

    #[async_trait]
    impl ObjectStore for RejectingStore {
        async fn ensure_bucket(&self, _bucket: &str) -> Result<(), AgentError> {
            Ok(())
        }

        async fn put(
            &self,
            _bucket: &str,
            _object_name: &str,
            _reader: ObjectReader,
            _size: u64,
            _content_type: &str,
        ) -> Result<(), AgentError> {
            Err(AgentError::Storage("quota exceeded".into()))
        }

        async fn get(&self, _bucket: &str, _object_name: &str, _dest: &Path) -> Result<(), AgentError> {
            Err(AgentError::Storage("unsupported".into()))
        }
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let processor = ContentProcessor::new(Arc::new(RejectingStore));
        let uri = format!("file://{}", path.display());
        let err = processor
            .process(&[file_turn(&uri)], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ContentProcessing(msg) if msg.contains("quota exceeded")));
    }
}
