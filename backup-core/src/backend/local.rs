use super::{BackendLocation, BackupBackend, BackupObject, ObjectStream, SizeEstimator};
use crate::constants::{notifications, storage::OBJECT_EXTENSION};
use crate::notifier::Notifier;
use crate::{BackupError, Result};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use std::path::{Path, PathBuf};
use url::Url;
use walkdir::WalkDir;

/// 本地目录备份后端
///
/// 每个对象保存为一个 JSON 文件，文件名由对象键编码得到。
#[derive(Debug, Clone)]
pub struct LocalBackend {
    dir: PathBuf,
}

impl LocalBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, key: &str) -> PathBuf {
        let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.dir.join(format!("{encoded}.{OBJECT_EXTENSION}"))
    }

    /// 列出备份目录下的对象文件，按文件名排序
    async fn object_files(&self) -> Result<Vec<PathBuf>> {
        let dir = self.dir.clone();

        // 在后台线程中遍历目录，避免阻塞异步运行时
        tokio::task::spawn_blocking(move || {
            if !dir.exists() {
                return Ok(Vec::new());
            }

            let mut files = Vec::new();
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
                let entry = entry?;
                let path = entry.path();
                if path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(OBJECT_EXTENSION)
                {
                    files.push(path.to_path_buf());
                }
            }
            Ok::<_, BackupError>(files)
        })
        .await?
    }

    async fn read_object(path: PathBuf) -> Result<BackupObject> {
        let content = tokio::fs::read(&path).await.map_err(|e| {
            BackupError::transfer(format!("读取备份文件失败 {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_slice(&content)?)
    }
}

impl BackupBackend for LocalBackend {
    fn location(&self) -> BackendLocation {
        BackendLocation::Local
    }

    fn is_authenticated(&self) -> BoxFuture<'_, bool> {
        futures::future::ready(true).boxed()
    }

    fn handle_login_redirected_back<'a>(&'a self, _url: &'a Url) -> BoxFuture<'a, Result<()>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn send_notification_on_failure<'a>(
        &'a self,
        id: &'a str,
        notifier: &'a dyn Notifier,
        _estimate_size: &'a SizeEstimator,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let accessible = tokio::fs::metadata(&self.dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            let error_id = if accessible {
                id.to_string()
            } else {
                notifications::LOCAL_LOCATION_ERROR.to_string()
            };
            notifier.dispatch(&error_id);
            Ok(error_id)
        }
        .boxed()
    }

    fn store_object<'a>(&'a self, object: &'a BackupObject) -> BoxFuture<'a, Result<()>> {
        async move {
            // 空键会编码成隐藏文件 `.json`，列举时找不到
            if object.key.is_empty() {
                return Err(BackupError::EmptyKey);
            }
            tokio::fs::create_dir_all(&self.dir).await?;

            // 先写临时文件再重命名，避免留下写了一半的对象
            let path = self.object_path(&object.key);
            let temp_path = path.with_extension("tmp");
            let content = serde_json::to_vec(object)?;
            tokio::fs::write(&temp_path, content)
                .await
                .map_err(|e| BackupError::transfer(format!("写入备份文件失败: {e}")))?;
            tokio::fs::rename(&temp_path, &path)
                .await
                .map_err(|e| BackupError::transfer(format!("写入备份文件失败: {e}")))?;
            Ok(())
        }
        .boxed()
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            match tokio::fs::remove_file(self.object_path(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(BackupError::transfer(format!("删除备份文件失败: {e}"))),
            }
        }
        .boxed()
    }

    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.list_objects()
            .map_ok(|object| object.key)
            .try_collect::<Vec<_>>()
            .boxed()
    }

    fn object_count(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        async move { Ok(Some(self.object_files().await?.len() as u64)) }.boxed()
    }

    fn list_objects(&self) -> ObjectStream<'_> {
        stream::once(self.object_files())
            .map_ok(|files| stream::iter(files.into_iter().map(Ok::<_, BackupError>)))
            .try_flatten()
            .and_then(Self::read_object)
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreSize;
    use crate::notifier::LogNotifier;
    use serde_json::json;
    use tempfile::tempdir;

    fn object(key: &str, payload: serde_json::Value) -> BackupObject {
        BackupObject {
            key: key.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn test_store_list_and_delete() {
        let temp_dir = tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path().join("backups"));

        // 目录尚不存在时视为空
        assert_eq!(backend.object_count().await.unwrap(), Some(0));

        backend
            .store_object(&object("pages/1", json!({"title": "one"})))
            .await
            .unwrap();
        backend
            .store_object(&object("pages/2", json!({"title": "two"})))
            .await
            .unwrap();
        backend
            .store_object(&object("pages/1", json!({"title": "uno"})))
            .await
            .unwrap();

        let objects: Vec<_> = backend.list_objects().try_collect().await.unwrap();
        assert_eq!(
            objects,
            vec![
                object("pages/1", json!({"title": "uno"})),
                object("pages/2", json!({"title": "two"})),
            ]
        );

        backend.delete_object("pages/1").await.unwrap();
        // 重复删除不报错
        backend.delete_object("pages/1").await.unwrap();
        assert_eq!(backend.list_keys().await.unwrap(), vec!["pages/2"]);
        assert!(backend.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_unusual_keys_survive_listing() {
        let temp_dir = tempdir().unwrap();
        let backend = LocalBackend::new(temp_dir.path());

        let keys = ["a/b", "a.b", ".hidden", "中文 key", "100%"];
        for (i, key) in keys.iter().enumerate() {
            backend.store_object(&object(key, json!(i))).await.unwrap();
        }

        let mut listed = backend.list_keys().await.unwrap();
        listed.sort();
        let mut expected: Vec<_> = keys.iter().map(|k| k.to_string()).collect();
        expected.sort();
        assert_eq!(listed, expected);
        assert_eq!(backend.object_count().await.unwrap(), Some(keys.len() as u64));

        assert!(matches!(
            backend.store_object(&object("", json!(0))).await,
            Err(BackupError::EmptyKey)
        ));
        assert_eq!(backend.object_count().await.unwrap(), Some(keys.len() as u64));
    }

    #[tokio::test]
    async fn test_failure_notification_checks_directory() {
        let temp_dir = tempdir().unwrap();
        let estimate: Box<SizeEstimator> = Box::new(|| {
            futures::future::ready(Ok::<_, BackupError>(StoreSize::default())).boxed()
        });

        let missing = LocalBackend::new(temp_dir.path().join("missing"));
        let id = missing
            .send_notification_on_failure("backup_error", &LogNotifier, estimate.as_ref())
            .await
            .unwrap();
        assert_eq!(id, notifications::LOCAL_LOCATION_ERROR);

        let present = LocalBackend::new(temp_dir.path());
        let id = present
            .send_notification_on_failure("backup_error", &LogNotifier, estimate.as_ref())
            .await
            .unwrap();
        assert_eq!(id, "backup_error");
    }
}
