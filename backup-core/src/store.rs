use crate::{BackupError, Result};
use crate::change_queue::ChangeTrackingQueue;
use crate::db::{ChangeOperation, ChangeRecord, Database, StoreSize, StoredRecord};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// 本地数据存储
///
/// 记录保存在 DuckDB 的 `records` 表中。开启变更记录后，每次写入或删除
/// 都会向 [`ChangeTrackingQueue`] 追加一条变更，供下一次增量备份使用。
#[derive(Debug)]
pub struct LocalStore {
    db: Database,
    queue: Arc<ChangeTrackingQueue>,
    recording: AtomicBool,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        let queue = Arc::new(ChangeTrackingQueue::new(db.clone()));
        Self {
            db,
            queue,
            recording: AtomicBool::new(false),
        }
    }

    pub fn change_queue(&self) -> &Arc<ChangeTrackingQueue> {
        &self.queue
    }

    /// 是否正在记录变更
    pub fn recording_changes(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// 开始记录变更（重复调用无副作用）
    pub fn start_recording_changes(&self) {
        if !self.recording.swap(true, Ordering::AcqRel) {
            tracing::info!("开始记录本地数据变更");
        }
    }

    /// 丢弃所有尚未备份的变更
    pub async fn forget_all_changes(&self) -> Result<()> {
        self.queue.clear().await
    }

    /// 写入记录
    pub async fn put(&self, key: &str, payload: &serde_json::Value) -> Result<()> {
        if key.is_empty() {
            return Err(BackupError::EmptyKey);
        }
        let existed = self.db.put_record(key, payload).await?;
        if self.recording_changes() {
            let operation = if existed {
                ChangeOperation::Update
            } else {
                ChangeOperation::Create
            };
            self.queue.enqueue(ChangeRecord::new(key, operation));
        }
        Ok(())
    }

    /// 删除记录
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let deleted = self.db.delete_record(key).await?;
        if deleted && self.recording_changes() {
            self.queue
                .enqueue(ChangeRecord::new(key, ChangeOperation::Delete));
        }
        Ok(deleted)
    }

    /// 写入记录但不产生变更（用于恢复）
    pub async fn put_untracked(&self, key: &str, payload: &serde_json::Value) -> Result<()> {
        self.db.put_record(key, payload).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<StoredRecord>> {
        self.db.get_record(key).await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.db.list_record_keys().await
    }

    pub async fn len(&self) -> Result<u64> {
        Ok(self.db.measure_records().await?.records)
    }

    /// 估算首次全量备份的体积
    pub async fn estimate_size(&self) -> Result<StoreSize> {
        self.db.measure_records().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_changes_only_recorded_when_enabled() {
        let store = LocalStore::new(Database::connect_memory().await.unwrap());

        store.put("a", &json!(1)).await.unwrap();
        assert_eq!(store.change_queue().pending().await.unwrap(), 0);

        store.start_recording_changes();
        store.start_recording_changes();
        assert!(store.recording_changes());

        store.put("a", &json!(2)).await.unwrap();
        store.put("b", &json!(3)).await.unwrap();
        store.delete("a").await.unwrap();
        // 删除不存在的记录不产生变更
        store.delete("missing").await.unwrap();
        store.put_untracked("c", &json!(4)).await.unwrap();

        let ops: Vec<_> = store
            .change_queue()
            .drain()
            .await
            .unwrap()
            .into_iter()
            .map(|c| (c.key, c.operation))
            .collect();
        assert_eq!(
            ops,
            vec![
                ("a".to_string(), ChangeOperation::Update),
                ("b".to_string(), ChangeOperation::Create),
                ("a".to_string(), ChangeOperation::Delete),
            ]
        );
        assert_eq!(store.keys().await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected() {
        let store = LocalStore::new(Database::connect_memory().await.unwrap());
        store.start_recording_changes();

        assert!(matches!(
            store.put("", &json!(1)).await,
            Err(BackupError::EmptyKey)
        ));
        assert_eq!(store.len().await.unwrap(), 0);
        assert_eq!(store.change_queue().pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_forget_all_changes() {
        let store = LocalStore::new(Database::connect_memory().await.unwrap());
        store.start_recording_changes();
        store.put("a", &json!({"x": 1})).await.unwrap();

        store.forget_all_changes().await.unwrap();
        assert_eq!(store.change_queue().pending().await.unwrap(), 0);

        let size = store.estimate_size().await.unwrap();
        assert_eq!(size.records, 1);
    }
}
