use crate::constants::storage::DB_CHANNEL_CAPACITY;
use crate::{BackupError, Result};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

use super::actor::DuckDbActor;
use super::messages::DbMessage;
use super::models::{ChangeRecord, StoreSize, StoredRecord};

/// DuckDB数据库管理器
#[derive(Debug, Clone)]
pub struct DuckDbManager {
    sender: mpsc::Sender<DbMessage>,
}

impl DuckDbManager {
    /// 连接到数据库文件
    pub async fn connect<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        // 确保数据库文件的父目录存在
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let actor = DuckDbActor::new(db_path)?;
        Self::spawn(actor).await
    }

    /// 连接到内存数据库 (主要用于测试，生产环境建议使用connect()以确保数据持久化)
    pub async fn connect_memory() -> Result<Self> {
        let actor = DuckDbActor::new_memory()?;
        Self::spawn(actor).await
    }

    async fn spawn(actor: DuckDbActor) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(DB_CHANNEL_CAPACITY);
        tokio::spawn(actor.run(receiver));

        let manager = Self { sender };
        manager
            .call(|respond_to| DbMessage::InitTables { respond_to })
            .await?;

        Ok(manager)
    }

    /// 关闭数据库，等待Actor退出
    pub async fn close(&self) -> Result<()> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(DbMessage::Close { respond_to })
            .await
            .map_err(|_| BackupError::Database("数据库Actor已关闭".to_string()))?;

        receiver
            .await
            .map_err(|_| BackupError::Database("等待数据库响应超时".to_string()))
    }

    /// 发送消息并等待Actor回复
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> DbMessage,
    ) -> Result<T> {
        let (respond_to, receiver) = oneshot::channel();

        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| BackupError::Database("数据库Actor已关闭".to_string()))?;

        receiver
            .await
            .map_err(|_| BackupError::Database("等待数据库响应超时".to_string()))?
    }

    /// 获取配置值
    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.call(|respond_to| DbMessage::GetConfig { key, respond_to })
            .await
    }

    /// 设置配置值
    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.call(|respond_to| DbMessage::SetConfig {
            key,
            value,
            respond_to,
        })
        .await
    }

    /// 删除配置值
    pub async fn delete_config(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.call(|respond_to| DbMessage::DeleteConfig { key, respond_to })
            .await
    }

    /// 写入记录，返回写入前记录是否已存在
    pub async fn put_record(&self, key: &str, payload: &serde_json::Value) -> Result<bool> {
        let key = key.to_string();
        let payload = serde_json::to_string(payload)?;
        self.call(|respond_to| DbMessage::PutRecord {
            key,
            payload,
            respond_to,
        })
        .await
    }

    /// 删除记录，返回是否确实删除了数据
    pub async fn delete_record(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.call(|respond_to| DbMessage::DeleteRecord { key, respond_to })
            .await
    }

    /// 读取记录
    pub async fn get_record(&self, key: &str) -> Result<Option<StoredRecord>> {
        let key = key.to_string();
        self.call(|respond_to| DbMessage::GetRecord { key, respond_to })
            .await
    }

    /// 列出所有记录的键
    pub async fn list_record_keys(&self) -> Result<Vec<String>> {
        self.call(|respond_to| DbMessage::ListRecordKeys { respond_to })
            .await
    }

    /// 统计记录数量与体积
    pub async fn measure_records(&self) -> Result<StoreSize> {
        self.call(|respond_to| DbMessage::MeasureRecords { respond_to })
            .await
    }

    /// 追加一条变更
    pub async fn append_change(&self, change: ChangeRecord) -> Result<()> {
        self.call(|respond_to| DbMessage::AppendChange { change, respond_to })
            .await
    }

    /// 取出并删除当前所有变更
    pub async fn take_changes(&self) -> Result<Vec<ChangeRecord>> {
        self.call(|respond_to| DbMessage::TakeChanges { respond_to })
            .await
    }

    /// 清空变更日志
    pub async fn clear_changes(&self) -> Result<()> {
        self.call(|respond_to| DbMessage::ClearChanges { respond_to })
            .await
    }

    /// 统计待备份的变更数量
    pub async fn count_changes(&self) -> Result<u64> {
        self.call(|respond_to| DbMessage::CountChanges { respond_to })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ChangeOperation;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_storage() {
        let temp_dir = tempdir().unwrap();
        let db = DuckDbManager::connect(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        // 测试配置存储
        db.set_config("test_key", "test_value").await.unwrap();
        assert_eq!(
            db.get_config("test_key").await.unwrap(),
            Some("test_value".to_string())
        );

        // 覆盖写入
        db.set_config("test_key", "other").await.unwrap();
        assert_eq!(db.get_config("test_key").await.unwrap(), Some("other".to_string()));

        // 删除后不存在
        db.delete_config("test_key").await.unwrap();
        assert_eq!(db.get_config("test_key").await.unwrap(), None);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_operations() {
        let db = DuckDbManager::connect_memory().await.unwrap();

        assert!(!db.put_record("a", &json!({"title": "A"})).await.unwrap());
        assert!(db.put_record("a", &json!({"title": "A2"})).await.unwrap());
        db.put_record("b", &json!([1, 2, 3])).await.unwrap();

        let record = db.get_record("a").await.unwrap().unwrap();
        assert_eq!(record.payload, json!({"title": "A2"}));
        assert_eq!(db.list_record_keys().await.unwrap(), vec!["a", "b"]);

        let size = db.measure_records().await.unwrap();
        assert_eq!(size.records, 2);
        assert!(size.bytes > 0);

        assert!(db.delete_record("a").await.unwrap());
        assert!(!db.delete_record("a").await.unwrap());
        assert_eq!(db.get_record("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_change_log_is_taken_in_order() {
        let db = DuckDbManager::connect_memory().await.unwrap();

        db.append_change(ChangeRecord::new("x", ChangeOperation::Create))
            .await
            .unwrap();
        db.append_change(ChangeRecord::new("y", ChangeOperation::Update))
            .await
            .unwrap();
        db.append_change(ChangeRecord::new("x", ChangeOperation::Delete))
            .await
            .unwrap();
        assert_eq!(db.count_changes().await.unwrap(), 3);

        let taken = db.take_changes().await.unwrap();
        let summary: Vec<_> = taken.iter().map(|c| (c.key.as_str(), c.operation)).collect();
        assert_eq!(
            summary,
            vec![
                ("x", ChangeOperation::Create),
                ("y", ChangeOperation::Update),
                ("x", ChangeOperation::Delete),
            ]
        );

        // 取出后变更日志为空
        assert_eq!(db.count_changes().await.unwrap(), 0);
        assert!(db.take_changes().await.unwrap().is_empty());
    }
}
