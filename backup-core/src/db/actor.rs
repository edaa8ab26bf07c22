use crate::Result;
use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::DbMessage;
use super::models::{ChangeRecord, StoreSize, StoredRecord};
use crate::BackupError;

/// DuckDB Actor - 确保单线程访问DuckDB
pub struct DuckDbActor {
    connection: Connection,
}

impl DuckDbActor {
    /// 创建新的DuckDB Actor
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let connection = Connection::open(db_path)?;
        Ok(Self { connection })
    }

    /// 创建内存DuckDB Actor
    pub fn new_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        Ok(Self { connection })
    }

    /// 运行Actor消息循环
    pub async fn run(mut self, mut receiver: mpsc::Receiver<DbMessage>) {
        info!("DuckDB Actor 已启动");

        while let Some(message) = receiver.recv().await {
            if let DbMessage::Close { respond_to } = message {
                let _ = respond_to.send(());
                break;
            }
            self.handle_message(message);
        }

        info!("DuckDB Actor 已关闭");
    }

    /// 处理数据库消息
    fn handle_message(&mut self, message: DbMessage) {
        match message {
            DbMessage::InitTables { respond_to } => {
                let _ = respond_to.send(self.init_tables());
            }
            DbMessage::Close { respond_to } => {
                let _ = respond_to.send(());
            }
            DbMessage::GetConfig { key, respond_to } => {
                let _ = respond_to.send(self.get_config(&key));
            }
            DbMessage::SetConfig {
                key,
                value,
                respond_to,
            } => {
                let _ = respond_to.send(self.set_config(&key, &value));
            }
            DbMessage::DeleteConfig { key, respond_to } => {
                let _ = respond_to.send(self.delete_config(&key));
            }
            DbMessage::PutRecord {
                key,
                payload,
                respond_to,
            } => {
                let _ = respond_to.send(self.put_record(&key, &payload));
            }
            DbMessage::DeleteRecord { key, respond_to } => {
                let _ = respond_to.send(self.delete_record(&key));
            }
            DbMessage::GetRecord { key, respond_to } => {
                let _ = respond_to.send(self.get_record(&key));
            }
            DbMessage::ListRecordKeys { respond_to } => {
                let _ = respond_to.send(self.list_record_keys());
            }
            DbMessage::MeasureRecords { respond_to } => {
                let _ = respond_to.send(self.measure_records());
            }
            DbMessage::AppendChange { change, respond_to } => {
                let _ = respond_to.send(self.append_change(&change));
            }
            DbMessage::TakeChanges { respond_to } => {
                let _ = respond_to.send(self.take_changes());
            }
            DbMessage::ClearChanges { respond_to } => {
                let _ = respond_to.send(self.clear_changes());
            }
            DbMessage::CountChanges { respond_to } => {
                let _ = respond_to.send(self.count_changes());
            }
        }
    }

    /// 初始化数据库表
    fn init_tables(&mut self) -> Result<()> {
        debug!("正在初始化DuckDB表...");

        // 读取并执行SQL初始化脚本
        let sql_content = include_str!("../../migrations/init_duckdb.sql");

        // 按分号分割SQL语句并执行
        for statement in sql_content.split(';').filter(|s| !s.trim().is_empty()) {
            self.connection.execute(statement.trim(), [])?;
        }

        info!("DuckDB表初始化完成");
        Ok(())
    }

    /// 获取配置值
    fn get_config(&mut self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .connection
            .prepare("SELECT config_value FROM app_config WHERE config_key = ?")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            let json_value: String = row.get(0)?;
            // 尝试解析JSON，如果是字符串则去掉引号
            match serde_json::from_str::<serde_json::Value>(&json_value) {
                Ok(serde_json::Value::String(s)) => Ok(Some(s)),
                _ => Ok(Some(json_value)),
            }
        } else {
            Ok(None)
        }
    }

    /// 设置配置值
    fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        let json_value = serde_json::Value::String(value.to_string()).to_string();
        self.connection.execute(
            "INSERT OR REPLACE INTO app_config (config_key, config_value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
            params![key, json_value],
        )?;
        Ok(())
    }

    /// 删除配置值
    fn delete_config(&mut self, key: &str) -> Result<()> {
        self.connection
            .execute("DELETE FROM app_config WHERE config_key = ?", params![key])?;
        Ok(())
    }

    /// 写入记录，返回写入前记录是否已存在
    fn put_record(&mut self, key: &str, payload: &str) -> Result<bool> {
        let existed = self.record_exists(key)?;
        self.connection.execute(
            "INSERT OR REPLACE INTO records (record_key, payload, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)",
            params![key, payload],
        )?;
        Ok(existed)
    }

    /// 删除记录，返回是否确实删除了数据
    fn delete_record(&mut self, key: &str) -> Result<bool> {
        let deleted = self
            .connection
            .execute("DELETE FROM records WHERE record_key = ?", params![key])?;
        Ok(deleted > 0)
    }

    fn record_exists(&mut self, key: &str) -> Result<bool> {
        let count: i64 = self.connection.query_row(
            "SELECT COUNT(*) FROM records WHERE record_key = ?",
            params![key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 读取记录
    fn get_record(&mut self, key: &str) -> Result<Option<StoredRecord>> {
        let mut stmt = self
            .connection
            .prepare("SELECT record_key, payload FROM records WHERE record_key = ?")?;
        let mut rows = stmt.query(params![key])?;

        if let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let payload: String = row.get(1)?;
            Ok(Some(StoredRecord {
                key,
                payload: serde_json::from_str(&payload)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// 列出所有记录的键
    fn list_record_keys(&mut self) -> Result<Vec<String>> {
        let mut stmt = self
            .connection
            .prepare("SELECT record_key FROM records ORDER BY record_key")?;
        let key_iter = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for key in key_iter {
            keys.push(key?);
        }

        Ok(keys)
    }

    /// 统计记录数量与体积
    fn measure_records(&mut self) -> Result<StoreSize> {
        let (records, bytes): (i64, i64) = self.connection.query_row(
            "SELECT COUNT(*), CAST(COALESCE(SUM(strlen(payload)), 0) AS BIGINT) FROM records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(StoreSize {
            records: records.max(0) as u64,
            bytes: bytes.max(0) as u64,
        })
    }

    /// 追加一条变更
    fn append_change(&mut self, change: &ChangeRecord) -> Result<()> {
        self.connection.execute(
            "INSERT INTO change_log (record_key, operation, changed_at) VALUES (?, ?, ?)",
            params![
                change.key,
                change.operation.as_str(),
                change.timestamp.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// 取出并删除当前所有变更，按写入顺序返回
    fn take_changes(&mut self) -> Result<Vec<ChangeRecord>> {
        let mut stmt = self.connection.prepare(
            "SELECT seq, record_key, operation, changed_at FROM change_log ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut last_seq = None;
        let mut changes = Vec::new();
        for row in rows {
            let (seq, key, operation, changed_at) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&changed_at)
                .map_err(|e| BackupError::Database(format!("变更时间格式错误: {e}")))?
                .with_timezone(&Utc);
            changes.push(ChangeRecord {
                key,
                operation: operation.parse()?,
                timestamp,
            });
            last_seq = Some(seq);
        }

        if let Some(last_seq) = last_seq {
            self.connection
                .execute("DELETE FROM change_log WHERE seq <= ?", params![last_seq])?;
        }

        Ok(changes)
    }

    /// 清空变更日志
    fn clear_changes(&mut self) -> Result<()> {
        self.connection.execute("DELETE FROM change_log", [])?;
        Ok(())
    }

    /// 统计待备份的变更数量
    fn count_changes(&mut self) -> Result<u64> {
        let count: i64 =
            self.connection
                .query_row("SELECT COUNT(*) FROM change_log", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}
