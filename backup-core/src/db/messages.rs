use crate::Result;
use tokio::sync::oneshot;

use super::models::{ChangeRecord, StoreSize, StoredRecord};

/// DuckDB数据库操作消息
#[derive(Debug)]
pub enum DbMessage {
    /// 初始化数据库表
    InitTables {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 关闭Actor
    Close {
        respond_to: oneshot::Sender<()>,
    },

    // ========== 配置项 ==========
    /// 获取配置值
    GetConfig {
        key: String,
        respond_to: oneshot::Sender<Result<Option<String>>>,
    },
    /// 设置配置值
    SetConfig {
        key: String,
        value: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 删除配置值
    DeleteConfig {
        key: String,
        respond_to: oneshot::Sender<Result<()>>,
    },

    // ========== 数据记录 ==========
    /// 写入或覆盖记录
    PutRecord {
        key: String,
        payload: String,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    /// 删除记录
    DeleteRecord {
        key: String,
        respond_to: oneshot::Sender<Result<bool>>,
    },
    /// 读取记录
    GetRecord {
        key: String,
        respond_to: oneshot::Sender<Result<Option<StoredRecord>>>,
    },
    /// 列出所有记录的键
    ListRecordKeys {
        respond_to: oneshot::Sender<Result<Vec<String>>>,
    },
    /// 统计记录数量与体积
    MeasureRecords {
        respond_to: oneshot::Sender<Result<StoreSize>>,
    },

    // ========== 变更日志 ==========
    /// 追加一条变更
    AppendChange {
        change: ChangeRecord,
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 取出并删除当前所有变更
    TakeChanges {
        respond_to: oneshot::Sender<Result<Vec<ChangeRecord>>>,
    },
    /// 清空变更日志
    ClearChanges {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// 统计待备份的变更数量
    CountChanges {
        respond_to: oneshot::Sender<Result<u64>>,
    },
}
