// 本地 DuckDB 存储
//
// 一个 Actor 独占数据库连接，其余部分通过 `DuckDbManager` 发送消息访问。
// 保存三类数据：
// - app_config: 持久化设置（备份位置、备份时间、授权信息等）
// - records: 需要备份的本地记录
// - change_log: 等待下一次增量备份的变更

mod actor;
mod manager;
mod messages;
mod models;

pub use manager::DuckDbManager;
pub use models::{ChangeOperation, ChangeRecord, StoreSize, StoredRecord};

pub type Database = DuckDbManager;
