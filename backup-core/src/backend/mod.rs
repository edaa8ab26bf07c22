//! 备份后端
//!
//! 后端只需要满足控制面约定：认证状态、登录回调、失败通知，以及
//! 按对象写入/删除/列出数据。字节级的传输细节由各实现自行决定。

mod cloud;
mod local;

pub use cloud::CloudBackend;
pub use local::LocalBackend;

use crate::db::{StoreSize, StoredRecord};
use crate::notifier::Notifier;
use crate::{BackupError, Result};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// 备份对象，与本地记录一一对应
pub type BackupObject = StoredRecord;

/// 按后端定义的顺序逐个产出的备份对象
pub type ObjectStream<'a> = BoxStream<'a, Result<BackupObject>>;

/// 延迟计算的本地数据体积估算
pub type SizeEstimator = dyn Fn() -> BoxFuture<'static, Result<StoreSize>> + Send + Sync;

/// 备份位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendLocation {
    Local,
    Cloud,
}

impl BackendLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendLocation::Local => "local",
            BackendLocation::Cloud => "cloud",
        }
    }
}

impl fmt::Display for BackendLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendLocation {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendLocation::Local),
            // 兼容旧版本保存的 google-drive
            "cloud" | "google-drive" => Ok(BackendLocation::Cloud),
            other => Err(BackupError::InvalidLocation(other.to_string())),
        }
    }
}

/// 备份后端能力约定
pub trait BackupBackend: Send + Sync + fmt::Debug {
    fn location(&self) -> BackendLocation;

    /// 认证失败不会报错，而是返回 false
    fn is_authenticated(&self) -> BoxFuture<'_, bool>;

    /// 处理登录完成后的重定向地址
    fn handle_login_redirected_back<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<()>>;

    /// 备份失败时决定并发送通知，返回实际使用的错误ID
    fn send_notification_on_failure<'a>(
        &'a self,
        id: &'a str,
        notifier: &'a dyn Notifier,
        estimate_size: &'a SizeEstimator,
    ) -> BoxFuture<'a, Result<String>>;

    /// 写入或覆盖一个对象
    fn store_object<'a>(&'a self, object: &'a BackupObject) -> BoxFuture<'a, Result<()>>;

    /// 删除一个对象，对象不存在时视为成功
    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// 列出后端已有对象的键
    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// 对象总数，无法预先得知时返回 None
    fn object_count(&self) -> BoxFuture<'_, Result<Option<u64>>>;

    /// 惰性地产出所有对象
    fn list_objects(&self) -> ObjectStream<'_>;
}
