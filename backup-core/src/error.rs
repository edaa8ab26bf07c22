use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("配置错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置序列化错误: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("DuckDB数据库错误: {0}")]
    Database(String),

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL 解析错误: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// 备份与恢复不能同时进行
    #[error("操作冲突: {0}")]
    Conflict(String),

    #[error("没有正在进行的{0}任务")]
    NoActiveProcedure(&'static str),

    #[error("备份后端未配置")]
    BackendNotConfigured,

    #[error("记录键不能为空")]
    EmptyKey,

    #[error("无效的备份位置: {0}")]
    InvalidLocation(String),

    #[error("备份后端认证失败: {0}")]
    BackendAuth(String),

    #[error("备份数据传输失败: {0}")]
    BackendTransfer(String),

    #[error("自动备份授权检查失败: {0}")]
    EntitlementProbe(String),

    #[error("自定义错误: {0}")]
    Custom(String),
}

// 为DuckDB错误实现From trait
impl From<duckdb::Error> for BackupError {
    fn from(err: duckdb::Error) -> Self {
        BackupError::Database(err.to_string())
    }
}

impl BackupError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::BackendTransfer(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self::BackendAuth(msg.into())
    }

    pub fn entitlement(msg: impl Into<String>) -> Self {
        Self::EntitlementProbe(msg.into())
    }
}
