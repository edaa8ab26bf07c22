/// 自动备份相关常量
pub mod schedule {
    use std::time::Duration;

    /// 两次自动备份之间的固定间隔（分钟）
    pub const AUTOMATIC_BACKUP_DELAY_MINUTES: i64 = 15;

    /// 两次自动备份之间的固定间隔
    pub const AUTOMATIC_BACKUP_DELAY: Duration =
        Duration::from_secs(AUTOMATIC_BACKUP_DELAY_MINUTES as u64 * 60);

    /// 自动备份开关的环境变量覆盖
    pub const AUTOMATIC_BACKUP_OVERRIDE_ENV: &str = "AUTOMATIC_BACKUP";

    /// 付费成功回调的环境变量覆盖（会模拟过期通知）
    pub const PAYMENT_OVERRIDE_ENV: &str = "AUTOMATIC_BACKUP_PAYMENT_SUCCESS";
}

/// 持久化设置项的键名
pub mod settings {
    pub const BACKEND_LOCATION: &str = "backup.backend_location";
    pub const LAST_BACKUP_TIME: &str = "backup.last_backup_time";
    pub const LAST_BACKUP_FINISH_TIME: &str = "backup.last_backup_finish_time";
    pub const FULL_BACKUP_REQUIRED: &str = "backup.full_backup_required";
    pub const BACKUP_STATUS: &str = "backup.status";
    pub const USER_ID: &str = "backup.user_id";
    pub const HAS_SUBSCRIPTION: &str = "backup.has_subscription";
    pub const SUBSCRIPTION_END_DATE: &str = "backup.subscription_end_date";
    pub const CLOUD_ACCESS_TOKEN: &str = "backup.cloud_access_token";
}

/// 通知ID
pub mod notifications {
    /// 自动备份订阅已过期
    pub const AUTO_BACKUP_EXPIRED: &str = "auto_backup_expired";

    /// 通用备份失败
    pub const BACKUP_ERROR: &str = "backup_error";

    /// 云端登录已失效
    pub const DRIVE_AUTH_ERROR: &str = "drive_auth_error";

    /// 云端剩余空间不足
    pub const DRIVE_SIZE_EMPTY: &str = "drive_size_empty";

    /// 本地备份目录不可用
    pub const LOCAL_LOCATION_ERROR: &str = "backup_location_error";
}

/// 云端服务相关常量
pub mod cloud {
    /// 默认云端服务地址
    pub const DEFAULT_ORIGIN: &str = "https://memex.cloud";

    /// 默认的 Google Drive 授权范围
    pub const DEFAULT_AUTH_SCOPE: &str = "https://www.googleapis.com/auth/drive.appdata";

    /// 默认单次备份允许上传的最大字节数（0 表示不限制）
    pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 0;

    /// API端点路径
    pub mod endpoints {
        /// 登录入口
        pub const LOGIN: &str = "/auth/google";

        /// 登录成功后的回调地址
        pub const LOGIN_CALLBACK: &str = "/auth/google/callback";

        /// 备份对象
        pub const OBJECTS: &str = "/backup/objects";

        /// 自动备份订阅查询
        pub const SUBSCRIPTION: &str = "/subscriptions/automatic-backup";

        /// 自动备份订阅购买成功的回调地址
        pub const SUBSCRIPTION_SUCCESS: &str = "/subscriptions/automatic-backup/success";
    }

    /// HTTP相关常量
    pub mod http {
        /// 默认连接超时时间（秒）
        pub const DEFAULT_TIMEOUT: u64 = 30;

        /// User-Agent头
        pub const USER_AGENT: &str = "backup-cli/0.1";
    }
}

/// 本地存储相关常量
pub mod storage {
    use std::path::{Path, PathBuf};

    /// 数据库文件名
    pub const DATABASE_FILE_NAME: &str = "backup.db";

    /// 本地备份目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 本地备份对象文件扩展名
    pub const OBJECT_EXTENSION: &str = "json";

    /// 数据库Actor消息队列容量
    pub const DB_CHANNEL_CAPACITY: usize = 100;

    /// 获取默认数据库路径
    pub fn get_default_database_path() -> PathBuf {
        Path::new(".").join(DATABASE_FILE_NAME)
    }

    /// 获取默认本地备份目录
    pub fn get_default_backup_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }
}

/// 配置文件相关常量
pub mod config {
    /// 按优先级查找的配置文件名
    pub const CONFIG_FILE_NAMES: [&str; 2] = ["config.toml", ".backup-cli.toml"];

    /// 默认配置文件名
    pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
}
