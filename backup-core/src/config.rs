use crate::constants::{cloud, config, storage};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub local: LocalBackendConfig,
    pub cloud: CloudBackendConfig,
    #[serde(default)]
    pub automatic_backup: AutomaticBackupConfig,
}

/// 本地数据库配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StorageConfig {
    pub database_path: String,
}

/// 本地备份后端配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LocalBackendConfig {
    pub backup_dir: String,
}

/// 云端备份后端配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CloudBackendConfig {
    pub origin: String,
    pub auth_scope: String,
    /// 单次备份允许上传的最大字节数，0 表示不限制
    #[serde(default)]
    pub max_upload_bytes: u64,
}

/// 自动备份的受控覆盖项（测试或受控环境使用）
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AutomaticBackupConfig {
    /// 设置后跳过授权检查，直接决定是否启用自动备份
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_override: Option<bool>,
    /// 模拟付费回调的结果，同时发送过期通知
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_override: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                database_path: storage::get_default_database_path()
                    .to_string_lossy()
                    .to_string(),
            },
            local: LocalBackendConfig {
                backup_dir: storage::get_default_backup_dir()
                    .to_string_lossy()
                    .to_string(),
            },
            cloud: CloudBackendConfig {
                origin: cloud::DEFAULT_ORIGIN.to_string(),
                auth_scope: cloud::DEFAULT_AUTH_SCOPE.to_string(),
                max_upload_bytes: cloud::DEFAULT_MAX_UPLOAD_BYTES,
            },
            automatic_backup: AutomaticBackupConfig::default(),
        }
    }
}

impl AppConfig {
    /// 智能查找并加载配置文件
    /// 按优先级查找：config.toml -> .backup-cli.toml
    pub fn find_and_load_config() -> Result<Self> {
        for config_file in &config::CONFIG_FILE_NAMES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        // 如果没找到配置文件，创建默认配置
        tracing::warn!("未找到配置文件，创建默认配置: {}", config::DEFAULT_CONFIG_FILE);
        let default_config = Self::default();
        default_config.save_to_file(config::DEFAULT_CONFIG_FILE)?;
        Ok(default_config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content)?;

        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let body = toml::to_string_pretty(self)?;
        let content = format!(
            "# 备份客户端配置文件\n# 自动备份覆盖项也可以通过环境变量 AUTOMATIC_BACKUP / AUTOMATIC_BACKUP_PAYMENT_SUCCESS 设置\n\n{body}"
        );
        fs::write(&path, content)?;
        Ok(())
    }

    /// 确保本地备份目录存在
    pub fn ensure_backup_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.local.backup_dir)?;
        Ok(())
    }

    /// 获取数据库文件路径
    pub fn get_database_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.database_path)
    }

    /// 获取本地备份目录路径
    pub fn get_backup_dir(&self) -> PathBuf {
        PathBuf::from(&self.local.backup_dir)
    }
}
