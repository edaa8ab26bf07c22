//! 备份后端选择
//!
//! 负责持久化当前的备份位置，并在需要时构造对应的后端实例。
//! 与是否正在备份或恢复无关，编排层决定何时切换。

use crate::backend::{BackendLocation, BackupBackend, CloudBackend, LocalBackend};
use crate::config::{AppConfig, CloudBackendConfig};
use crate::constants::cloud::endpoints;
use crate::settings::SettingsStore;
use crate::Result;
use std::fmt;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// 根据备份位置构造后端
pub trait BackendFactory: Send + Sync + fmt::Debug {
    fn create(&self, location: BackendLocation) -> Result<Arc<dyn BackupBackend>>;
}

/// 按配置文件构造本地目录后端或云端后端
#[derive(Debug, Clone)]
pub struct DefaultBackendFactory {
    config: AppConfig,
    settings: SettingsStore,
    client: reqwest::Client,
}

impl DefaultBackendFactory {
    pub fn new(config: AppConfig, settings: SettingsStore) -> Result<Self> {
        Ok(Self {
            config,
            settings,
            client: CloudBackend::default_client()?,
        })
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, location: BackendLocation) -> Result<Arc<dyn BackupBackend>> {
        let backend: Arc<dyn BackupBackend> = match location {
            BackendLocation::Local => Arc::new(LocalBackend::new(self.config.get_backup_dir())),
            BackendLocation::Cloud => Arc::new(CloudBackend::new(
                self.client.clone(),
                self.config.cloud.origin.clone(),
                self.config.cloud.max_upload_bytes,
                self.settings.clone(),
            )),
        };
        Ok(backend)
    }
}

/// 备份后端选择器
#[derive(Debug, Clone)]
pub struct BackendSelector {
    settings: SettingsStore,
    factory: Arc<dyn BackendFactory>,
    cloud: CloudBackendConfig,
}

impl BackendSelector {
    pub fn new(
        settings: SettingsStore,
        factory: Arc<dyn BackendFactory>,
        cloud: CloudBackendConfig,
    ) -> Self {
        Self {
            settings,
            factory,
            cloud,
        }
    }

    /// 读取已保存的备份位置
    pub async fn restore_backend_location(&self) -> Result<Option<BackendLocation>> {
        self.settings.backend_location().await
    }

    /// 保存备份位置，位置未变化时不写入，返回是否发生了变化
    pub async fn save_backend_location(&self, location: BackendLocation) -> Result<bool> {
        if self.settings.backend_location().await? == Some(location) {
            return Ok(false);
        }
        self.settings.set_backend_location(location).await?;
        Ok(true)
    }

    /// 构造指定位置的后端，认证状态在首次使用时才会检查
    pub fn init_backend(&self, location: BackendLocation) -> Result<Arc<dyn BackupBackend>> {
        let backend = self.factory.create(location)?;
        info!(location = %location, "备份后端已初始化");
        Ok(backend)
    }

    /// 按已保存的位置恢复后端
    pub async fn restore_backend(
        &self,
    ) -> Result<Option<(BackendLocation, Arc<dyn BackupBackend>)>> {
        match self.restore_backend_location().await? {
            Some(location) => Ok(Some((location, self.init_backend(location)?))),
            None => Ok(None),
        }
    }

    /// 云端登录入口地址
    pub fn login_link(&self) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}{}",
            self.cloud.origin.trim_end_matches('/'),
            endpoints::LOGIN
        ))?;
        url.query_pairs_mut()
            .append_pair("scope", &self.cloud.auth_scope);
        Ok(url)
    }
}
