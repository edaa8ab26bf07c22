use crate::backend::BackendLocation;
use crate::constants::settings as keys;
use crate::db::Database;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 最近一次备份的结果，供前端展示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupStatus {
    pub state: BackupStatusState,
    #[serde(rename = "backupId")]
    pub backup_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatusState {
    Success,
    Fail,
}

/// 自动备份授权信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub active: bool,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<String>,
}

/// 持久化设置
///
/// 进程内唯一的持久化配置入口，所有字段都有明确的类型。
/// 通过 [`SettingsStore::open`] 初始化，底层数据库由调用方负责关闭。
#[derive(Debug, Clone)]
pub struct SettingsStore {
    db: Database,
}

impl SettingsStore {
    pub fn open(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn get_time(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.db.get_config(key).await?.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }

    async fn get_flag(&self, key: &str) -> Result<Option<bool>> {
        Ok(self
            .db
            .get_config(key)
            .await?
            .and_then(|s| s.parse::<bool>().ok()))
    }

    // ========================================
    // 备份位置
    // ========================================

    /// 读取已保存的备份位置
    pub async fn backend_location(&self) -> Result<Option<BackendLocation>> {
        Ok(self
            .db
            .get_config(keys::BACKEND_LOCATION)
            .await?
            .and_then(|s| s.parse().ok()))
    }

    /// 保存备份位置
    pub async fn set_backend_location(&self, location: BackendLocation) -> Result<()> {
        self.db
            .set_config(keys::BACKEND_LOCATION, location.as_str())
            .await?;
        tracing::info!("备份位置已更新: {}", location);
        Ok(())
    }

    // ========================================
    // 备份时间
    // ========================================

    /// 最近一次成功备份的开始时间
    pub async fn last_backup_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_time(keys::LAST_BACKUP_TIME).await
    }

    /// 最近一次成功备份的完成时间
    pub async fn last_backup_finish_time(&self) -> Result<Option<DateTime<Utc>>> {
        self.get_time(keys::LAST_BACKUP_FINISH_TIME).await
    }

    pub async fn store_last_backup_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.db
            .set_config(keys::LAST_BACKUP_TIME, &time.to_rfc3339())
            .await
    }

    pub async fn store_last_backup_finish_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.db
            .set_config(keys::LAST_BACKUP_FINISH_TIME, &time.to_rfc3339())
            .await
    }

    /// 删除所有备份时间，下一次备份将是全量备份
    pub async fn remove_backup_times(&self) -> Result<()> {
        self.db.delete_config(keys::LAST_BACKUP_TIME).await?;
        self.db.delete_config(keys::LAST_BACKUP_FINISH_TIME).await
    }

    /// 上一次备份被中断后，下一次必须重新从存储计算变更
    pub async fn full_backup_required(&self) -> Result<bool> {
        Ok(self
            .get_flag(keys::FULL_BACKUP_REQUIRED)
            .await?
            .unwrap_or(false))
    }

    pub async fn set_full_backup_required(&self, required: bool) -> Result<()> {
        if required {
            self.db
                .set_config(keys::FULL_BACKUP_REQUIRED, "true")
                .await
        } else {
            self.db.delete_config(keys::FULL_BACKUP_REQUIRED).await
        }
    }

    // ========================================
    // 备份状态
    // ========================================

    pub async fn backup_status(&self) -> Result<Option<BackupStatus>> {
        Ok(self
            .db
            .get_config(keys::BACKUP_STATUS)
            .await?
            .and_then(|s| serde_json::from_str(&s).ok()))
    }

    pub async fn set_backup_status(&self, status: &BackupStatus) -> Result<()> {
        self.db
            .set_config(keys::BACKUP_STATUS, &serde_json::to_string(status)?)
            .await
    }

    // ========================================
    // 用户与订阅
    // ========================================

    pub async fn user_id(&self) -> Result<Option<String>> {
        self.db.get_config(keys::USER_ID).await
    }

    pub async fn set_user_id(&self, user_id: &str) -> Result<()> {
        self.db.set_config(keys::USER_ID, user_id).await
    }

    pub async fn has_subscription(&self) -> Result<Option<bool>> {
        self.get_flag(keys::HAS_SUBSCRIPTION).await
    }

    pub async fn subscription_end_date(&self) -> Result<Option<String>> {
        self.db.get_config(keys::SUBSCRIPTION_END_DATE).await
    }

    /// 保存授权检查结果，便于排查问题
    pub async fn store_entitlement(&self, entitlement: &Entitlement) -> Result<()> {
        self.db
            .set_config(keys::HAS_SUBSCRIPTION, &entitlement.active.to_string())
            .await?;
        if let Some(end_date) = &entitlement.end_date {
            self.db
                .set_config(keys::SUBSCRIPTION_END_DATE, end_date)
                .await?;
        }
        Ok(())
    }

    // ========================================
    // 云端登录凭据
    // ========================================

    pub async fn cloud_access_token(&self) -> Result<Option<String>> {
        self.db.get_config(keys::CLOUD_ACCESS_TOKEN).await
    }

    pub async fn set_cloud_access_token(&self, token: &str) -> Result<()> {
        self.db.set_config(keys::CLOUD_ACCESS_TOKEN, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settings() -> SettingsStore {
        SettingsStore::open(Database::connect_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_backup_times() {
        let settings = settings().await;
        assert_eq!(settings.last_backup_time().await.unwrap(), None);

        let start = Utc::now();
        settings.store_last_backup_time(start).await.unwrap();
        settings.store_last_backup_finish_time(start).await.unwrap();
        assert_eq!(settings.last_backup_time().await.unwrap(), Some(start));
        assert_eq!(settings.last_backup_finish_time().await.unwrap(), Some(start));

        settings.remove_backup_times().await.unwrap();
        assert_eq!(settings.last_backup_time().await.unwrap(), None);
        assert_eq!(settings.last_backup_finish_time().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_backend_location_and_flags() {
        let settings = settings().await;
        assert_eq!(settings.backend_location().await.unwrap(), None);

        settings
            .set_backend_location(BackendLocation::Cloud)
            .await
            .unwrap();
        assert_eq!(
            settings.backend_location().await.unwrap(),
            Some(BackendLocation::Cloud)
        );

        assert!(!settings.full_backup_required().await.unwrap());
        settings.set_full_backup_required(true).await.unwrap();
        assert!(settings.full_backup_required().await.unwrap());
        settings.set_full_backup_required(false).await.unwrap();
        assert!(!settings.full_backup_required().await.unwrap());
    }

    #[tokio::test]
    async fn test_entitlement_and_status() {
        let settings = settings().await;
        settings
            .store_entitlement(&Entitlement {
                active: true,
                end_date: Some("2026-12-31".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(settings.has_subscription().await.unwrap(), Some(true));
        assert_eq!(
            settings.subscription_end_date().await.unwrap(),
            Some("2026-12-31".to_string())
        );

        let status = BackupStatus {
            state: BackupStatusState::Fail,
            backup_id: Some("auto_backup_expired".to_string()),
        };
        settings.set_backup_status(&status).await.unwrap();
        assert_eq!(settings.backup_status().await.unwrap(), Some(status));
    }
}
