//! 自动备份调度
//!
//! 授权检查的结果被缓存为一个共享 future，同一时刻最多只有一次检查在进行，
//! `force` 会重新检查。检查因网络失败时按“已授权”处理。
//!
//! 定时器由调度器持有：已有定时器或备份正在运行时不会重复安排，
//! 定时器触发后回调编排层开始备份。

use crate::config::AutomaticBackupConfig;
use crate::constants::cloud::endpoints;
use crate::constants::notifications;
use crate::constants::schedule::{AUTOMATIC_BACKUP_DELAY, AUTOMATIC_BACKUP_DELAY_MINUTES};
use crate::notifier::Notifier;
use crate::settings::{BackupStatus, BackupStatusState, Entitlement, SettingsStore};
use crate::{BackupError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 自动备份授权查询
pub trait EntitlementProbe: Send + Sync + fmt::Debug {
    fn probe<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Entitlement>>;
}

/// 通过云端接口查询授权
#[derive(Debug, Clone)]
pub struct HttpEntitlementProbe {
    client: reqwest::Client,
    origin: String,
}

impl HttpEntitlementProbe {
    pub fn new(client: reqwest::Client, origin: impl Into<String>) -> Self {
        let origin: String = origin.into();
        Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        }
    }
}

impl EntitlementProbe for HttpEntitlementProbe {
    fn probe<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Entitlement>> {
        async move {
            let url = format!("{}{}", self.origin, endpoints::SUBSCRIPTION);
            let response = self
                .client
                .get(&url)
                .query(&[("user", user_id)])
                .send()
                .await
                .map_err(|e| BackupError::entitlement(e.to_string()))?;

            if !response.status().is_success() {
                return Err(BackupError::entitlement(format!(
                    "授权查询失败: {}",
                    response.status()
                )));
            }
            response
                .json::<Entitlement>()
                .await
                .map_err(|e| BackupError::entitlement(e.to_string()))
        }
        .boxed()
    }
}

/// 共享的授权检查，多个调用方等待同一次检查
pub type EntitlementCheck = Shared<BoxFuture<'static, bool>>;

#[derive(Debug)]
struct ArmedTimer {
    id: u64,
    handle: JoinHandle<()>,
    next_run_at: DateTime<Utc>,
}

/// 自动备份调度器
pub struct AutomaticBackupScheduler {
    settings: SettingsStore,
    probe: Arc<dyn EntitlementProbe>,
    notifier: Arc<dyn Notifier>,
    overrides: AutomaticBackupConfig,
    check: Mutex<Option<EntitlementCheck>>,
    timer: Arc<Mutex<Option<ArmedTimer>>>,
    next_timer_id: AtomicU64,
}

impl fmt::Debug for AutomaticBackupScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutomaticBackupScheduler")
            .field("overrides", &self.overrides)
            .field("next_run_at", &self.next_run_at())
            .finish_non_exhaustive()
    }
}

impl AutomaticBackupScheduler {
    pub fn new(
        settings: SettingsStore,
        probe: Arc<dyn EntitlementProbe>,
        notifier: Arc<dyn Notifier>,
        overrides: AutomaticBackupConfig,
    ) -> Self {
        Self {
            settings,
            probe,
            notifier,
            overrides,
            check: Mutex::new(None),
            timer: Arc::new(Mutex::new(None)),
            next_timer_id: AtomicU64::new(1),
        }
    }

    pub fn overrides(&self) -> &AutomaticBackupConfig {
        &self.overrides
    }

    /// 自动备份是否可用
    ///
    /// 返回缓存的检查结果；没有缓存或 `force` 时发起新的检查。
    pub fn is_automatic_backup_enabled(&self, force: bool) -> EntitlementCheck {
        let mut check = self.check.lock().unwrap_or_else(PoisonError::into_inner);
        if !force {
            if let Some(existing) = check.as_ref() {
                return existing.clone();
            }
        }

        let fresh = match self.overrides.enabled_override {
            Some(enabled) => {
                debug!(enabled, "使用自动备份开关覆盖项");
                futures::future::ready(enabled).boxed().shared()
            }
            None => self.start_check(),
        };
        *check = Some(fresh.clone());
        fresh
    }

    /// 丢弃缓存的检查结果，下一次查询重新检查
    pub fn forget_check(&self) {
        *self.check.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn start_check(&self) -> EntitlementCheck {
        let settings = self.settings.clone();
        let probe = self.probe.clone();

        async move {
            let user_id = match settings.user_id().await {
                Ok(Some(user_id)) => user_id,
                Ok(None) => {
                    debug!("没有用户ID，自动备份不可用");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "读取用户ID失败");
                    return false;
                }
            };

            match probe.probe(&user_id).await {
                Ok(entitlement) => {
                    if let Err(e) = settings.store_entitlement(&entitlement).await {
                        warn!(error = %e, "保存授权信息失败");
                    }
                    info!(active = entitlement.active, "自动备份授权检查完成");
                    entitlement.active
                }
                Err(e) => {
                    // 网络失败时按已授权处理
                    warn!(error = %e, "自动备份授权检查失败，按已授权处理");
                    true
                }
            }
        }
        .boxed()
        .shared()
    }

    /// 使用付费回调的结果覆盖检查结果
    ///
    /// 同时发送过期通知并把备份状态标记为失败。
    pub async fn check_with_payment_override(&self, value: &str) -> Result<bool> {
        let enabled = value == "true";
        *self.check.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(futures::future::ready(enabled).boxed().shared());

        self.notifier.dispatch(notifications::AUTO_BACKUP_EXPIRED);
        self.settings
            .set_backup_status(&BackupStatus {
                state: BackupStatusState::Fail,
                backup_id: Some(notifications::AUTO_BACKUP_EXPIRED.to_string()),
            })
            .await?;
        Ok(enabled)
    }

    /// 安排下一次自动备份
    ///
    /// 已有定时器或备份正在运行时什么也不做，返回是否安排了新的定时器。
    pub fn schedule<F>(&self, backup_running: bool, now: DateTime<Utc>, on_fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() || backup_running {
            return false;
        }

        let id = self.next_timer_id.fetch_add(1, Ordering::Relaxed);
        let next_run_at = now + ChronoDuration::minutes(AUTOMATIC_BACKUP_DELAY_MINUTES);
        let timer = self.timer.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(AUTOMATIC_BACKUP_DELAY).await;
            {
                let mut slot = timer.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.as_ref().map(|t| t.id) == Some(id) {
                    *slot = None;
                }
            }
            info!("⏰ 自动备份定时器触发");
            on_fire();
        });

        info!(next_run_at = %next_run_at, "已安排下一次自动备份");
        *slot = Some(ArmedTimer {
            id,
            handle,
            next_run_at,
        });
        true
    }

    /// 取消已安排的定时器
    pub fn clear_timer(&self) {
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.handle.abort();
            debug!("已取消自动备份定时器");
        }
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| t.next_run_at)
    }

    pub fn is_timer_armed(&self) -> bool {
        self.next_run_at().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::test_support::{RecordingNotifier, ScriptedProbe};
    use std::sync::atomic::AtomicBool;

    async fn scheduler(
        probe: Arc<ScriptedProbe>,
        overrides: AutomaticBackupConfig,
    ) -> (AutomaticBackupScheduler, SettingsStore, Arc<RecordingNotifier>) {
        let settings = SettingsStore::open(Database::connect_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler =
            AutomaticBackupScheduler::new(settings.clone(), probe, notifier.clone(), overrides);
        (scheduler, settings, notifier)
    }

    #[tokio::test]
    async fn test_check_is_memoized_and_single_flight() {
        let probe = Arc::new(ScriptedProbe::active());
        let (scheduler, settings, _) = scheduler(probe.clone(), Default::default()).await;
        settings.set_user_id("user-1").await.unwrap();

        let (a, b) = tokio::join!(
            scheduler.is_automatic_backup_enabled(false),
            scheduler.is_automatic_backup_enabled(false)
        );
        assert!(a && b);
        assert!(scheduler.is_automatic_backup_enabled(false).await);
        assert_eq!(probe.calls(), 1);
        assert_eq!(settings.has_subscription().await.unwrap(), Some(true));

        probe.set_result(Ok(Entitlement {
            active: false,
            end_date: None,
        }));
        assert!(!scheduler.is_automatic_backup_enabled(true).await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test]
    async fn test_network_failure_fails_open() {
        let probe = Arc::new(ScriptedProbe::network_error());
        let (scheduler, settings, _) = scheduler(probe.clone(), Default::default()).await;
        settings.set_user_id("user-1").await.unwrap();

        assert!(scheduler.is_automatic_backup_enabled(false).await);
        assert_eq!(settings.has_subscription().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_without_user_id_probe_is_skipped() {
        let probe = Arc::new(ScriptedProbe::active());
        let (scheduler, _, _) = scheduler(probe.clone(), Default::default()).await;

        assert!(!scheduler.is_automatic_backup_enabled(false).await);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_overrides() {
        let probe = Arc::new(ScriptedProbe::inactive());
        let overrides = AutomaticBackupConfig {
            enabled_override: Some(true),
            payment_override: None,
        };
        let (scheduler, settings, notifier) = scheduler(probe.clone(), overrides).await;

        assert!(scheduler.is_automatic_backup_enabled(true).await);
        assert_eq!(probe.calls(), 0);

        assert!(!scheduler.check_with_payment_override("false").await.unwrap());
        assert!(!scheduler.is_automatic_backup_enabled(false).await);
        assert_eq!(notifier.dispatched(), vec![notifications::AUTO_BACKUP_EXPIRED]);
        assert_eq!(
            settings.backup_status().await.unwrap().unwrap().state,
            BackupStatusState::Fail
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once_after_delay() {
        let (scheduler, _, _) =
            scheduler(Arc::new(ScriptedProbe::active()), Default::default()).await;
        let fired = Arc::new(AtomicBool::new(false));
        let now = Utc::now();

        // 备份进行中不安排
        assert!(!scheduler.schedule(true, now, || {}));

        let flag = fired.clone();
        assert!(scheduler.schedule(false, now, move || flag.store(true, Ordering::SeqCst)));
        assert_eq!(
            scheduler.next_run_at(),
            Some(now + ChronoDuration::minutes(15))
        );
        // 已有定时器时不重复安排
        assert!(!scheduler.schedule(false, now, || {}));

        tokio::time::sleep(AUTOMATIC_BACKUP_DELAY + std::time::Duration::from_secs(1)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(!scheduler.is_timer_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_timer_never_fires() {
        let (scheduler, _, _) =
            scheduler(Arc::new(ScriptedProbe::active()), Default::default()).await;
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        scheduler.schedule(false, Utc::now(), move || flag.store(true, Ordering::SeqCst));
        scheduler.clear_timer();
        assert!(!scheduler.is_timer_armed());

        tokio::time::sleep(AUTOMATIC_BACKUP_DELAY * 2).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
