//! 备份编排
//!
//! [`BackupOrchestrator`] 是所有外部命令的唯一入口，持有变更队列、后端选择器、
//! 备份/恢复过程和自动备份调度器，并保证备份与恢复不会同时进行。
//!
//! 互斥检查在发起命令时同步完成；过程本身在后台任务中运行，结束后由编排层
//! 更新备份时间并重新安排自动备份。

use crate::backend::{BackendLocation, BackupBackend, CloudBackend, SizeEstimator};
use crate::backend_select::{BackendFactory, BackendSelector, DefaultBackendFactory};
use crate::config::AppConfig;
use crate::constants::notifications;
use crate::db::{Database, StoreSize};
use crate::notifier::{LogNotifier, Notifier};
use crate::procedure::{
    BackupProcedure, ProcedureEvents, ProcedureInfo, ProcedureOutcome, RestoreProcedure,
    log_events,
};
use crate::redirect::{RedirectInterceptor, RedirectKind};
use crate::scheduler::{AutomaticBackupScheduler, EntitlementProbe, HttpEntitlementProbe};
use crate::settings::{BackupStatus, BackupStatusState, SettingsStore};
use crate::store::LocalStore;
use crate::{BackupError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::{Serialize, Serializer};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;


/// 编排器的外部依赖
#[derive(Debug, Clone)]
pub struct OrchestratorDeps {
    pub config: AppConfig,
    pub db: Database,
    pub notifier: Arc<dyn Notifier>,
    pub probe: Arc<dyn EntitlementProbe>,
    pub backends: Arc<dyn BackendFactory>,
}

impl OrchestratorDeps {
    /// 按配置文件构造默认依赖：日志通知、HTTP 授权查询、本地/云端后端
    pub fn standard(config: AppConfig, db: Database) -> Result<Self> {
        let settings = SettingsStore::open(db.clone());
        let probe = HttpEntitlementProbe::new(
            CloudBackend::default_client()?,
            config.cloud.origin.clone(),
        );
        let backends = DefaultBackendFactory::new(config.clone(), settings)?;

        Ok(Self {
            config,
            db,
            notifier: Arc::new(LogNotifier),
            probe: Arc::new(probe),
            backends: Arc::new(backends),
        })
    }
}

/// 恢复选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// 恢复来源，可以与备份位置不同
    pub provider: BackendLocation,
}

/// 下一次备份
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextBackup {
    Running,
    At(DateTime<Utc>),
}

impl Serialize for NextBackup {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            NextBackup::Running => serializer.serialize_str("running"),
            NextBackup::At(time) => serializer.serialize_i64(time.timestamp_millis()),
        }
    }
}

/// 备份时间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupTimes {
    /// 最近一次成功备份的完成时间
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub last_backup: Option<DateTime<Utc>>,
    pub next_backup: Option<NextBackup>,
}

type ProcedureTask = Shared<BoxFuture<'static, ProcedureOutcome>>;

fn completion(handle: JoinHandle<ProcedureOutcome>) -> ProcedureTask {
    handle
        .map(|joined| joined.unwrap_or_else(|e| ProcedureOutcome::Failed(e.to_string())))
        .boxed()
        .shared()
}

#[derive(Default)]
struct OrchestratorState {
    backend_location: Option<BackendLocation>,
    backend: Option<Arc<dyn BackupBackend>>,
    backup: Option<Arc<BackupProcedure>>,
    backup_task: Option<ProcedureTask>,
    restore: Option<Arc<RestoreProcedure>>,
    restore_task: Option<ProcedureTask>,
}

impl OrchestratorState {
    fn backup_active(&self) -> bool {
        self.backup
            .as_ref()
            .is_some_and(|procedure| procedure.info().state.is_active())
    }

    fn restore_active(&self) -> bool {
        self.restore
            .as_ref()
            .is_some_and(|procedure| procedure.interruptable().state().is_active())
    }

    fn active_backup(&self) -> Result<Arc<BackupProcedure>> {
        self.backup
            .clone()
            .filter(|procedure| procedure.info().state.is_active())
            .ok_or(BackupError::NoActiveProcedure("备份"))
    }

    fn active_restore(&self) -> Result<Arc<RestoreProcedure>> {
        self.restore
            .clone()
            .filter(|procedure| procedure.interruptable().state().is_active())
            .ok_or(BackupError::NoActiveProcedure("恢复"))
    }
}

/// 备份编排器
pub struct BackupOrchestrator {
    me: Weak<BackupOrchestrator>,
    config: AppConfig,
    settings: SettingsStore,
    store: Arc<LocalStore>,
    selector: BackendSelector,
    scheduler: AutomaticBackupScheduler,
    interceptor: RedirectInterceptor,
    notifier: Arc<dyn Notifier>,
    state: Mutex<OrchestratorState>,
}

impl std::fmt::Debug for BackupOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("BackupOrchestrator")
            .field("backend_location", &state.backend_location)
            .field("backup", &state.backup.as_ref().map(|p| p.info()))
            .field(
                "restore",
                &state.restore.as_ref().map(|p| p.interruptable().info()),
            )
            .finish_non_exhaustive()
    }
}

impl BackupOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Arc<Self> {
        let settings = SettingsStore::open(deps.db.clone());
        let store = Arc::new(LocalStore::new(deps.db));
        let selector =
            BackendSelector::new(settings.clone(), deps.backends, deps.config.cloud.clone());
        let scheduler = AutomaticBackupScheduler::new(
            settings.clone(),
            deps.probe,
            deps.notifier.clone(),
            deps.config.automatic_backup.clone(),
        );
        let interceptor = RedirectInterceptor::new(deps.config.cloud.origin.clone());

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config: deps.config,
            settings,
            store,
            selector,
            scheduler,
            interceptor,
            notifier: deps.notifier,
            state: Mutex::new(OrchestratorState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn scheduler(&self) -> &AutomaticBackupScheduler {
        &self.scheduler
    }

    // ========================================
    // 启动与关闭
    // ========================================

    /// 恢复已保存的后端，已经备份过时开始记录变更
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        if let Some((location, backend)) = self.selector.restore_backend().await? {
            let mut state = self.state();
            state.backend_location = Some(location);
            state.backend = Some(backend.clone());
            drop(state);
            self.interceptor.install(Some(backend));
        }
        self.start_recording_changes_if_needed().await
    }

    /// 取消定时器和正在进行的过程，并等待它们结束
    ///
    /// 数据库由调用方在之后关闭。
    pub async fn shutdown(&self) {
        self.scheduler.clear_timer();
        let (backup, restore) = {
            let state = self.state();
            if let Some(procedure) = &state.backup {
                procedure.cancel();
            }
            if let Some(procedure) = &state.restore {
                procedure.interruptable().cancel();
            }
            (state.backup_task.clone(), state.restore_task.clone())
        };
        if let Some(task) = backup {
            task.await;
        }
        if let Some(task) = restore {
            task.await;
        }
        // 定时器可能在过程结束时被重新安排
        self.scheduler.clear_timer();
        self.store.change_queue().flush().await;
        info!("备份编排器已关闭");
    }

    async fn start_recording_changes_if_needed(&self) -> Result<()> {
        if self.settings.last_backup_time().await?.is_none() || self.store.recording_changes() {
            return Ok(());
        }
        self.store.start_recording_changes();
        self.maybe_schedule_automatic_backup(Utc::now()).await;
        Ok(())
    }

    // ========================================
    // 备份
    // ========================================

    /// 开始备份，返回事件流
    ///
    /// 恢复进行中时返回冲突错误；备份已在进行时不会再启动，返回现有过程的事件流。
    pub fn start_backup(&self) -> Result<ProcedureEvents> {
        let mut state = self.state();
        if state.restore_active() {
            return Err(BackupError::conflict("恢复正在进行，不能同时备份"));
        }
        if let Some(procedure) = state.backup.as_ref().filter(|p| p.info().state.is_active()) {
            debug!(run_id = procedure.run_id(), "备份已在进行");
            return Ok(procedure.subscribe());
        }
        let backend = state
            .backend
            .clone()
            .ok_or(BackupError::BackendNotConfigured)?;

        self.scheduler.clear_timer();
        self.store.start_recording_changes();

        let procedure = Arc::new(BackupProcedure::new(
            backend,
            self.store.clone(),
            self.settings.clone(),
        ));
        let events = procedure.subscribe();
        let run = procedure.start()?;
        state.backup = Some(procedure.clone());

        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            let outcome = run.await;
            if let Some(orchestrator) = me.upgrade() {
                orchestrator.after_backup(&procedure, &outcome).await;
            }
            outcome
        });
        state.backup_task = Some(completion(handle));
        Ok(events)
    }

    async fn after_backup(&self, procedure: &BackupProcedure, outcome: &ProcedureOutcome) {
        let finished_at = Utc::now();
        let status = match outcome {
            ProcedureOutcome::Completed => {
                if let Err(e) = self.settings.store_last_backup_finish_time(finished_at).await {
                    warn!(error = %e, "保存备份完成时间失败");
                }
                Some(BackupStatus {
                    state: BackupStatusState::Success,
                    backup_id: Some(procedure.run_id().to_string()),
                })
            }
            ProcedureOutcome::Failed(_) => Some(BackupStatus {
                state: BackupStatusState::Fail,
                backup_id: Some(notifications::BACKUP_ERROR.to_string()),
            }),
            ProcedureOutcome::Cancelled => None,
        };
        if let Some(status) = status {
            if let Err(e) = self.settings.set_backup_status(&status).await {
                warn!(error = %e, "保存备份状态失败");
            }
        }

        // 成功、失败和取消之后都重新安排
        self.maybe_schedule_automatic_backup(finished_at).await;
    }

    pub fn pause_backup(&self) -> Result<bool> {
        Ok(self.state().active_backup()?.pause())
    }

    pub fn resume_backup(&self) -> Result<bool> {
        Ok(self.state().active_backup()?.resume())
    }

    pub fn cancel_backup(&self) -> Result<bool> {
        Ok(self.state().active_backup()?.cancel())
    }

    pub fn get_backup_info(&self) -> ProcedureInfo {
        self.state()
            .backup
            .as_ref()
            .map(|procedure| procedure.info())
            .unwrap_or_default()
    }

    /// 等待当前备份（包括结束后的处理）完成
    pub async fn wait_for_backup(&self) -> Option<ProcedureOutcome> {
        let task = self.state().backup_task.clone()?;
        Some(task.await)
    }

    // ========================================
    // 恢复
    // ========================================

    /// 从指定来源开始恢复，返回事件流
    pub fn start_restore(&self, options: RestoreOptions) -> Result<ProcedureEvents> {
        let mut state = self.state();
        if state.backup_active() {
            return Err(BackupError::conflict("备份正在进行，不能同时恢复"));
        }
        if let Some(procedure) = state
            .restore
            .as_ref()
            .filter(|p| p.interruptable().state().is_active())
        {
            return Ok(procedure.interruptable().subscribe());
        }

        self.scheduler.clear_timer();
        let backend = self.selector.init_backend(options.provider)?;
        if options.provider == BackendLocation::Cloud {
            self.interceptor.install(Some(backend.clone()));
        }

        let procedure = Arc::new(RestoreProcedure::new(backend, self.store.clone()));
        let events = procedure.interruptable().subscribe();
        let run = procedure.runner()()?;
        state.restore = Some(procedure.clone());

        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            let outcome = run.await;
            if let Some(orchestrator) = me.upgrade() {
                orchestrator.after_restore(&procedure, &outcome).await;
            }
            outcome
        });
        state.restore_task = Some(completion(handle));
        Ok(events)
    }

    async fn after_restore(&self, procedure: &Arc<RestoreProcedure>, outcome: &ProcedureOutcome) {
        if *outcome != ProcedureOutcome::Completed {
            return;
        }

        if !self.store.recording_changes() {
            self.store.start_recording_changes();
        }
        self.maybe_schedule_automatic_backup(Utc::now()).await;

        let backend = {
            let mut state = self.state();
            if state
                .restore
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, procedure))
            {
                state.restore = None;
            }
            state.backend.clone()
        };
        self.interceptor.install(backend);
    }

    pub fn pause_restore(&self) -> Result<bool> {
        Ok(self.state().active_restore()?.interruptable().pause())
    }

    pub fn resume_restore(&self) -> Result<bool> {
        Ok(self.state().active_restore()?.interruptable().resume())
    }

    pub fn cancel_restore(&self) -> Result<bool> {
        Ok(self.state().active_restore()?.interruptable().cancel())
    }

    pub fn get_restore_info(&self) -> ProcedureInfo {
        self.state()
            .restore
            .as_ref()
            .map(|procedure| procedure.interruptable().info())
            .unwrap_or_default()
    }

    /// 等待当前恢复（包括结束后的处理）完成
    pub async fn wait_for_restore(&self) -> Option<ProcedureOutcome> {
        let task = self.state().restore_task.clone()?;
        Some(task.await)
    }

    // ========================================
    // 后端
    // ========================================

    /// 切换备份位置，位置变化时才写入设置
    #[instrument(skip(self))]
    pub async fn set_backend_location(&self, location: BackendLocation) -> Result<()> {
        let unchanged = {
            let state = self.state();
            state.backend_location == Some(location) && state.backend.is_some()
        };
        if !unchanged {
            self.selector.save_backend_location(location).await?;
            let backend = self.selector.init_backend(location)?;
            let mut state = self.state();
            state.backend_location = Some(location);
            state.backend = Some(backend);
        }

        let backend = self.state().backend.clone();
        self.interceptor.install(backend);
        Ok(())
    }

    pub async fn get_backend_location(&self) -> Result<Option<BackendLocation>> {
        let location = self.selector.restore_backend_location().await?;
        self.state().backend_location = location;
        Ok(location)
    }

    /// 恢复进行中时检查恢复来源，否则检查备份后端
    pub async fn is_backup_authenticated(&self) -> bool {
        let backend = {
            let state = self.state();
            match &state.restore {
                Some(procedure) => Some(procedure.backend().clone()),
                None => state.backend.clone(),
            }
        };
        match backend {
            Some(backend) => backend.is_authenticated().await,
            None => false,
        }
    }

    /// 云端登录入口地址
    pub fn login_link(&self) -> Result<Url> {
        self.selector.login_link()
    }

    /// 处理浏览器重定向，返回识别出的类型
    #[instrument(skip(self))]
    pub async fn handle_redirect(&self, url: &str) -> Result<RedirectKind> {
        let url = Url::parse(url)?;
        let kind = self.interceptor.classify(&url);
        match kind {
            RedirectKind::Login => match self.interceptor.login_handler() {
                Some(backend) => backend.handle_login_redirected_back(&url).await?,
                None => warn!("没有可以处理登录回调的后端"),
            },
            RedirectKind::SubscriptionSuccess => {
                if self.check_automatic_backup_enabled(None).await? {
                    self.maybe_schedule_automatic_backup(Utc::now()).await;
                }
            }
            RedirectKind::Other => {}
        }
        Ok(kind)
    }

    /// 由当前后端决定并发送失败通知，返回实际的通知ID
    pub async fn send_notification(&self, id: &str) -> Result<String> {
        let backend = self
            .state()
            .backend
            .clone()
            .ok_or(BackupError::BackendNotConfigured)?;

        let store = self.store.clone();
        let estimator = move || {
            let store = store.clone();
            async move { store.estimate_size().await }.boxed()
        };
        let estimator: &SizeEstimator = &estimator;
        backend
            .send_notification_on_failure(id, self.notifier.as_ref(), estimator)
            .await
    }

    // ========================================
    // 变更与备份时间
    // ========================================

    /// 丢弃所有待备份变更并清除备份时间，下一次备份为全量备份
    pub async fn forget_all_changes(&self) -> Result<()> {
        self.store.forget_all_changes().await?;
        self.settings.remove_backup_times().await?;
        info!("已清除所有待备份变更");
        Ok(())
    }

    pub async fn has_initial_backup(&self) -> Result<bool> {
        Ok(self.settings.last_backup_time().await?.is_some())
    }

    pub async fn get_backup_times(&self) -> Result<BackupTimes> {
        let last_backup = self.settings.last_backup_finish_time().await?;
        let next_backup = if self.state().backup_active() {
            Some(NextBackup::Running)
        } else if self.is_automatic_backup_enabled(false).await {
            self.scheduler.next_run_at().map(NextBackup::At)
        } else {
            None
        };
        Ok(BackupTimes {
            last_backup,
            next_backup,
        })
    }

    pub async fn estimate_initial_backup_size(&self) -> Result<StoreSize> {
        self.store.estimate_size().await
    }

    // ========================================
    // 自动备份
    // ========================================

    /// 保存用户ID，之前没有用户ID时缓存的检查结果随之作废
    pub async fn store_user_id(&self, user_id: &str) -> Result<()> {
        self.settings.set_user_id(user_id).await?;
        self.scheduler.forget_check();
        Ok(())
    }

    pub async fn is_automatic_backup_enabled(&self, force: bool) -> bool {
        self.scheduler.is_automatic_backup_enabled(force).await
    }

    /// 重新检查自动备份授权
    ///
    /// 传入（或配置中存在）付费回调覆盖项时直接使用覆盖值。
    pub async fn check_automatic_backup_enabled(
        &self,
        payment_override: Option<&str>,
    ) -> Result<bool> {
        let payment_override = payment_override
            .map(str::to_string)
            .or_else(|| self.scheduler.overrides().payment_override.clone())
            .filter(|value| !value.is_empty());

        match payment_override {
            Some(value) => {
                info!(value = %value, "使用自动备份付费覆盖项");
                self.scheduler.check_with_payment_override(&value).await
            }
            None => Ok(self.scheduler.is_automatic_backup_enabled(true).await),
        }
    }

    /// 已经备份过、有用户和订阅信息、且没有安排下一次备份时，重新检查并安排
    pub async fn maybe_check_automatic_backup_enabled(&self) -> Result<bool> {
        if self.settings.last_backup_time().await?.is_none()
            || self.settings.user_id().await?.is_none()
            || self.settings.has_subscription().await?.is_none()
            || self.scheduler.is_timer_armed()
        {
            return Ok(false);
        }

        self.scheduler.is_automatic_backup_enabled(true).await;
        Ok(self.maybe_schedule_automatic_backup(Utc::now()).await)
    }

    /// 自动备份可用时安排下一次备份，返回是否安排了新的定时器
    async fn maybe_schedule_automatic_backup(&self, now: DateTime<Utc>) -> bool {
        if !self.scheduler.is_automatic_backup_enabled(false).await {
            return false;
        }

        let backup_running = self.state().backup_active();
        let me = self.me.clone();
        self.scheduler.schedule(backup_running, now, move || {
            let Some(orchestrator) = me.upgrade() else {
                return;
            };
            match orchestrator.start_backup() {
                Ok(events) => {
                    log_events("自动备份", events);
                }
                Err(e) => warn!(error = %e, "自动备份未能开始"),
            }
        })
    }
}
