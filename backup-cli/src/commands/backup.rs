use crate::app::CliApp;
use crate::utils::follow_procedure;
use backup_core::Result;
use backup_core::backend::BackendLocation;
use backup_core::constants::notifications;
use backup_core::orchestrator::RestoreOptions;
use backup_core::procedure::ProcedureOutcome;
use tracing::{info, instrument, warn};

/// 立即执行一次备份，等待结束后的处理完成
#[instrument(skip(app))]
pub async fn run_backup(app: &CliApp) -> Result<()> {
    let orchestrator = &app.orchestrator;
    let events = orchestrator.start_backup()?;
    let result = follow_procedure("备份", events, || orchestrator.cancel_backup()).await;

    match orchestrator.wait_for_backup().await {
        Some(ProcedureOutcome::Completed) => {
            let times = orchestrator.get_backup_times().await?;
            if let Some(last) = times.last_backup {
                info!("✅ 备份完成: {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        Some(ProcedureOutcome::Cancelled) => warn!("备份已取消，下一次将执行全量备份"),
        Some(ProcedureOutcome::Failed(error)) => {
            match orchestrator.send_notification(notifications::BACKUP_ERROR).await {
                Ok(id) => warn!(error = %error, notification = %id, "备份失败"),
                Err(e) => warn!(error = %error, notify_error = %e, "备份失败，通知发送失败"),
            }
        }
        None => {}
    }
    result
}

/// 从指定来源恢复
#[instrument(skip(app))]
pub async fn run_restore(app: &CliApp, provider: BackendLocation) -> Result<()> {
    let orchestrator = &app.orchestrator;
    let events = orchestrator.start_restore(RestoreOptions { provider })?;
    // 恢复进行中时认证状态检查的是恢复来源
    if provider == BackendLocation::Cloud && !orchestrator.is_backup_authenticated().await {
        warn!("云端尚未登录，可运行 'backup-cli login-link' 获取登录地址");
    }
    let result = follow_procedure("恢复", events, || orchestrator.cancel_restore()).await;

    if let Some(ProcedureOutcome::Completed) = orchestrator.wait_for_restore().await {
        let keys = app.orchestrator.store().len().await?;
        info!("✅ 恢复完成，本地共有 {} 条记录", keys);
    }
    result
}
