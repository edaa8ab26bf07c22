use crate::app::CliApp;
use crate::commands::status::describe_times;
use backup_core::Result;
use backup_core::orchestrator::BackupTimes;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// 守护模式下输出调度状态的间隔
const DAEMON_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// 显示自动备份授权和下一次备份时间
pub async fn show_status(app: &CliApp) -> Result<()> {
    let orchestrator = &app.orchestrator;
    let settings = orchestrator.settings();

    let enabled = orchestrator.is_automatic_backup_enabled(false).await;
    info!("自动备份: {}", if enabled { "已启用" } else { "未启用" });

    match settings.user_id().await? {
        Some(user_id) => info!("   用户ID: {}", user_id),
        None => info!("   用户ID: 未设置"),
    }
    if let Some(has_subscription) = settings.has_subscription().await? {
        info!("   订阅: {}", if has_subscription { "有效" } else { "无" });
    }
    if let Some(end_date) = settings.subscription_end_date().await? {
        info!("   订阅到期: {}", end_date);
    }

    let overrides = orchestrator.scheduler().overrides();
    if let Some(value) = overrides.enabled_override {
        info!("   覆盖项: AUTOMATIC_BACKUP={}", value);
    }

    let (_, next) = describe_times(&orchestrator.get_backup_times().await?);
    info!("   下次备份: {}", next);
    Ok(())
}

/// 强制重新检查授权
#[instrument(skip(app))]
pub async fn run_auto_backup_check(app: &CliApp, payment: Option<&str>) -> Result<()> {
    let enabled = app.orchestrator.check_automatic_backup_enabled(payment).await?;
    if enabled {
        info!("✅ 自动备份可用");
    } else {
        warn!("自动备份不可用");
    }
    Ok(())
}

pub async fn store_user_id(app: &CliApp, user_id: &str) -> Result<()> {
    app.orchestrator.store_user_id(user_id).await?;
    info!("✅ 已保存用户ID: {}", user_id);
    Ok(())
}

/// 常驻运行，直到 Ctrl-C
///
/// 定时器由编排器安排，这里只负责保持进程存活并定期输出状态。
#[instrument(skip(app))]
pub async fn run_daemon(app: &CliApp) -> Result<()> {
    let orchestrator = &app.orchestrator;
    if !orchestrator.has_initial_backup().await? {
        warn!("尚未执行过备份，首次备份完成后才会安排自动备份");
    }
    if orchestrator.maybe_check_automatic_backup_enabled().await? {
        info!("已安排自动备份");
    }

    let (_, next) = describe_times(&orchestrator.get_backup_times().await?);
    info!("🚀 守护模式已启动，下次备份: {}，按 Ctrl-C 退出", next);

    let mut report = tokio::time::interval(DAEMON_REPORT_INTERVAL);
    report.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "监听 Ctrl-C 失败");
                }
                info!("收到退出信号");
                break;
            }
            _ = report.tick() => {
                report_schedule(orchestrator.get_backup_times().await);
            }
        }
    }
    Ok(())
}

/// 输出一次调度状态；读取失败只记录日志，守护进程继续运行
fn report_schedule(times: Result<BackupTimes>) -> Option<(String, String)> {
    match times {
        Ok(times) => {
            let (last, next) = describe_times(&times);
            debug!(last = %last, next = %next, "自动备份状态");
            Some((last, next))
        }
        Err(e) => {
            warn!(error = %e, "读取备份时间失败");
            None
        }
    }
}
