use crate::app::CliApp;
use backup_core::Result;
use backup_core::orchestrator::{BackupTimes, NextBackup};
use backup_core::settings::BackupStatusState;
use chrono::{DateTime, Local, Utc};
use tracing::info;

fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// 格式化备份时间，供状态类命令共用
pub(crate) fn describe_times(times: &BackupTimes) -> (String, String) {
    let last = times
        .last_backup
        .map(format_time)
        .unwrap_or_else(|| "从未备份".to_string());
    let next = match times.next_backup {
        Some(NextBackup::Running) => "正在备份".to_string(),
        Some(NextBackup::At(time)) => format_time(time),
        None => "未安排".to_string(),
    };
    (last, next)
}

/// 显示备份状态
pub async fn run_status(app: &CliApp) -> Result<()> {
    let orchestrator = &app.orchestrator;

    info!("💾 备份客户端状态");
    info!("==================");
    info!("   客户端版本: v{}", env!("CARGO_PKG_VERSION"));
    info!("   数据库: {}", app.config.get_database_path().display());

    match orchestrator.get_backend_location().await? {
        Some(location) => info!("   备份位置: {}", location),
        None => info!("   备份位置: 未设置"),
    }

    let store = orchestrator.store();
    info!("📁 本地数据:");
    info!("   记录数: {}", store.len().await?);
    info!(
        "   变更记录: {}",
        if store.recording_changes() { "已开启" } else { "未开启" }
    );
    info!("   待备份变更: {}", store.change_queue().pending().await?);

    let times = orchestrator.get_backup_times().await?;
    let (last, next) = describe_times(&times);
    info!("🕒 备份时间:");
    info!("   上次备份: {}", last);
    info!("   下次备份: {}", next);

    if let Some(status) = orchestrator.settings().backup_status().await? {
        let id = status.backup_id.unwrap_or_default();
        match status.state {
            BackupStatusState::Success => info!("   ✅ 上次结果: 成功 ({})", id),
            BackupStatusState::Fail => info!("   ❌ 上次结果: 失败 ({})", id),
        }
    }
    if orchestrator.settings().full_backup_required().await? {
        info!("   ⚠️ 下一次备份将执行全量备份");
    }

    Ok(())
}
