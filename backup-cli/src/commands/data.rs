use crate::app::CliApp;
use crate::utils::format_bytes;
use backup_core::{BackupError, Result};
use tracing::{info, warn};

/// 写入一条本地记录
pub async fn run_put(app: &CliApp, key: &str, value: &str) -> Result<()> {
    let payload: serde_json::Value = serde_json::from_str(value)
        .map_err(|e| BackupError::custom(format!("记录内容不是合法的 JSON: {e}")))?;
    app.orchestrator.store().put(key, &payload).await?;
    info!("✅ 已写入记录: {}", key);
    Ok(())
}

pub async fn run_delete(app: &CliApp, key: &str) -> Result<()> {
    if app.orchestrator.store().delete(key).await? {
        info!("✅ 已删除记录: {}", key);
    } else {
        warn!("记录不存在: {}", key);
    }
    Ok(())
}

/// 丢弃尚未备份的变更，下一次备份为全量备份
pub async fn run_forget_changes(app: &CliApp) -> Result<()> {
    app.orchestrator.forget_all_changes().await?;
    info!("✅ 已丢弃所有待备份变更");
    Ok(())
}

pub async fn run_estimate(app: &CliApp) -> Result<()> {
    let size = app.orchestrator.estimate_initial_backup_size().await?;
    info!(
        "首次备份预计: {} 条记录，约 {}",
        size.records,
        format_bytes(size.bytes)
    );
    Ok(())
}
