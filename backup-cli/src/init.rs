use backup_core::config::AppConfig;
use backup_core::{BackupError, Result};
use std::path::Path;
use tracing::{info, warn};

/// 创建默认配置文件和本地备份目录
pub fn run_init(config_path: &Path, force: bool) -> Result<AppConfig> {
    if config_path.exists() && !force {
        warn!("配置文件已存在: {}", config_path.display());
        return Err(BackupError::custom(
            "配置文件已存在，如需覆盖请使用 --force",
        ));
    }

    let config = AppConfig::default();
    config.save_to_file(config_path)?;
    config.ensure_backup_dir()?;

    info!("✅ 已创建配置文件: {}", config_path.display());
    info!("   本地备份目录: {}", config.get_backup_dir().display());
    info!("👉 运行 'backup-cli set-backend local' 选择备份位置");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# existing").unwrap();

        assert!(run_init(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# existing");
    }
}
