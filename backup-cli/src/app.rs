use backup_core::config::AppConfig;
use backup_core::db::Database;
use backup_core::{BackupOrchestrator, OrchestratorDeps, Result};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cli::{AutoBackupCommand, Cli, Commands};
use crate::commands;

pub struct CliApp {
    pub config: AppConfig,
    pub database: Database,
    pub orchestrator: Arc<BackupOrchestrator>,
}

impl CliApp {
    /// 加载配置、连接数据库并初始化编排器
    ///
    /// 指定的配置文件不存在时按默认顺序查找，都没有则生成默认配置。
    pub async fn new(cli: &Cli) -> Result<Self> {
        let mut config = if cli.config.exists() {
            AppConfig::load_from_file(&cli.config)?
        } else {
            AppConfig::find_and_load_config()?
        };
        apply_overrides(&mut config, cli);

        let database_path = config.get_database_path();
        let database = Database::connect(&database_path).await?;
        debug!("数据库已连接: {}", database_path.display());

        let deps = OrchestratorDeps::standard(config.clone(), database.clone())?;
        let orchestrator = BackupOrchestrator::new(deps);
        orchestrator.initialize().await?;

        Ok(Self {
            config,
            database,
            orchestrator,
        })
    }

    /// 运行应用命令
    pub async fn run_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Init { .. } => unreachable!(), // 已经在 main.rs 中处理
            Commands::Put { key, value } => commands::run_put(self, &key, &value).await,
            Commands::Delete { key } => commands::run_delete(self, &key).await,
            Commands::Backup => commands::run_backup(self).await,
            Commands::Restore { provider } => commands::run_restore(self, provider).await,
            Commands::Status => commands::run_status(self).await,
            Commands::SetBackend { location } => commands::run_set_backend(self, location).await,
            Commands::Backend => commands::show_backend(self).await,
            Commands::Login { url } => commands::run_login(self, &url).await,
            Commands::LoginLink => commands::show_login_link(self),
            Commands::ForgetChanges => commands::run_forget_changes(self).await,
            Commands::Estimate => commands::run_estimate(self).await,
            Commands::AutoBackup(cmd) => self.run_auto_backup_command(cmd).await,
            Commands::Daemon => commands::run_daemon(self).await,
        }
    }

    /// 运行自动备份相关命令
    async fn run_auto_backup_command(&self, cmd: AutoBackupCommand) -> Result<()> {
        match cmd {
            AutoBackupCommand::Status => {
                info!("显示自动备份状态");
                commands::show_auto_backup_status(self).await
            }
            AutoBackupCommand::Check { payment } => {
                info!("重新检查自动备份授权");
                commands::run_auto_backup_check(self, payment.as_deref()).await
            }
            AutoBackupCommand::EnableUser { user_id } => {
                commands::store_user_id(self, &user_id).await
            }
        }
    }

    /// 停止定时器和正在进行的过程，然后关闭数据库
    pub async fn shutdown(self) -> Result<()> {
        self.orchestrator.shutdown().await;
        drop(self.orchestrator);
        self.database.close().await
    }
}

/// 命令行参数和环境变量优先于配置文件
fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(enabled) = cli.automatic_backup {
        config.automatic_backup.enabled_override = Some(enabled);
    }
    if let Some(payment) = cli.payment_success.as_ref().filter(|p| !p.is_empty()) {
        config.automatic_backup.payment_override = Some(payment.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "backup-cli",
            "--automatic-backup",
            "false",
            "--payment-success",
            "success",
            "status",
        ])
        .unwrap();
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.automatic_backup.enabled_override, Some(false));
        assert_eq!(
            config.automatic_backup.payment_override.as_deref(),
            Some("success")
        );
    }
}
