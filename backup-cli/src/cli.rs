use backup_core::backend::BackendLocation;
use backup_core::constants::schedule;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 自动备份相关命令
#[derive(Subcommand, Debug, PartialEq)]
pub enum AutoBackupCommand {
    /// 显示自动备份授权和下一次备份时间
    Status,
    /// 强制重新检查自动备份授权
    Check {
        /// 模拟付费回调的结果（会发送过期通知）
        #[arg(long)]
        payment: Option<String>,
    },
    /// 保存用于授权查询的用户ID
    EnableUser {
        /// 用户ID
        user_id: String,
    },
}

/// 备份客户端 CLI - 本地数据的增量备份与恢复
#[derive(Parser, Debug)]
#[command(name = "backup-cli")]
#[command(about = "本地数据的增量备份、恢复与自动备份工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// 详细输出
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 跳过授权检查，直接决定是否启用自动备份
    #[arg(long, global = true, env = schedule::AUTOMATIC_BACKUP_OVERRIDE_ENV)]
    pub automatic_backup: Option<bool>,

    /// 模拟付费回调的结果
    #[arg(long, global = true, env = schedule::PAYMENT_OVERRIDE_ENV)]
    pub payment_success: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// 创建配置文件和本地备份目录
    Init {
        /// 如果配置文件已存在，强制覆盖
        #[arg(long)]
        force: bool,
    },
    /// 写入一条本地记录
    Put {
        key: String,
        /// JSON 格式的记录内容
        value: String,
    },
    /// 删除一条本地记录
    Delete { key: String },
    /// 立即执行一次备份
    Backup,
    /// 从备份恢复本地数据
    Restore {
        /// 恢复来源：local 或 cloud
        #[arg(long)]
        provider: BackendLocation,
    },
    /// 显示备份状态
    Status,
    /// 设置备份位置
    SetBackend {
        /// local 或 cloud
        location: BackendLocation,
    },
    /// 显示当前备份位置和认证状态
    Backend,
    /// 处理云端登录后的重定向地址
    Login {
        /// 浏览器重定向回来的完整地址
        url: String,
    },
    /// 显示云端登录地址
    LoginLink,
    /// 丢弃尚未备份的变更
    ForgetChanges,
    /// 估算首次备份的数据量
    Estimate,
    /// 自动备份管理
    #[command(subcommand)]
    AutoBackup(AutoBackupCommand),
    /// 常驻运行，按计划执行自动备份，直到 Ctrl-C
    Daemon,
}
