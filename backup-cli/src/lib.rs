// 私有模块声明
mod app;
mod cli;
mod commands;
mod init;
mod utils;

// 通过 pub use 精确控制对外暴露的接口
pub use app::CliApp;
pub use cli::{AutoBackupCommand, Cli, Commands};
pub use init::run_init;
pub use utils::{follow_procedure, setup_logging};
