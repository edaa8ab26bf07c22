use backup_cli::{Cli, CliApp, Commands, run_init, setup_logging};
use clap::Parser;
use tracing::error;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // 解析命令行参数
    let cli = Cli::parse();

    // 设置日志记录，guard 需要保留到退出
    let _log_guard = setup_logging(cli.verbose);

    // `init` 命令是特例，它不需要预先加载配置
    if let Commands::Init { force } = cli.command {
        if let Err(e) = run_init(&cli.config, force) {
            error!("❌ 初始化失败: {}", e);
            std::process::exit(1);
        }
        return Ok(());
    }

    let app = match CliApp::new(&cli).await {
        Ok(app) => app,
        Err(e) => {
            error!("❌ 应用初始化失败: {}", e);
            error!("👉 可以先运行 'backup-cli init' 命令创建配置文件");
            std::process::exit(1);
        }
    };

    // 运行命令，无论成败都先关闭
    let result = app.run_command(cli.command).await;
    app.shutdown().await?;

    if let Err(e) = result {
        error!("❌ 操作失败: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
