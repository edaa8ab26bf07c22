use backup_core::procedure::{ProcedureEvent, ProcedureEvents};
use backup_core::{BackupError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// 日志文件路径的环境变量
pub const LOG_FILE_ENV: &str = "BACKUP_LOG_FILE";

/// # 日志配置
///
/// - `-v, --verbose`：默认级别从 INFO 提升到 DEBUG
/// - `RUST_LOG`：标准的过滤规则，优先于 `-v`
/// - `BACKUP_LOG_FILE`：设置后日志写入该文件（非阻塞），包含模块路径和行号
///
/// 返回的 guard 需要保留到进程退出，否则文件中的日志可能丢失。
pub fn setup_logging(verbose: bool) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match std::env::var(LOG_FILE_ENV) {
        Ok(path) if !path.is_empty() => {
            let path = std::path::Path::new(&path);
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|name| name.to_os_string())
                .unwrap_or_else(|| "backup-cli.log".into());

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .compact()
                .init();
            None
        }
    }
}

fn progress_bar(label: &str) -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(
        "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({elapsed})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(label.to_string());
    bar
}

/// 跟随过程事件显示进度，直到终止事件
///
/// 第一次 Ctrl-C 会调用 `cancel` 请求取消，之后继续等待取消完成。
pub async fn follow_procedure<F>(label: &str, mut events: ProcedureEvents, cancel: F) -> Result<()>
where
    F: Fn() -> Result<bool>,
{
    let bar = progress_bar(label);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_sent = false;

    loop {
        let event = tokio::select! {
            event = events.next() => event,
            _ = &mut ctrl_c, if !cancel_sent => {
                cancel_sent = true;
                bar.set_message(format!("{label}（正在取消）"));
                if let Err(e) = cancel() {
                    warn!(error = %e, "取消失败");
                }
                continue;
            }
        };

        match event {
            Some(ProcedureEvent::Start { run_id }) => {
                info!(run_id = %run_id, "{}开始", label);
            }
            Some(ProcedureEvent::Progress(progress)) => {
                bar.set_length(progress.total.max(progress.processed));
                bar.set_position(progress.processed);
            }
            Some(ProcedureEvent::Pause) => bar.set_message(format!("{label}（已暂停）")),
            Some(ProcedureEvent::Resume) => bar.set_message(label.to_string()),
            Some(ProcedureEvent::Success) => {
                bar.finish_with_message(format!("{label}完成"));
                return Ok(());
            }
            Some(ProcedureEvent::Fail { error }) => {
                bar.abandon_with_message(format!("{label}失败"));
                return Err(BackupError::custom(format!("{label}失败: {error}")));
            }
            Some(ProcedureEvent::Cancel) => {
                bar.abandon_with_message(format!("{label}已取消"));
                return Ok(());
            }
            // 事件流在终止事件之前关闭，说明过程已经结束
            None => {
                bar.finish_and_clear();
                return Ok(());
            }
        }
    }
}

/// 以人类可读的方式格式化字节数
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
