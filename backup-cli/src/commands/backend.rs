use crate::app::CliApp;
use backup_core::Result;
use backup_core::backend::BackendLocation;
use backup_core::redirect::RedirectKind;
use tracing::{info, instrument, warn};

/// 设置备份位置
#[instrument(skip(app))]
pub async fn run_set_backend(app: &CliApp, location: BackendLocation) -> Result<()> {
    app.orchestrator.set_backend_location(location).await?;
    info!("✅ 备份位置已设置为: {}", location);

    if location == BackendLocation::Cloud && !app.orchestrator.is_backup_authenticated().await {
        info!("👉 请在浏览器中登录: {}", app.orchestrator.login_link()?);
        info!("   登录完成后运行 'backup-cli login <重定向地址>'");
    }
    Ok(())
}

/// 显示当前备份位置和认证状态
pub async fn show_backend(app: &CliApp) -> Result<()> {
    match app.orchestrator.get_backend_location().await? {
        Some(location) => {
            info!("备份位置: {}", location);
            let authenticated = app.orchestrator.is_backup_authenticated().await;
            info!("认证状态: {}", if authenticated { "已认证" } else { "未认证" });
        }
        None => info!("备份位置: 未设置，可运行 'backup-cli set-backend local|cloud'"),
    }
    Ok(())
}

pub fn show_login_link(app: &CliApp) -> Result<()> {
    info!("{}", app.orchestrator.login_link()?);
    Ok(())
}

/// 处理浏览器重定向回来的地址
#[instrument(skip(app, url))]
pub async fn run_login(app: &CliApp, url: &str) -> Result<()> {
    match app.orchestrator.handle_redirect(url).await? {
        RedirectKind::Login => {
            if app.orchestrator.is_backup_authenticated().await {
                info!("✅ 云端登录成功");
            } else {
                warn!("登录回调已处理，但当前后端仍未认证");
            }
        }
        RedirectKind::SubscriptionSuccess => info!("✅ 已重新检查自动备份授权"),
        RedirectKind::Other => warn!("无法识别的重定向地址: {}", url),
    }
    Ok(())
}
