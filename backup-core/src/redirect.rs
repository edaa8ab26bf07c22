use crate::backend::BackupBackend;
use crate::constants::cloud::endpoints;
use std::sync::{Arc, PoisonError, RwLock};
use url::Url;

/// 重定向地址的类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    /// 云端登录完成后的回调
    Login,
    /// 自动备份订阅购买成功
    SubscriptionSuccess,
    Other,
}

/// 重定向拦截器
///
/// 持有当前后端的登录处理者。每次切换后端（以及开始云端恢复）时需要重新安装。
#[derive(Debug)]
pub struct RedirectInterceptor {
    origin: String,
    login_handler: RwLock<Option<Arc<dyn BackupBackend>>>,
}

impl RedirectInterceptor {
    pub fn new(origin: impl Into<String>) -> Self {
        let origin: String = origin.into();
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            login_handler: RwLock::new(None),
        }
    }

    /// 安装新的登录处理者，替换之前的
    pub fn install(&self, backend: Option<Arc<dyn BackupBackend>>) {
        if let Some(backend) = &backend {
            tracing::debug!(location = %backend.location(), "安装登录回调拦截");
        }
        *self
            .login_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = backend;
    }

    pub fn login_handler(&self) -> Option<Arc<dyn BackupBackend>> {
        self.login_handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn classify(&self, url: &Url) -> RedirectKind {
        let matches = |path: &str| url.as_str().starts_with(&format!("{}{}", self.origin, path));

        // 订阅回调路径更长，先匹配
        if matches(endpoints::SUBSCRIPTION_SUCCESS) {
            RedirectKind::SubscriptionSuccess
        } else if matches(endpoints::LOGIN_CALLBACK) {
            RedirectKind::Login
        } else {
            RedirectKind::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendLocation;
    use crate::test_support::MemoryBackend;

    #[test]
    fn test_classify() {
        let interceptor = RedirectInterceptor::new("http://localhost:3002/");
        let url = |s: &str| Url::parse(s).unwrap();

        assert_eq!(
            interceptor.classify(&url("http://localhost:3002/auth/google/callback?access_token=1")),
            RedirectKind::Login
        );
        assert_eq!(
            interceptor.classify(&url("http://localhost:3002/subscriptions/automatic-backup/success")),
            RedirectKind::SubscriptionSuccess
        );
        assert_eq!(
            interceptor.classify(&url("http://other.host/auth/google/callback")),
            RedirectKind::Other
        );
    }

    #[test]
    fn test_install_replaces_handler() {
        let interceptor = RedirectInterceptor::new("http://localhost:3002");
        assert!(interceptor.login_handler().is_none());

        interceptor.install(Some(Arc::new(MemoryBackend::new(BackendLocation::Local))));
        interceptor.install(Some(Arc::new(MemoryBackend::new(BackendLocation::Cloud))));
        assert_eq!(
            interceptor.login_handler().unwrap().location(),
            BackendLocation::Cloud
        );

        interceptor.install(None);
        assert!(interceptor.login_handler().is_none());
    }
}
