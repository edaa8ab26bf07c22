use super::{BackendLocation, BackupBackend, BackupObject, ObjectStream, SizeEstimator};
use crate::constants::cloud::{endpoints, http};
use crate::constants::notifications;
use crate::notifier::Notifier;
use crate::settings::SettingsStore;
use crate::{BackupError, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// 对象列表的一页
#[derive(Debug, Deserialize)]
struct ObjectPage {
    keys: Vec<String>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// 云端备份后端
///
/// 登录凭据在首次使用时从持久化设置中读取，登录回调成功后写回设置。
#[derive(Debug, Clone)]
pub struct CloudBackend {
    client: Client,
    origin: String,
    max_upload_bytes: u64,
    settings: SettingsStore,
    access_token: Arc<RwLock<Option<String>>>,
    token_loaded: Arc<AtomicBool>,
}

impl CloudBackend {
    pub fn new(
        client: Client,
        origin: impl Into<String>,
        max_upload_bytes: u64,
        settings: SettingsStore,
    ) -> Self {
        let origin: String = origin.into();
        Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
            max_upload_bytes,
            settings,
            access_token: Arc::new(RwLock::new(None)),
            token_loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 创建带默认超时和 User-Agent 的 HTTP 客户端
    pub fn default_client() -> Result<Client> {
        Ok(Client::builder()
            .connect_timeout(Duration::from_secs(http::DEFAULT_TIMEOUT))
            .user_agent(http::USER_AGENT)
            .build()?)
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn objects_url(&self) -> String {
        format!("{}{}", self.origin, endpoints::OBJECTS)
    }

    fn object_url(&self, key: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        format!("{}/{}", self.objects_url(), encoded)
    }

    /// 获取当前凭据，首次调用时从设置中加载
    async fn access_token(&self) -> Option<String> {
        if !self.token_loaded.load(Ordering::Acquire) {
            let mut guard = self.access_token.write().await;
            if !self.token_loaded.load(Ordering::Acquire) {
                match self.settings.cloud_access_token().await {
                    Ok(token) => *guard = token,
                    Err(e) => warn!(error = %e, "读取云端登录凭据失败"),
                }
                self.token_loaded.store(true, Ordering::Release);
            }
            return guard.clone();
        }
        self.access_token.read().await.clone()
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self
            .access_token()
            .await
            .ok_or_else(|| BackupError::auth("尚未登录云端备份"))?;
        Ok(request.bearer_auth(token))
    }

    /// 检查响应状态，401 会清空内存中的凭据
    async fn check(&self, response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            *self.access_token.write().await = None;
            return Err(BackupError::auth(format!("{action}: 登录已失效")));
        }
        let text = response.text().await.unwrap_or_default();
        Err(BackupError::transfer(format!("{action}: {status} - {text}")))
    }

    async fn fetch_page(&self, cursor: Option<&str>) -> Result<ObjectPage> {
        let mut request = self.client.get(self.objects_url());
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let response = self.authorized(request).await?.send().await?;
        let response = self.check(response, "获取备份对象列表").await?;
        Ok(response.json().await?)
    }

    async fn fetch_object(&self, key: String) -> Result<BackupObject> {
        let request = self.client.get(self.object_url(&key));
        let response = self.authorized(request).await?.send().await?;
        let response = self.check(response, "下载备份对象").await?;
        Ok(response.json().await?)
    }

    /// 按页惰性地产出所有对象键
    fn key_stream(&self) -> BoxStream<'_, Result<String>> {
        // None 表示已经没有下一页
        stream::try_unfold(Some(None::<String>), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok::<_, BackupError>(None);
            };
            let page = self.fetch_page(cursor.as_deref()).await?;
            debug!(count = page.keys.len(), "获取到一页备份对象");
            let next = page.next_cursor.map(Some);
            let keys = stream::iter(page.keys.into_iter().map(Ok::<_, BackupError>));
            Ok(Some((keys, next)))
        })
        .try_flatten()
        .boxed()
    }
}

/// 从登录回调地址中取出 access_token，查询参数和片段都可能携带
fn extract_access_token(url: &Url) -> Option<String> {
    let from_query = url
        .query_pairs()
        .find(|(k, _)| k == "access_token")
        .map(|(_, v)| v.into_owned());

    from_query.or_else(|| {
        url.fragment().and_then(|fragment| {
            url::form_urlencoded::parse(fragment.as_bytes())
                .find(|(k, _)| k == "access_token")
                .map(|(_, v)| v.into_owned())
        })
    })
}

impl BackupBackend for CloudBackend {
    fn location(&self) -> BackendLocation {
        BackendLocation::Cloud
    }

    fn is_authenticated(&self) -> BoxFuture<'_, bool> {
        async move { self.access_token().await.is_some() }.boxed()
    }

    fn handle_login_redirected_back<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<()>> {
        async move {
            let token = extract_access_token(url)
                .filter(|t| !t.is_empty())
                .ok_or_else(|| BackupError::auth("登录回调中缺少 access_token"))?;

            self.settings.set_cloud_access_token(&token).await?;
            *self.access_token.write().await = Some(token);
            self.token_loaded.store(true, Ordering::Release);
            info!("云端备份登录成功");
            Ok(())
        }
        .boxed()
    }

    fn send_notification_on_failure<'a>(
        &'a self,
        id: &'a str,
        notifier: &'a dyn Notifier,
        estimate_size: &'a SizeEstimator,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let error_id = if !self.is_authenticated().await {
                notifications::DRIVE_AUTH_ERROR.to_string()
            } else if self.max_upload_bytes > 0
                && estimate_size().await?.bytes > self.max_upload_bytes
            {
                notifications::DRIVE_SIZE_EMPTY.to_string()
            } else {
                id.to_string()
            };
            notifier.dispatch(&error_id);
            Ok(error_id)
        }
        .boxed()
    }

    fn store_object<'a>(&'a self, object: &'a BackupObject) -> BoxFuture<'a, Result<()>> {
        async move {
            let request = self.client.put(self.object_url(&object.key)).json(object);
            let response = self.authorized(request).await?.send().await?;
            self.check(response, "上传备份对象").await?;
            Ok(())
        }
        .boxed()
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            let request = self.client.delete(self.object_url(key));
            let response = self.authorized(request).await?.send().await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            self.check(response, "删除备份对象").await?;
            Ok(())
        }
        .boxed()
    }

    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        self.key_stream().try_collect::<Vec<_>>().boxed()
    }

    fn object_count(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        // 列表接口分页返回，事先无法得知总数
        futures::future::ready(Ok(None)).boxed()
    }

    fn list_objects(&self) -> ObjectStream<'_> {
        self.key_stream()
            .and_then(move |key| self.fetch_object(key))
            .boxed()
    }
}
