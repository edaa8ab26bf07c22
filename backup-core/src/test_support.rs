//! 测试用的内存后端、通知与授权探测

use crate::backend::{BackendLocation, BackupBackend, BackupObject, ObjectStream, SizeEstimator};
use crate::backend_select::BackendFactory;
use crate::notifier::Notifier;
use crate::scheduler::EntitlementProbe;
use crate::settings::Entitlement;
use crate::{BackupError, Result};
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use url::Url;

/// 可编排的内存后端
#[derive(Debug)]
pub struct MemoryBackend {
    location: BackendLocation,
    objects: Mutex<BTreeMap<String, BackupObject>>,
    processed: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
    gate: Option<Arc<Semaphore>>,
    authenticated: AtomicBool,
    count_known: bool,
    redirects: Mutex<Vec<String>>,
}

impl MemoryBackend {
    pub fn new(location: BackendLocation) -> Self {
        Self {
            location,
            objects: Mutex::new(BTreeMap::new()),
            processed: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            gate: None,
            authenticated: AtomicBool::new(true),
            count_known: true,
            redirects: Mutex::new(Vec::new()),
        }
    }

    /// 每处理一个对象前都需要从信号量中取得一个许可
    pub fn gated(location: BackendLocation) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let backend = Self {
            gate: Some(gate.clone()),
            ..Self::new(location)
        };
        (backend, gate)
    }

    pub fn with_unknown_count(mut self) -> Self {
        self.count_known = false;
        self
    }

    pub fn fail_on(&self, key: &str) {
        *self.fail_on.lock().unwrap() = Some(key.to_string());
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }

    pub fn insert(&self, key: &str, payload: serde_json::Value) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            BackupObject {
                key: key.to_string(),
                payload,
            },
        );
    }

    pub fn objects(&self) -> BTreeMap<String, serde_json::Value> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.payload.clone()))
            .collect()
    }

    /// 已处理的对象键，按处理顺序
    pub fn processed(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn check_failure(&self, key: &str) -> Result<()> {
        if self.fail_on.lock().unwrap().as_deref() == Some(key) {
            return Err(BackupError::transfer(format!("模拟传输失败: {key}")));
        }
        Ok(())
    }
}

impl BackupBackend for MemoryBackend {
    fn location(&self) -> BackendLocation {
        self.location
    }

    fn is_authenticated(&self) -> BoxFuture<'_, bool> {
        futures::future::ready(self.authenticated.load(Ordering::SeqCst)).boxed()
    }

    fn handle_login_redirected_back<'a>(&'a self, url: &'a Url) -> BoxFuture<'a, Result<()>> {
        self.redirects.lock().unwrap().push(url.to_string());
        self.authenticated.store(true, Ordering::SeqCst);
        futures::future::ready(Ok(())).boxed()
    }

    fn send_notification_on_failure<'a>(
        &'a self,
        id: &'a str,
        notifier: &'a dyn Notifier,
        _estimate_size: &'a SizeEstimator,
    ) -> BoxFuture<'a, Result<String>> {
        notifier.dispatch(id);
        futures::future::ready(Ok(id.to_string())).boxed()
    }

    fn store_object<'a>(&'a self, object: &'a BackupObject) -> BoxFuture<'a, Result<()>> {
        async move {
            self.pass_gate().await;
            self.check_failure(&object.key)?;
            self.objects
                .lock()
                .unwrap()
                .insert(object.key.clone(), object.clone());
            self.processed.lock().unwrap().push(object.key.clone());
            Ok(())
        }
        .boxed()
    }

    fn delete_object<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.pass_gate().await;
            self.check_failure(key)?;
            self.objects.lock().unwrap().remove(key);
            self.processed.lock().unwrap().push(key.to_string());
            Ok(())
        }
        .boxed()
    }

    fn list_keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        let keys = self.objects.lock().unwrap().keys().cloned().collect();
        futures::future::ready(Ok(keys)).boxed()
    }

    fn object_count(&self) -> BoxFuture<'_, Result<Option<u64>>> {
        let count = self
            .count_known
            .then(|| self.objects.lock().unwrap().len() as u64);
        futures::future::ready(Ok(count)).boxed()
    }

    fn list_objects(&self) -> ObjectStream<'_> {
        let objects: Vec<_> = self.objects.lock().unwrap().values().cloned().collect();
        stream::iter(objects)
            .then(move |object| async move {
                self.pass_gate().await;
                self.check_failure(&object.key)?;
                self.processed.lock().unwrap().push(object.key.clone());
                Ok::<_, BackupError>(object)
            })
            .boxed()
    }
}

/// 记录所有已发送通知的通知器
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    dispatched: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn dispatched(&self) -> Vec<String> {
        self.dispatched.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn dispatch(&self, id: &str) {
        self.dispatched.lock().unwrap().push(id.to_string());
    }
}

/// 返回预设结果的授权探测，并统计调用次数
#[derive(Debug)]
pub struct ScriptedProbe {
    result: Mutex<std::result::Result<Entitlement, String>>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn active() -> Self {
        Self::returning(Ok(Entitlement {
            active: true,
            end_date: Some("2099-01-01".to_string()),
        }))
    }

    pub fn inactive() -> Self {
        Self::returning(Ok(Entitlement {
            active: false,
            end_date: None,
        }))
    }

    pub fn network_error() -> Self {
        Self::returning(Err("connection refused".to_string()))
    }

    pub fn returning(result: std::result::Result<Entitlement, String>) -> Self {
        Self {
            result: Mutex::new(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_result(&self, result: std::result::Result<Entitlement, String>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EntitlementProbe for ScriptedProbe {
    fn probe<'a>(&'a self, _user_id: &'a str) -> BoxFuture<'a, Result<Entitlement>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // 让出一次，模拟网络往返
            tokio::task::yield_now().await;
            self.result
                .lock()
                .unwrap()
                .clone()
                .map_err(BackupError::entitlement)
        }
        .boxed()
    }
}

/// 按位置返回固定后端实例的工厂
#[derive(Debug, Default)]
pub struct StaticBackendFactory {
    backends: Mutex<HashMap<BackendLocation, Arc<dyn BackupBackend>>>,
}

impl StaticBackendFactory {
    pub fn with(self, backend: Arc<dyn BackupBackend>) -> Self {
        self.backends
            .lock()
            .unwrap()
            .insert(backend.location(), backend);
        self
    }
}

impl BackendFactory for StaticBackendFactory {
    fn create(&self, location: BackendLocation) -> Result<Arc<dyn BackupBackend>> {
        self.backends
            .lock()
            .unwrap()
            .get(&location)
            .cloned()
            .ok_or(BackupError::BackendNotConfigured)
    }
}
