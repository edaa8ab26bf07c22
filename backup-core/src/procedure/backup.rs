use super::{Interruptable, ProcedureEvents, ProcedureInfo, ProcedureOutcome};
use crate::Result;
use crate::backend::BackupBackend;
use crate::db::{ChangeOperation, ChangeRecord};
use crate::settings::SettingsStore;
use crate::store::LocalStore;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 本次备份需要处理的一个对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingChange {
    pub key: String,
    pub operation: ChangeOperation,
}

/// 一次备份运行
///
/// 开始时取走变更队列的快照，之后产生的变更属于下一次备份。
/// 没有成功备份过、或上一次备份失败/被取消时，从本地存储重新计算全量变更。
#[derive(Debug)]
pub struct BackupProcedure {
    control: Interruptable,
    backend: Arc<dyn BackupBackend>,
    store: Arc<LocalStore>,
    settings: SettingsStore,
    run_id: String,
}

impl BackupProcedure {
    pub fn new(
        backend: Arc<dyn BackupBackend>,
        store: Arc<LocalStore>,
        settings: SettingsStore,
    ) -> Self {
        Self {
            control: Interruptable::new(),
            backend,
            store,
            settings,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn backend(&self) -> &Arc<dyn BackupBackend> {
        &self.backend
    }

    pub fn info(&self) -> ProcedureInfo {
        self.control.info()
    }

    pub fn subscribe(&self) -> ProcedureEvents {
        self.control.subscribe()
    }

    pub fn pause(&self) -> bool {
        self.control.pause()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// 切换到运行状态并返回执行体，调用方负责驱动
    pub fn start(self: &Arc<Self>) -> Result<BoxFuture<'static, ProcedureOutcome>> {
        self.control.begin(&self.run_id)?;
        let procedure = self.clone();
        Ok(async move { procedure.run().await }.boxed())
    }

    async fn run(&self) -> ProcedureOutcome {
        let started_at = Utc::now();
        let outcome = match self.transfer().await {
            Ok(true) => ProcedureOutcome::Completed,
            Ok(false) => ProcedureOutcome::Cancelled,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "备份失败");
                ProcedureOutcome::Failed(e.to_string())
            }
        };

        if let Err(e) = self.record_outcome(&outcome, started_at).await {
            error!(run_id = %self.run_id, error = %e, "保存备份结果失败");
        }
        self.control.finish(&outcome);
        outcome
    }

    async fn transfer(&self) -> Result<bool> {
        let changes = self.change_set().await?;
        self.control.set_total(changes.len() as u64);
        info!(
            run_id = %self.run_id,
            location = %self.backend.location(),
            count = changes.len(),
            "开始备份"
        );

        for change in changes {
            if !self.control.checkpoint().await {
                return Ok(false);
            }
            self.apply(&change).await?;
            self.control.advance();
        }

        Ok(!self.control.is_cancel_requested())
    }

    /// 计算本次备份的变更集
    async fn change_set(&self) -> Result<Vec<PendingChange>> {
        let full = self.settings.last_backup_time().await?.is_none()
            || self.settings.full_backup_required().await?;
        let drained = self.store.change_queue().drain().await?;

        if !full {
            return Ok(collapse_changes(drained));
        }

        info!(discarded = drained.len(), "执行全量备份");
        let local_keys = self.store.keys().await?;
        let local: HashSet<&str> = local_keys.iter().map(String::as_str).collect();
        let stale: Vec<String> = self
            .backend
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| !local.contains(key.as_str()))
            .collect();

        let mut changes: Vec<PendingChange> = local_keys
            .iter()
            .map(|key| PendingChange {
                key: key.clone(),
                operation: ChangeOperation::Create,
            })
            .collect();
        changes.extend(stale.into_iter().map(|key| PendingChange {
            key,
            operation: ChangeOperation::Delete,
        }));
        Ok(changes)
    }

    async fn apply(&self, change: &PendingChange) -> Result<()> {
        match change.operation {
            ChangeOperation::Create | ChangeOperation::Update => {
                match self.store.get(&change.key).await? {
                    Some(record) => self.backend.store_object(&record).await,
                    // 记录在快照之后被删除，删除会出现在下一次备份中
                    None => {
                        debug!(key = %change.key, "记录已不存在，跳过");
                        Ok(())
                    }
                }
            }
            ChangeOperation::Delete => self.backend.delete_object(&change.key).await,
        }
    }

    async fn record_outcome(
        &self,
        outcome: &ProcedureOutcome,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        match outcome {
            ProcedureOutcome::Completed => {
                self.settings.store_last_backup_time(started_at).await?;
                self.settings.set_full_backup_required(false).await
            }
            ProcedureOutcome::Failed(_) | ProcedureOutcome::Cancelled => {
                self.settings.set_full_backup_required(true).await
            }
        }
    }
}

/// 同一个键的多次变更只保留最后一次，保持首次出现的顺序
pub(crate) fn collapse_changes(changes: Vec<ChangeRecord>) -> Vec<PendingChange> {
    let mut order = Vec::new();
    let mut latest = HashMap::new();
    for change in changes {
        if latest.insert(change.key.clone(), change.operation).is_none() {
            order.push(change.key);
        }
    }

    order
        .into_iter()
        .filter_map(|key| {
            latest.remove(&key).map(|operation| PendingChange { key, operation })
        })
        .collect()
}
