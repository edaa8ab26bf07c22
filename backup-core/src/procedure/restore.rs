use super::{Interruptable, ProcedureOutcome};
use crate::Result;
use crate::backend::BackupBackend;
use crate::store::LocalStore;
use futures::FutureExt;
use futures::TryStreamExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// 一次恢复运行
///
/// 从后端逐个读取对象写入本地存储，写入不会产生变更记录。
/// 控制通过 [`Interruptable`] 进行，成功之后的后续工作由编排层负责。
#[derive(Debug)]
pub struct RestoreProcedure {
    control: Interruptable,
    backend: Arc<dyn BackupBackend>,
    store: Arc<LocalStore>,
    run_id: String,
}

impl RestoreProcedure {
    pub fn new(backend: Arc<dyn BackupBackend>, store: Arc<LocalStore>) -> Self {
        Self {
            control: Interruptable::new(),
            backend,
            store,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn interruptable(&self) -> &Interruptable {
        &self.control
    }

    pub fn backend(&self) -> &Arc<dyn BackupBackend> {
        &self.backend
    }

    /// 返回一个无参的启动闭包
    ///
    /// 调用闭包时才开始运行，调用方可以先订阅事件。
    pub fn runner(
        self: &Arc<Self>,
    ) -> impl FnOnce() -> Result<BoxFuture<'static, ProcedureOutcome>> + Send + 'static {
        let procedure = self.clone();
        move || {
            procedure.control.begin(&procedure.run_id)?;
            Ok(async move { procedure.run().await }.boxed())
        }
    }

    async fn run(&self) -> ProcedureOutcome {
        let outcome = match self.transfer().await {
            Ok(true) => ProcedureOutcome::Completed,
            Ok(false) => ProcedureOutcome::Cancelled,
            Err(e) => {
                error!(run_id = %self.run_id, error = %e, "恢复失败");
                ProcedureOutcome::Failed(e.to_string())
            }
        };
        self.control.finish(&outcome);
        outcome
    }

    async fn transfer(&self) -> Result<bool> {
        let total = self.backend.object_count().await?;
        if let Some(total) = total {
            self.control.set_total(total);
        }
        info!(
            run_id = %self.run_id,
            location = %self.backend.location(),
            total = ?total,
            "开始恢复"
        );

        let mut objects = self.backend.list_objects();
        loop {
            if !self.control.checkpoint().await {
                return Ok(false);
            }
            let Some(object) = objects.try_next().await? else {
                break;
            };
            self.store.put_untracked(&object.key, &object.payload).await?;
            self.control.advance();
        }

        Ok(!self.control.is_cancel_requested())
    }
}
