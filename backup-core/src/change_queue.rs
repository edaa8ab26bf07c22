//! 变更跟踪队列
//!
//! 存储侧产生的变更按发生顺序进入队列，由唯一的写入任务依次落到
//! `change_log` 表中（并发度固定为 1）。备份任务通过 [`ChangeTrackingQueue::drain`]
//! 一次性取走当前所有变更作为本次备份的快照，之后产生的变更属于下一次备份。

use crate::Result;
use crate::db::{ChangeRecord, Database};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error};

enum QueueCommand {
    Record(ChangeRecord),
    Flush(oneshot::Sender<()>),
}

/// 变更跟踪队列
#[derive(Debug)]
pub struct ChangeTrackingQueue {
    sender: mpsc::UnboundedSender<QueueCommand>,
    db: Database,
    drain_lock: Mutex<()>,
}

impl ChangeTrackingQueue {
    /// 创建队列并启动写入任务
    pub fn new(db: Database) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(Self::writer(db.clone(), receiver));

        Self {
            sender,
            db,
            drain_lock: Mutex::new(()),
        }
    }

    async fn writer(db: Database, mut receiver: mpsc::UnboundedReceiver<QueueCommand>) {
        while let Some(command) = receiver.recv().await {
            match command {
                QueueCommand::Record(change) => {
                    let key = change.key.clone();
                    if let Err(e) = db.append_change(change).await {
                        error!(key = %key, error = %e, "记录变更失败");
                    }
                }
                QueueCommand::Flush(respond_to) => {
                    let _ = respond_to.send(());
                }
            }
        }
        debug!("变更跟踪队列已关闭");
    }

    /// 追加一条变更，不等待落盘
    pub fn enqueue(&self, change: ChangeRecord) {
        if self.sender.send(QueueCommand::Record(change)).is_err() {
            error!("变更跟踪队列已关闭，变更被丢弃");
        }
    }

    /// 等待此前入队的变更全部写入
    pub async fn flush(&self) {
        let (respond_to, receiver) = oneshot::channel();
        if self.sender.send(QueueCommand::Flush(respond_to)).is_ok() {
            let _ = receiver.await;
        }
    }

    /// 取走当前所有待备份变更
    ///
    /// 同一时刻只允许一个调用方读取队列。
    pub async fn drain(&self) -> Result<Vec<ChangeRecord>> {
        let _guard = self.drain_lock.lock().await;
        self.flush().await;
        let changes = self.db.take_changes().await?;
        debug!(count = changes.len(), "取出待备份变更");
        Ok(changes)
    }

    /// 丢弃所有待备份变更
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.drain_lock.lock().await;
        self.flush().await;
        self.db.clear_changes().await
    }

    /// 待备份变更数量
    pub async fn pending(&self) -> Result<u64> {
        self.flush().await;
        self.db.count_changes().await
    }
}
