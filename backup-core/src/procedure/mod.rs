//! 备份与恢复过程
//!
//! 每个过程都是一个状态机：
//!
//! ```text
//! Idle ──► Running ──► Completed | Failed
//!            │  ▲
//!            ▼  │
//!           Paused
//!            │
//!            ▼
//!        Cancelling ──► Cancelled
//! ```
//!
//! 过程的构造与运行是分开的，观察者可以在第一条事件发出前订阅。
//! 事件按 `start, progress*, (pause, resume)*, (success | fail | cancel)` 的顺序投递。

mod backup;
mod interruptable;
mod restore;

pub use backup::BackupProcedure;
pub use interruptable::Interruptable;
pub use restore::RestoreProcedure;

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// 过程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureState {
    Idle,
    Running,
    Paused,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl ProcedureState {
    /// 正在运行、已暂停或正在取消，都算占用
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProcedureState::Running | ProcedureState::Paused | ProcedureState::Cancelling
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcedureState::Completed | ProcedureState::Failed | ProcedureState::Cancelled
        )
    }
}

/// 进度，运行期间单调不减
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub processed: u64,
    pub total: u64,
}

/// 过程状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureInfo {
    pub state: ProcedureState,
    pub progress: Progress,
}

impl Default for ProcedureInfo {
    fn default() -> Self {
        Self {
            state: ProcedureState::Idle,
            progress: Progress::default(),
        }
    }
}

/// 生命周期事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProcedureEvent {
    Start { run_id: String },
    Progress(Progress),
    Pause,
    Resume,
    Success,
    Fail { error: String },
    Cancel,
}

impl ProcedureEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcedureEvent::Success | ProcedureEvent::Fail { .. } | ProcedureEvent::Cancel
        )
    }
}

/// 过程的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl ProcedureOutcome {
    pub fn state(&self) -> ProcedureState {
        match self {
            ProcedureOutcome::Completed => ProcedureState::Completed,
            ProcedureOutcome::Failed(_) => ProcedureState::Failed,
            ProcedureOutcome::Cancelled => ProcedureState::Cancelled,
        }
    }

    fn event(&self) -> ProcedureEvent {
        match self {
            ProcedureOutcome::Completed => ProcedureEvent::Success,
            ProcedureOutcome::Failed(error) => ProcedureEvent::Fail {
                error: error.clone(),
            },
            ProcedureOutcome::Cancelled => ProcedureEvent::Cancel,
        }
    }
}

/// 事件订阅流，终止事件之后结束
pub type ProcedureEvents = UnboundedReceiverStream<ProcedureEvent>;

#[derive(Debug, Default)]
struct TopicState {
    subscribers: Vec<mpsc::UnboundedSender<ProcedureEvent>>,
    closed: bool,
}

/// 单个过程的有序事件主题
#[derive(Debug, Default)]
pub(crate) struct EventTopic {
    state: Mutex<TopicState>,
}

impl EventTopic {
    pub(crate) fn subscribe(&self) -> ProcedureEvents {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // 已结束的过程返回立即结束的流
        if !state.closed {
            state.subscribers.push(sender);
        }
        UnboundedReceiverStream::new(receiver)
    }

    pub(crate) fn emit(&self, event: ProcedureEvent) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return;
        }
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.subscribers.clear();
    }
}

/// 把事件流写入日志，直到终止事件
pub fn log_events(label: &'static str, mut events: ProcedureEvents) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match &event {
                ProcedureEvent::Start { run_id } => info!(procedure = label, run_id, "开始"),
                ProcedureEvent::Progress(progress) => debug!(
                    procedure = label,
                    processed = progress.processed,
                    total = progress.total,
                    "进度"
                ),
                ProcedureEvent::Pause => info!(procedure = label, "已暂停"),
                ProcedureEvent::Resume => info!(procedure = label, "已继续"),
                ProcedureEvent::Success => info!(procedure = label, "✅ 完成"),
                ProcedureEvent::Fail { error } => warn!(procedure = label, error, "❌ 失败"),
                ProcedureEvent::Cancel => info!(procedure = label, "已取消"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topic_delivers_in_order_and_closes() {
        let topic = EventTopic::default();
        let first = topic.subscribe();

        topic.emit(ProcedureEvent::Start {
            run_id: "r1".to_string(),
        });
        let second = topic.subscribe();
        topic.emit(ProcedureEvent::Progress(Progress {
            processed: 1,
            total: 1,
        }));
        topic.emit(ProcedureEvent::Success);
        topic.close();
        // 关闭之后的事件被丢弃
        topic.emit(ProcedureEvent::Cancel);

        let first: Vec<_> = first.collect().await;
        assert_eq!(first.len(), 3);
        assert!(matches!(first[0], ProcedureEvent::Start { .. }));
        assert!(first[2].is_terminal());

        // 中途订阅只收到之后的事件
        let second: Vec<_> = second.collect().await;
        assert_eq!(second.len(), 2);

        let late: Vec<_> = topic.subscribe().collect().await;
        assert!(late.is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(ProcedureEvent::Progress(Progress {
            processed: 2,
            total: 5,
        }))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "progress", "processed": 2, "total": 5})
        );

        let json = serde_json::to_value(ProcedureEvent::Fail {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "fail", "error": "boom"}));
    }

    #[test]
    fn test_state_predicates() {
        assert!(ProcedureState::Paused.is_active());
        assert!(ProcedureState::Cancelling.is_active());
        assert!(!ProcedureState::Idle.is_active());
        assert!(ProcedureState::Cancelled.is_terminal());
        assert!(!ProcedureState::Running.is_terminal());
    }
}
