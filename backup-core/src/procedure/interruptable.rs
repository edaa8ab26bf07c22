use super::{EventTopic, ProcedureEvent, ProcedureEvents, ProcedureInfo, ProcedureOutcome, ProcedureState};
use crate::{BackupError, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 可中断的过程控制器
///
/// 对外提供暂停、继续、取消；对内提供检查点。暂停和取消都是协作式的，
/// 只在两个处理单元之间的检查点生效，正在进行的后端调用不会被打断。
#[derive(Debug)]
pub struct Interruptable {
    status: watch::Sender<ProcedureInfo>,
    events: EventTopic,
    pause_requested: watch::Sender<bool>,
    cancel_token: CancellationToken,
}

impl Default for Interruptable {
    fn default() -> Self {
        Self::new()
    }
}

impl Interruptable {
    pub fn new() -> Self {
        Self {
            status: watch::Sender::new(ProcedureInfo::default()),
            events: EventTopic::default(),
            pause_requested: watch::Sender::new(false),
            cancel_token: CancellationToken::new(),
        }
    }

    /// 当前状态快照，不会阻塞
    pub fn info(&self) -> ProcedureInfo {
        *self.status.borrow()
    }

    pub fn state(&self) -> ProcedureState {
        self.status.borrow().state
    }

    /// 订阅之后的生命周期事件
    pub fn subscribe(&self) -> ProcedureEvents {
        self.events.subscribe()
    }

    /// 请求在下一个检查点暂停，只有运行中的过程可以暂停
    pub fn pause(&self) -> bool {
        if self.state() != ProcedureState::Running {
            return false;
        }
        self.pause_requested.send_replace(true);
        true
    }

    /// 取消暂停请求，已暂停的过程在检查点处继续
    pub fn resume(&self) -> bool {
        let was_requested = self.pause_requested.send_replace(false);
        was_requested || self.state() == ProcedureState::Paused
    }

    /// 请求取消，剩余的处理单元会被丢弃
    pub fn cancel(&self) -> bool {
        let cancelled = self.status.send_if_modified(|info| {
            if info.state.is_active() && info.state != ProcedureState::Cancelling {
                info.state = ProcedureState::Cancelling;
                true
            } else {
                false
            }
        });
        if cancelled {
            self.cancel_token.cancel();
        }
        cancelled
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub(crate) fn begin(&self, run_id: &str) -> Result<()> {
        let started = self.status.send_if_modified(|info| {
            if info.state == ProcedureState::Idle {
                info.state = ProcedureState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(BackupError::custom(format!(
                "过程已经运行过，当前状态: {:?}",
                self.state()
            )));
        }
        self.events.emit(ProcedureEvent::Start {
            run_id: run_id.to_string(),
        });
        Ok(())
    }

    pub(crate) fn set_total(&self, total: u64) {
        self.status.send_modify(|info| info.progress.total = total);
    }

    /// 完成一个处理单元
    pub(crate) fn advance(&self) {
        let mut progress = Default::default();
        self.status.send_modify(|info| {
            info.progress.processed += 1;
            info.progress.total = info.progress.total.max(info.progress.processed);
            progress = info.progress;
        });
        self.events.emit(ProcedureEvent::Progress(progress));
    }

    /// 检查点：处理暂停与取消，返回 false 表示应当停止
    pub(crate) async fn checkpoint(&self) -> bool {
        if self.cancel_token.is_cancelled() {
            return false;
        }
        if !*self.pause_requested.borrow() {
            return true;
        }

        let paused = self.status.send_if_modified(|info| {
            if info.state == ProcedureState::Running {
                info.state = ProcedureState::Paused;
                true
            } else {
                false
            }
        });
        if !paused {
            return !self.cancel_token.is_cancelled();
        }
        self.events.emit(ProcedureEvent::Pause);

        let mut resumed = self.pause_requested.subscribe();
        tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return false,
            _ = resumed.wait_for(|requested| !*requested) => {}
        }

        self.leave_pause()
    }

    /// 从暂停回到运行；期间已被取消时不发出 Resume
    fn leave_pause(&self) -> bool {
        let resumed = self.status.send_if_modified(|info| {
            if info.state == ProcedureState::Paused {
                info.state = ProcedureState::Running;
                true
            } else {
                false
            }
        });
        if resumed {
            self.events.emit(ProcedureEvent::Resume);
        }
        resumed && !self.cancel_token.is_cancelled()
    }

    /// 进入终止状态并发出终止事件，之后不再有事件
    pub(crate) fn finish(&self, outcome: &ProcedureOutcome) {
        self.status
            .send_modify(|info| info.state = outcome.state());
        self.events.emit(outcome.event());
        self.events.close();
    }
}
