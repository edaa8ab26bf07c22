use std::fmt;

/// 通知发送接口
///
/// 通知的展示方式不在本库的范围内，这里只负责按 ID 投递。
pub trait Notifier: Send + Sync + fmt::Debug {
    fn dispatch(&self, id: &str);
}

/// 把通知写入日志的默认实现
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, id: &str) {
        tracing::warn!(notification = id, "📣 发送通知");
    }
}
