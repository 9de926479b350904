//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 触发关闭信号：Webhook 服务停止接收新请求，随后依次执行清理任务。
//! 聚合缓冲区在关闭时直接丢弃：未到期的计时器全部取消，不触发回调。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::buffer::MessageBuffer;

/// 单个清理任务的最长执行时间
pub const CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// 关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 进程级关闭信号，克隆后共享同一状态；只记录第一次触发的原因
#[derive(Clone)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(OnceLock::new()),
        }
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            info!(?reason, "Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 监听 Ctrl+C 与（Unix 下）SIGTERM
    pub fn install_signal_handlers(&self) {
        let manager = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = self.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            manager.shutdown(ShutdownReason::Signal);
                        }
                    }
                    Err(e) => warn!(error = %e, "SIGTERM handler not installed"),
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    fn name(&self) -> &'static str;
}

/// 按注册顺序执行清理任务；单个任务失败或超时不影响后续任务
pub struct ShutdownCoordinator {
    tasks: Vec<Box<dyn ShutdownCleanup>>,
    step_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            step_timeout: CLEANUP_TIMEOUT,
        }
    }

    pub fn register(&mut self, task: impl ShutdownCleanup + 'static) {
        self.tasks.push(Box::new(task));
    }

    /// 返回成功完成的任务数
    pub async fn run_cleanup(&self) -> usize {
        let mut completed = 0;
        for task in &self.tasks {
            match tokio::time::timeout(self.step_timeout, task.cleanup()).await {
                Ok(Ok(())) => {
                    completed += 1;
                    info!(task = task.name(), "Cleanup finished");
                }
                Ok(Err(e)) => warn!(task = task.name(), error = %e, "Cleanup failed"),
                Err(_) => warn!(
                    task = task.name(),
                    timeout_secs = self.step_timeout.as_secs(),
                    "Cleanup timed out"
                ),
            }
        }
        completed
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// 聚合缓冲区清理：取消所有计时器，丢弃未刷新的消息
pub struct BufferCleanup {
    buffer: Arc<MessageBuffer>,
}

impl BufferCleanup {
    pub fn new(buffer: Arc<MessageBuffer>) -> Self {
        Self { buffer }
    }
}

#[async_trait]
impl ShutdownCleanup for BufferCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let dropped = self.buffer.clear_all();
        if dropped > 0 {
            warn!(dropped, "Discarded pending message buffers on shutdown");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "MessageBuffer"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::buffer::{FlushHandler, InboundEvent};

    #[tokio::test]
    async fn test_first_reason_wins_and_waiters_wake() {
        let manager = ShutdownManager::new();
        assert!(!manager.is_shutdown());

        let waiter = manager.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown().await });

        manager.shutdown(ShutdownReason::Signal);
        manager.shutdown(ShutdownReason::UserInitiated);
        handle.await.unwrap();
        assert!(manager.is_shutdown());
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
    }

    struct Step {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        hang: bool,
    }

    #[async_trait]
    impl ShutdownCleanup for Step {
        async fn cleanup(&self) -> anyhow::Result<()> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.log.lock().unwrap().push(self.name);
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_task_does_not_block_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut coordinator = ShutdownCoordinator::new();
        for (name, hang) in [("a", false), ("b", true), ("c", false)] {
            coordinator.register(Step { name, log: log.clone(), hang });
        }

        assert_eq!(coordinator.run_cleanup().await, 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "c"]);
    }

    struct Never;

    #[async_trait]
    impl FlushHandler for Never {
        async fn handle(&self, _event: InboundEvent) -> anyhow::Result<()> {
            anyhow::bail!("buffer flushed during shutdown")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_cleanup_discards_pending() {
        let buffer = Arc::new(MessageBuffer::default());
        buffer
            .submit(
                InboundEvent::text_message("imob-01", "5541999998888@s.whatsapp.net", "oi"),
                Arc::new(Never),
            )
            .await;
        assert_eq!(buffer.pending_keys().len(), 1);

        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(BufferCleanup::new(Arc::clone(&buffer)));
        assert_eq!(coordinator.run_cleanup().await, 1);
        assert!(buffer.pending_keys().is_empty());
    }
}
