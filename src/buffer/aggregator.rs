//! 消息聚合缓冲区（防抖）
//!
//! 同一会话键在静默窗口内连续到达的文本消息合并为一个逻辑回合：
//! 每条新消息取消并替换旧计时器（防抖而非固定窗口批处理），窗口到期后按到达顺序逐行拼接。
//! 媒体消息、无法解析会话键的事件、空文本事件直接绕过缓冲。
//!
//! 每个键的状态：Idle -> Pending(timer) -> Flushing -> Idle。
//! 刷新前先从表中删除条目，回调执行期间到达的消息会开启新条目，不会并入已刷新的批次。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use super::event::{ConversationKey, InboundEvent};

/// 默认静默窗口
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_secs(15);

/// 刷新回调：接收合并后的事件；错误只记录日志，不会传回 submit 的调用方
#[async_trait]
pub trait FlushHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent) -> anyhow::Result<()>;
}

/// 等待聚合的单条消息
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub event: InboundEvent,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub message_id: Option<String>,
}

struct BufferEntry {
    key: ConversationKey,
    messages: Vec<PendingMessage>,
    /// 每个条目最多一个存活计时器
    timer: JoinHandle<()>,
    /// 与计时器一一对应；过期计时器醒来后发现代数不符即放弃
    generation: u64,
}

type EntryMap = Arc<Mutex<HashMap<ConversationKey, BufferEntry>>>;

/// 按会话键聚合的防抖缓冲区
pub struct MessageBuffer {
    entries: EntryMap,
    quiet_window: Duration,
    next_generation: AtomicU64,
}

impl MessageBuffer {
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            quiet_window,
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// 提交入站事件；返回 true 表示已缓冲，false 表示已绕过并同步调用了回调
    pub async fn submit(&self, event: InboundEvent, handler: Arc<dyn FlushHandler>) -> bool {
        match self.try_enqueue(event, Arc::clone(&handler)) {
            Ok(()) => true,
            Err(event) => {
                dispatch(handler, event).await;
                false
            }
        }
    }

    /// 同步入队；需要绕过缓冲的事件原样返回，由调用方决定如何投递。
    /// 中间没有挂起点，调用方按到达顺序调用即可保持同一会话的消息顺序。
    pub fn try_enqueue(&self, event: InboundEvent, handler: Arc<dyn FlushHandler>) -> Result<(), InboundEvent> {
        let (Some(phone), Some(instance_id)) = (event.phone(), event.instance_id()) else {
            tracing::debug!("Cannot extract conversation key, dispatching unbuffered");
            return Err(event);
        };

        if event.kind().is_media() {
            tracing::debug!(instance = %instance_id, phone = %phone, "Media message bypasses buffer");
            return Err(event);
        }

        let text = event.text().map(str::to_string).unwrap_or_default();
        if text.trim().is_empty() {
            tracing::debug!(instance = %instance_id, phone = %phone, "Empty text, dispatching unbuffered");
            return Err(event);
        }

        let message = PendingMessage {
            message_id: event.message_id().map(String::from),
            event,
            text,
            received_at: Utc::now(),
        };
        self.enqueue(ConversationKey::new(instance_id, phone), message, handler);
        Ok(())
    }

    /// 追加消息并替换计时器；读取与写入之间没有挂起点
    fn enqueue(&self, key: ConversationKey, message: PendingMessage, handler: Arc<dyn FlushHandler>) {
        let mut entries = lock(&self.entries);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(entry) = entries.get_mut(&key) {
            let duplicate = message.message_id.is_some()
                && entry
                    .messages
                    .iter()
                    .any(|m| m.message_id == message.message_id);
            if duplicate {
                tracing::debug!(key = %key, "Duplicate message id ignored");
                return;
            }
            entry.timer.abort();
            entry.messages.push(message);
            entry.generation = generation;
            entry.timer = self.spawn_timer(key.clone(), generation, handler);
            tracing::debug!(key = %key, pending = entry.messages.len(), "Message appended, timer reset");
        } else {
            let timer = self.spawn_timer(key.clone(), generation, handler);
            tracing::debug!(key = %key, "New buffer entry");
            entries.insert(
                key.clone(),
                BufferEntry {
                    key,
                    messages: vec![message],
                    timer,
                    generation,
                },
            );
        }
    }

    fn spawn_timer(
        &self,
        key: ConversationKey,
        generation: u64,
        handler: Arc<dyn FlushHandler>,
    ) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let window = self.quiet_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            flush(entries, key, generation, handler).await;
        })
    }

    /// 取消所有计时器并丢弃未刷新的消息（进程关闭时使用，不触发回调）
    pub fn clear_all(&self) -> usize {
        let mut entries = lock(&self.entries);
        let count = entries.len();
        for (_, entry) in entries.drain() {
            entry.timer.abort();
        }
        count
    }

    /// 当前有待刷新消息的会话键
    pub fn pending_keys(&self) -> Vec<ConversationKey> {
        lock(&self.entries).keys().cloned().collect()
    }

    /// 某会话键下等待中的消息数（无条目时为 0）
    pub fn pending_count(&self, key: &ConversationKey) -> usize {
        lock(&self.entries)
            .get(key)
            .map(|e| e.messages.len())
            .unwrap_or(0)
    }
}

impl Default for MessageBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_WINDOW)
    }
}

fn lock(entries: &EntryMap) -> MutexGuard<'_, HashMap<ConversationKey, BufferEntry>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 不经缓冲直接调用回调；错误只记录日志
pub async fn dispatch(handler: Arc<dyn FlushHandler>, event: InboundEvent) {
    if let Err(e) = handler.handle(event).await {
        tracing::error!(error = %e, "Flush handler failed for unbuffered event");
    }
}

/// 计时器到期：条目代数匹配时先删除再回调
async fn flush(entries: EntryMap, key: ConversationKey, generation: u64, handler: Arc<dyn FlushHandler>) {
    let entry = {
        let mut map = lock(&entries);
        match map.get(&key) {
            Some(e) if e.generation == generation => map.remove(&key),
            _ => None,
        }
    };
    let Some(entry) = entry else {
        return;
    };

    let count = entry.messages.len();
    let entry_key = entry.key;
    let Some(merged) = merge_messages(entry.messages) else {
        return;
    };

    tracing::info!(key = %entry_key, messages = count, "Flushing aggregated messages");
    if let Err(e) = handler.handle(merged).await {
        tracing::error!(key = %entry_key, error = %e, "Flush handler failed");
    }
}

/// 按到达顺序逐行拼接文本，以最后一条事件为模板写回合并文本
pub fn merge_messages(messages: Vec<PendingMessage>) -> Option<InboundEvent> {
    let text = messages
        .iter()
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let template = messages.into_iter().last()?.event;
    Some(template.with_text(text))
}
