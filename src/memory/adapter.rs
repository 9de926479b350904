//! 会话记忆适配器
//!
//! 在持久化的会话/消息记录与编排器使用的角色标记历史之间转换：
//! 客户 -> user，智能体 -> assistant，系统备注 -> system；只保留最近 history_limit 条。

use std::sync::Arc;

use tracing::debug;

use super::conversation::Message;
use crate::store::{ConversationRecord, ConversationStore, MessageSender, StoreError, StoredMessage};

pub const DEFAULT_HISTORY_LIMIT: usize = 30;

pub struct ConversationMemory {
    store: Arc<dyn ConversationStore>,
    history_limit: usize,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn ConversationStore>, history_limit: usize) -> Self {
        Self {
            store,
            history_limit: history_limit.max(1),
        }
    }

    /// 确保会话存在（读取历史之前调用）
    pub async fn ensure_conversation(
        &self,
        instance_id: &str,
        phone: &str,
        contact_name: Option<&str>,
    ) -> Result<ConversationRecord, StoreError> {
        self.store
            .get_or_create_conversation(instance_id, phone, contact_name)
            .await
    }

    /// 最近的历史，时间顺序（最新在最后）
    pub async fn load_history(&self, instance_id: &str, phone: &str) -> Result<Vec<Message>, StoreError> {
        let stored = self.store.history(instance_id, phone).await?;
        let skip = stored.len().saturating_sub(self.history_limit);
        let history: Vec<Message> = stored.into_iter().skip(skip).map(to_message).collect();
        debug!(instance = instance_id, phone, messages = history.len(), "history loaded");
        Ok(history)
    }

    /// 持久化一次往返：客户消息 + 回复
    pub async fn record_exchange(
        &self,
        instance_id: &str,
        phone: &str,
        inbound: &str,
        reply: &str,
    ) -> Result<(), StoreError> {
        self.store
            .append_message(instance_id, phone, StoredMessage::new(MessageSender::Customer, inbound))
            .await?;
        self.store
            .append_message(instance_id, phone, StoredMessage::new(MessageSender::Agent, reply))
            .await
    }
}

fn to_message(stored: StoredMessage) -> Message {
    match stored.sender {
        MessageSender::Customer => Message::user(stored.body),
        MessageSender::Agent => Message::assistant(stored.body),
        MessageSender::System => Message::system(stored.body),
    }
}
