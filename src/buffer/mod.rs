//! 入站消息聚合：事件模型 + 按会话键防抖的缓冲区

pub mod aggregator;
pub mod event;

pub use aggregator::{dispatch, merge_messages, FlushHandler, MessageBuffer, PendingMessage, DEFAULT_QUIET_WINDOW};
pub use event::{normalize_phone, ConversationKey, InboundEvent, MessageKind};
