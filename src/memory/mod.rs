//! 记忆层：角色标记的对话消息 + 与会话存储之间的适配器

pub mod adapter;
pub mod conversation;

pub use adapter::{ConversationMemory, DEFAULT_HISTORY_LIMIT};
pub use conversation::{ImageAttachment, Message, Role, ToolInvocation};
