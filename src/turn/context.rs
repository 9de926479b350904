//! 回合上下文与回合结果
//!
//! TurnContext 每次调用新建，只属于这一回合；派生标志在构建时一次性算好。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::buffer::{InboundEvent, MessageKind};
use crate::intent::{Classification, IntentClassifier};
use crate::memory::{ImageAttachment, Message};
use crate::store::AgentProfile;
use crate::tools::PropertyCard;

/// 随消息到达的媒体
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub caption: Option<String>,
}

impl MediaPayload {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }

    /// 客户没有附带文字时代替消息内容的占位描述
    fn placeholder(&self) -> &'static str {
        if self.is_image() {
            IMAGE_PLACEHOLDER
        } else if self.is_audio() {
            AUDIO_PLACEHOLDER
        } else {
            MEDIA_PLACEHOLDER
        }
    }
}

const IMAGE_PLACEHOLDER: &str = "[imagem enviada pelo cliente]";
const AUDIO_PLACEHOLDER: &str =
    "[áudio enviado pelo cliente, conteúdo não disponível em texto; peça gentilmente que escreva a mensagem]";
const MEDIA_PLACEHOLDER: &str = "[arquivo enviado pelo cliente]";

/// 编排器的输入
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub phone: String,
    pub message: String,
    pub instance_id: String,
    /// 时间顺序，最新在最后
    pub history: Vec<Message>,
    pub media: Option<MediaPayload>,
    pub sender_name: Option<String>,
}

impl TurnInput {
    pub fn new(instance_id: impl Into<String>, phone: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            message: message.into(),
            instance_id: instance_id.into(),
            history: Vec::new(),
            media: None,
            sender_name: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_sender_name(mut self, name: Option<String>) -> Self {
        self.sender_name = name;
        self
    }

    /// 由（聚合后的）入站事件构建；无法确定实例或电话时返回 None
    pub fn from_event(event: &InboundEvent, history: Vec<Message>) -> Option<Self> {
        let instance_id = event.instance_id()?;
        let phone = event.phone()?;
        let message = event
            .text()
            .or_else(|| event.caption())
            .unwrap_or_default()
            .trim()
            .to_string();

        let kind = event.kind();
        let media = match (kind, event.media_base64()) {
            (kind, Some(encoded)) if kind.is_media() => match STANDARD.decode(encoded.trim()) {
                Ok(data) => Some(MediaPayload {
                    data,
                    mime_type: event
                        .media_mime_type()
                        .map(str::to_string)
                        .unwrap_or_else(|| default_mime(kind).to_string()),
                    caption: event.caption().map(str::to_string),
                }),
                Err(e) => {
                    warn!(error = %e, phone = %phone, "media payload is not valid base64");
                    None
                }
            },
            _ => None,
        };

        // 网关未附带内容的媒体（常见于语音）仍是一个回合
        let message = match (&media, kind) {
            (None, MessageKind::Audio) if message.is_empty() => AUDIO_PLACEHOLDER.to_string(),
            (None, MessageKind::Image) if message.is_empty() => IMAGE_PLACEHOLDER.to_string(),
            _ => message,
        };

        Some(Self {
            phone,
            message,
            instance_id,
            history,
            media,
            sender_name: event.push_name().map(str::to_string),
        })
    }
}

fn default_mime(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Audio => "audio/ogg",
        _ => "image/jpeg",
    }
}

/// 单回合上下文：输入 + 派生标志
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub phone: String,
    pub message: String,
    pub instance_id: String,
    pub history: Vec<Message>,
    pub media: Option<MediaPayload>,
    pub sender_name: Option<String>,
    pub is_first_message: bool,
    pub is_greeting: bool,
    pub is_property_search: bool,
    pub is_show_more: bool,
    pub classification: Classification,
}

impl TurnContext {
    pub fn build(input: TurnInput, classifier: &IntentClassifier) -> Self {
        let classification = classifier.classify(&input.message, &input.history);
        Self {
            is_first_message: input.history.is_empty(),
            is_greeting: classification.is_greeting,
            is_property_search: classification.is_property_search,
            is_show_more: classification.is_show_more,
            classification,
            phone: input.phone,
            message: input.message,
            instance_id: input.instance_id,
            history: input.history,
            media: input.media,
            sender_name: input.sender_name,
        }
    }

    /// 搜索工具应被强制调用
    pub fn forces_search(&self) -> bool {
        self.is_property_search || self.is_show_more
    }

    /// 当前消息（图片作为多模态内容附带，其他媒体只留文字描述）
    pub fn user_message(&self) -> Message {
        let text = match &self.media {
            Some(media) if self.message.is_empty() => media.placeholder().to_string(),
            _ => self.message.clone(),
        };
        match &self.media {
            Some(media) if media.is_image() => Message::user(text).with_image(ImageAttachment {
                mime_type: media.mime_type.clone(),
                data: media.data.clone(),
            }),
            _ => Message::user(text),
        }
    }
}

/// 产生回复的智能体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub id: String,
    pub name: String,
}

impl From<&AgentProfile> for AgentRef {
    fn from(profile: &AgentProfile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
        }
    }
}

/// 回合结果：文本 + 可选的房源列表与「还有更多」标志
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub text: String,
    pub properties: Vec<PropertyCard>,
    pub has_more: Option<bool>,
    pub agent: Option<AgentRef>,
}

impl TurnResponse {
    pub fn text(text: impl Into<String>, agent: Option<AgentRef>) -> Self {
        Self {
            text: text.into(),
            properties: Vec::new(),
            has_more: None,
            agent,
        }
    }
}
