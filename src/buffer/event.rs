//! 入站事件模型
//!
//! 网关 Webhook 的 JSON 结构：`instance` + `data.key.remoteJid` + `data.message.*`。
//! 文本可能出现在三种位置（conversation / extendedTextMessage.text / data.body），
//! 电话号码有多种编码（`<digits>@s.whatsapp.net`、`<digits>@lid`、带设备后缀等），需归一化为纯数字。
//! 未识别的字段通过 flatten 原样保留，聚合后的事件是最新模板的完整副本。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 消息类型（决定是否绕过缓冲）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Other,
}

impl MessageKind {
    /// 图片与音频需要立即交给编排器（可能需要视觉/转写处理）
    pub fn is_media(self) -> bool {
        matches!(self, MessageKind::Image | MessageKind::Audio)
    }
}

/// 会话键：(实例 ID, 归一化电话)，唯一确定一个聚合缓冲区
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub instance_id: String,
    pub phone: String,
}

impl ConversationKey {
    pub fn new(instance_id: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            phone: phone.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.instance_id, self.phone)
    }
}

/// 网关推送的入站事件
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<MessageKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
    /// 部分网关使用的扁平文本字段
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_jid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_me: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// `@lid` 会话中携带的真实号码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_pn: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaContent>,
    /// 媒体内容（网关开启 base64 推送时）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// 文本来源位置，聚合后写回同一位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextSlot {
    Conversation,
    ExtendedText,
    Body,
}

/// 归一化电话：取 `@` 之前、设备后缀 `:` 之前的部分，只保留数字
pub fn normalize_phone(raw: &str) -> String {
    let user = raw.split('@').next().unwrap_or(raw);
    let user = user.split(':').next().unwrap_or(user);
    user.chars().filter(|c| c.is_ascii_digit()).collect()
}

impl InboundEvent {
    /// 构造一条纯文本事件（测试与内部转发使用）
    pub fn text_message(instance: &str, remote_jid: &str, text: &str) -> Self {
        Self {
            event: Some("messages.upsert".to_string()),
            instance: Some(instance.to_string()),
            data: Some(EventData {
                key: Some(MessageKey {
                    remote_jid: Some(remote_jid.to_string()),
                    from_me: Some(false),
                    id: Some(uuid::Uuid::new_v4().to_string()),
                    ..Default::default()
                }),
                message_type: Some("conversation".to_string()),
                message: Some(MessageBody {
                    conversation: Some(text.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            extra: Map::new(),
        }
    }

    fn key(&self) -> Option<&MessageKey> {
        self.data.as_ref()?.key.as_ref()
    }

    fn body(&self) -> Option<&MessageBody> {
        self.data.as_ref()?.message.as_ref()
    }

    /// 发送方电话（归一化后）；群组消息或无法解析时返回 None
    pub fn phone(&self) -> Option<String> {
        let key = self.key()?;
        let jid = key.remote_jid.as_deref()?;
        if jid.ends_with("@g.us") {
            return None;
        }
        let source = if jid.ends_with("@lid") {
            key.sender_pn.as_deref().unwrap_or(jid)
        } else {
            jid
        };
        let phone = normalize_phone(source);
        if phone.is_empty() {
            None
        } else {
            Some(phone)
        }
    }

    /// 实例标识：顶层 `instance`，缺失时回退到 `data.instanceId`
    pub fn instance_id(&self) -> Option<String> {
        self.instance
            .as_deref()
            .or_else(|| self.data.as_ref()?.instance_id.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    }

    pub fn message_id(&self) -> Option<&str> {
        self.key()?.id.as_deref()
    }

    pub fn push_name(&self) -> Option<&str> {
        self.data
            .as_ref()?
            .push_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// 是否为本机（企业号）发出的消息
    pub fn from_me(&self) -> bool {
        self.key().and_then(|k| k.from_me).unwrap_or(false)
    }

    pub fn kind(&self) -> MessageKind {
        let message_type = self
            .data
            .as_ref()
            .and_then(|d| d.message_type.as_deref())
            .unwrap_or_default();
        match message_type {
            "imageMessage" => return MessageKind::Image,
            "audioMessage" | "pttMessage" => return MessageKind::Audio,
            "conversation" | "extendedTextMessage" => return MessageKind::Text,
            _ => {}
        }
        match self.body() {
            Some(b) if b.image_message.is_some() => MessageKind::Image,
            Some(b) if b.audio_message.is_some() => MessageKind::Audio,
            _ if self.text_slot().is_some() => MessageKind::Text,
            _ => MessageKind::Other,
        }
    }

    fn text_slot(&self) -> Option<TextSlot> {
        if let Some(body) = self.body() {
            if body.conversation.is_some() {
                return Some(TextSlot::Conversation);
            }
            if body
                .extended_text_message
                .as_ref()
                .is_some_and(|e| e.text.is_some())
            {
                return Some(TextSlot::ExtendedText);
            }
        }
        self.data
            .as_ref()
            .and_then(|d| d.body.as_ref())
            .map(|_| TextSlot::Body)
    }

    /// 消息文本（三种结构按优先级取第一个）
    pub fn text(&self) -> Option<&str> {
        match self.text_slot()? {
            TextSlot::Conversation => self.body()?.conversation.as_deref(),
            TextSlot::ExtendedText => self.body()?.extended_text_message.as_ref()?.text.as_deref(),
            TextSlot::Body => self.data.as_ref()?.body.as_deref(),
        }
    }

    /// 媒体消息的说明文字
    pub fn caption(&self) -> Option<&str> {
        let body = self.body()?;
        body.image_message
            .as_ref()
            .or(body.audio_message.as_ref())?
            .caption
            .as_deref()
    }

    /// 媒体 MIME 类型
    pub fn media_mime_type(&self) -> Option<&str> {
        let body = self.body()?;
        body.image_message
            .as_ref()
            .or(body.audio_message.as_ref())?
            .mimetype
            .as_deref()
    }

    /// 媒体 base64 内容
    pub fn media_base64(&self) -> Option<&str> {
        self.body()?.base64.as_deref()
    }

    /// 用合并后的文本覆盖消息文本字段（写回模板原本使用的位置，默认 conversation）
    pub fn with_text(mut self, text: String) -> Self {
        let slot = self.text_slot().unwrap_or(TextSlot::Conversation);
        let data = self.data.get_or_insert_with(EventData::default);
        match slot {
            TextSlot::Body => data.body = Some(text),
            TextSlot::ExtendedText => {
                let ext = data
                    .message
                    .get_or_insert_with(MessageBody::default)
                    .extended_text_message
                    .get_or_insert_with(ExtendedText::default);
                ext.text = Some(text);
            }
            TextSlot::Conversation => {
                data.message.get_or_insert_with(MessageBody::default).conversation = Some(text);
            }
        }
        self
    }
}
