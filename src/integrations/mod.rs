//! 外部集成：出站消息网关 + WhatsApp Webhook 入口（需 `whatsapp` feature）

pub mod gateway;

#[cfg(feature = "whatsapp")]
pub mod whatsapp;

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use crate::turn::TurnResponse;

pub use gateway::HttpGateway;

/// 出站消息网关（按实例发送，客户看到的是该实例的号码）
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_text(&self, instance_id: &str, phone: &str, text: &str) -> anyhow::Result<()>;

    async fn send_image(
        &self,
        instance_id: &str,
        phone: &str,
        url: &str,
        caption: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// 依次投递一个回合的结果：先文本，再逐个房源（文本块 + 图片）
///
/// 文本发送失败返回错误；单个房源或图片失败只记录日志，继续后续内容。
pub async fn deliver_response(
    gateway: &dyn MessagingGateway,
    instance_id: &str,
    phone: &str,
    response: &TurnResponse,
) -> anyhow::Result<()> {
    if !response.text.trim().is_empty() {
        gateway.send_text(instance_id, phone, &response.text).await?;
    }
    for card in &response.properties {
        if let Err(e) = gateway.send_text(instance_id, phone, &card.description).await {
            warn!(error = %e, code = %card.code, "failed to send property card");
            continue;
        }
        for image in &card.images {
            if let Err(e) = gateway.send_image(instance_id, phone, image, None).await {
                warn!(error = %e, code = %card.code, image = %image, "failed to send property image");
            }
        }
    }
    Ok(())
}

/// 发出的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text { phone: String, text: String },
    Image { phone: String, url: String },
}

/// 记录所有发送内容的网关（用于测试，无需网络）
#[derive(Debug, Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<SentMessage>>,
    fail_for: Option<String>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发往指定号码的消息一律失败
    pub fn failing_for(phone: impl Into<String>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: Some(phone.into()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn record(&self, phone: &str, message: SentMessage) -> anyhow::Result<()> {
        if self.fail_for.as_deref() == Some(phone) {
            anyhow::bail!("gateway unavailable for {phone}");
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message);
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_text(&self, _instance_id: &str, phone: &str, text: &str) -> anyhow::Result<()> {
        self.record(
            phone,
            SentMessage::Text {
                phone: phone.to_string(),
                text: text.to_string(),
            },
        )
    }

    async fn send_image(
        &self,
        _instance_id: &str,
        phone: &str,
        url: &str,
        _caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.record(
            phone,
            SentMessage::Image {
                phone: phone.to_string(),
                url: url.to_string(),
            },
        )
    }
}
