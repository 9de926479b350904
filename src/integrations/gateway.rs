//! WhatsApp 网关 HTTP 客户端
//!
//! `POST {api_url}/message/sendText/{instance}` 与 `/message/sendMedia/{instance}`，
//! 认证使用 `apikey` 请求头。长文本按字符分段发送。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::MessagingGateway;

/// WhatsApp 单条消息长度上限以内的分段长度
const MAX_TEXT_CHARS: usize = 4000;

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    number: &'a str,
    text: String,
}

#[derive(Debug, Serialize)]
struct SendMediaRequest<'a> {
    number: &'a str,
    mediatype: &'static str,
    media: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<&'a str>,
}

pub struct HttpGateway {
    http: Client,
    api_url: String,
    api_key: String,
}

impl HttpGateway {
    pub fn new(api_url: &str, api_key: &str) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> anyhow::Result<()> {
        let url = format!("{}/{}", self.api_url, path);
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .json(body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("WhatsApp gateway error {status}: {text}");
        }
        Ok(())
    }
}

fn split_text(body: &str) -> Vec<String> {
    if body.chars().count() <= MAX_TEXT_CHARS {
        return vec![body.to_string()];
    }
    body.chars()
        .collect::<Vec<_>>()
        .chunks(MAX_TEXT_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}

#[async_trait]
impl MessagingGateway for HttpGateway {
    async fn send_text(&self, instance_id: &str, phone: &str, text: &str) -> anyhow::Result<()> {
        let path = format!("message/sendText/{instance_id}");
        for chunk in split_text(text) {
            self.post(
                &path,
                &SendTextRequest {
                    number: phone,
                    text: chunk,
                },
            )
            .await?;
        }
        Ok(())
    }

    async fn send_image(
        &self,
        instance_id: &str,
        phone: &str,
        url: &str,
        caption: Option<&str>,
    ) -> anyhow::Result<()> {
        self.post(
            &format!("message/sendMedia/{instance_id}"),
            &SendMediaRequest {
                number: phone,
                mediatype: "image",
                media: url,
                caption,
            },
        )
        .await
    }
}
