//! WhatsApp 网关 Webhook 入口
//!
//! 网关推送的事件先进入聚合缓冲区；静默窗口结束后 [`TurnFlushHandler`]
//! 加载历史、运行回合、投递回复并持久化这一次往返。

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, info, warn};

use super::{deliver_response, MessagingGateway};
use crate::buffer::{dispatch, FlushHandler, InboundEvent, MessageBuffer};
use crate::memory::ConversationMemory;
use crate::turn::{TurnInput, TurnOrchestrator};

/// Webhook 服务状态
pub struct WhatsappState {
    pub buffer: Arc<MessageBuffer>,
    pub handler: Arc<dyn FlushHandler>,
    /// 设置后，请求头 `apikey` 必须与之相同
    pub webhook_token: Option<String>,
}

/// 创建 WhatsApp 路由
pub fn create_router(state: Arc<WhatsappState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// 只处理新消息事件；未标注事件类型的负载也按消息处理
fn is_message_event(event: &InboundEvent) -> bool {
    match event.event.as_deref() {
        None => true,
        Some(name) => name.to_ascii_lowercase().replace('_', ".") == "messages.upsert",
    }
}

/// POST /webhook - 接收网关事件，立即返回 200
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    headers: HeaderMap,
    Json(event): Json<InboundEvent>,
) -> StatusCode {
    if let Some(token) = state.webhook_token.as_deref().filter(|t| !t.is_empty()) {
        let provided = headers.get("apikey").and_then(|v| v.to_str().ok());
        if provided != Some(token) {
            warn!("webhook rejected: invalid apikey header");
            return StatusCode::UNAUTHORIZED;
        }
    }

    if !is_message_event(&event) {
        debug!(event = ?event.event, "ignoring non-message webhook event");
        return StatusCode::OK;
    }
    if event.from_me() {
        debug!("ignoring outbound echo");
        return StatusCode::OK;
    }

    // 文本在返回 200 之前入队，同一会话的消息保持网关投递顺序；
    // 绕过缓冲的事件会立即跑完整个回合，放到后台执行
    if let Err(event) = state.buffer.try_enqueue(event, Arc::clone(&state.handler)) {
        tokio::spawn(dispatch(Arc::clone(&state.handler), event));
    }

    StatusCode::OK
}

/// 刷新回调：历史 -> 回合 -> 投递 -> 持久化
pub struct TurnFlushHandler {
    orchestrator: Arc<TurnOrchestrator>,
    memory: Arc<ConversationMemory>,
    gateway: Arc<dyn MessagingGateway>,
}

impl TurnFlushHandler {
    pub fn new(
        orchestrator: Arc<TurnOrchestrator>,
        memory: Arc<ConversationMemory>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Self {
        Self {
            orchestrator,
            memory,
            gateway,
        }
    }
}

#[async_trait]
impl FlushHandler for TurnFlushHandler {
    async fn handle(&self, event: InboundEvent) -> anyhow::Result<()> {
        let (Some(instance), Some(phone)) = (event.instance_id(), event.phone()) else {
            debug!("event without instance or phone, nothing to do");
            return Ok(());
        };

        self.memory
            .ensure_conversation(&instance, &phone, event.push_name())
            .await?;
        let history = self.memory.load_history(&instance, &phone).await?;

        let Some(input) = TurnInput::from_event(&event, history) else {
            return Ok(());
        };
        if input.message.is_empty() && input.media.is_none() {
            debug!(instance = %instance, phone = %phone, "empty message, nothing to do");
            return Ok(());
        }
        let inbound = input.message.clone();

        let Some(response) = self.orchestrator.handle_turn(input).await else {
            info!(instance = %instance, phone = %phone, "no response for this turn");
            return Ok(());
        };

        deliver_response(self.gateway.as_ref(), &instance, &phone, &response).await?;
        self.memory
            .record_exchange(&instance, &phone, &inbound, &response.text)
            .await?;
        info!(
            instance = %instance,
            phone = %phone,
            properties = response.properties.len(),
            "turn delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    #[derive(Default)]
    struct Capture(Mutex<Vec<InboundEvent>>);

    #[async_trait]
    impl FlushHandler for Capture {
        async fn handle(&self, event: InboundEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn state(token: Option<&str>) -> (Arc<WhatsappState>, Arc<MessageBuffer>) {
        let buffer = Arc::new(MessageBuffer::new(Duration::from_secs(15)));
        let state = Arc::new(WhatsappState {
            buffer: Arc::clone(&buffer),
            handler: Arc::new(Capture::default()),
            webhook_token: token.map(str::to_string),
        });
        (state, buffer)
    }

    fn post_json(body: serde_json::Value, apikey: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(key) = apikey {
            builder = builder.header("apikey", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn upsert(from_me: bool) -> serde_json::Value {
        json!({
            "event": "messages.upsert",
            "instance": "imob-1",
            "data": {
                "key": { "remoteJid": "5541999990000@s.whatsapp.net", "fromMe": from_me, "id": "m1" },
                "messageType": "conversation",
                "message": { "conversation": "oi" }
            }
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state(None);
        let response = create_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_message_is_buffered() {
        let (state, buffer) = state(None);
        let response = create_router(state).oneshot(post_json(upsert(false), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(buffer.pending_keys().len(), 1);
        buffer.clear_all();
    }

    fn upsert_text(id: &str, text: &str) -> serde_json::Value {
        json!({
            "event": "messages.upsert",
            "instance": "imob-1",
            "data": {
                "key": { "remoteJid": "5541999990000@s.whatsapp.net", "fromMe": false, "id": id },
                "messageType": "conversation",
                "message": { "conversation": text }
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_posts_keep_arrival_order() {
        let capture = Arc::new(Capture::default());
        let buffer = Arc::new(MessageBuffer::new(Duration::from_secs(15)));
        let router = create_router(Arc::new(WhatsappState {
            buffer: Arc::clone(&buffer),
            handler: capture.clone(),
            webhook_token: None,
        }));

        for (id, text) in [("m1", "quero um apartamento"), ("m2", "em Curitiba"), ("m3", "pra alugar")] {
            let response = router.clone().oneshot(post_json(upsert_text(id, text), None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let key = crate::buffer::ConversationKey::new("imob-1", "5541999990000");
        assert_eq!(buffer.pending_count(&key), 3);

        tokio::time::sleep(Duration::from_secs(16)).await;
        let flushed = capture.0.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].text(), Some("quero um apartamento\nem Curitiba\npra alugar"));
    }

    #[tokio::test]
    async fn test_from_me_and_other_events_ignored() {
        let (state, buffer) = state(None);
        let router = create_router(state);
        let response = router.clone().oneshot(post_json(upsert(true), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let status = json!({ "event": "connection.update", "instance": "imob-1", "data": {} });
        let response = router.oneshot(post_json(status, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        tokio::task::yield_now().await;
        assert!(buffer.pending_keys().is_empty());
    }

    #[tokio::test]
    async fn test_webhook_token_checked() {
        let (state, buffer) = state(Some("segredo"));
        let router = create_router(state);
        let response = router.clone().oneshot(post_json(upsert(false), None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router.oneshot(post_json(upsert(false), Some("segredo"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        buffer.clear_all();
    }
}
