//! 端到端：Webhook 事件 -> 聚合缓冲区 -> 回合编排 -> 网关投递 -> 历史持久化
#![cfg(feature = "whatsapp")]

use std::sync::Arc;
use std::time::Duration;

use imob_agent::buffer::{InboundEvent, MessageBuffer};
use imob_agent::integrations::whatsapp::TurnFlushHandler;
use imob_agent::integrations::{RecordingGateway, SentMessage};
use imob_agent::intent::{IntentClassifier, Vocabulary};
use imob_agent::llm::{AiSettings, ScriptedCompletion, ToolChoice};
use imob_agent::memory::{ConversationMemory, Role};
use imob_agent::store::{AgentProfile, InMemoryStore, Property, TransactionType};
use imob_agent::tools::{ScheduleVisitTool, SearchPropertiesTool, ToolExecutor, ToolRegistry, SEARCH_TOOL_NAME};
use imob_agent::turn::TurnOrchestrator;
use serde_json::json;

const INSTANCE: &str = "imob-01";
const JID: &str = "5541999998888@s.whatsapp.net";
const PHONE: &str = "5541999998888";

fn apartment(i: usize, transaction: TransactionType) -> Property {
    Property {
        id: format!("p{i}"),
        company_id: "c1".into(),
        code: format!("A{}", 100 + i),
        title: format!("Apartamento {i} quartos"),
        property_type: "apartamento".into(),
        transaction,
        street: Some("Rua XV de Novembro".into()),
        number: Some(format!("{}", 10 * i)),
        neighborhood: Some("Centro".into()),
        city: "Curitiba".into(),
        state: Some("PR".into()),
        price: Some(1800.0 + i as f64 * 100.0),
        bedrooms: Some(2),
        bathrooms: Some(1),
        parking_spaces: Some(1),
        area_m2: Some(60.0),
        description: None,
        amenity_ids: vec![],
        images: vec![
            format!("https://cdn.example.com/{i}/1.jpg"),
            format!("https://cdn.example.com/{i}/2.jpg"),
        ],
        active: true,
    }
}

struct Harness {
    buffer: MessageBuffer,
    handler: Arc<TurnFlushHandler>,
    completion: Arc<ScriptedCompletion>,
    gateway: Arc<RecordingGateway>,
    memory: Arc<ConversationMemory>,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    store.link_instance(INSTANCE, "c1").await;
    store
        .add_agent(
            "c1",
            AgentProfile {
                id: "sofia".into(),
                name: "Sofia".into(),
                persona: "Você é Sofia, corretora virtual da Imobiliária Horizonte.".into(),
                is_primary: true,
                trigger_keywords: vec![],
                enabled: true,
            },
        )
        .await;
    store
        .set_ai_settings(Some(AiSettings {
            api_key: "sk-test".into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 600,
            followup_max_tokens: 150,
            temperature: 0.7,
        }))
        .await;
    for i in 1..=4 {
        store.add_property(apartment(i, TransactionType::Aluguel)).await;
    }
    store.add_property(apartment(9, TransactionType::Venda)).await;

    let gateway = Arc::new(RecordingGateway::new());
    let classifier = IntentClassifier::new(Arc::new(Vocabulary::default()));
    let mut registry = ToolRegistry::new();
    registry.register(SearchPropertiesTool::new(store.clone(), store.clone(), classifier.clone()));
    registry.register(ScheduleVisitTool::new(store.clone(), store.clone(), store.clone()));

    let completion = Arc::new(ScriptedCompletion::new());
    let orchestrator = Arc::new(TurnOrchestrator::new(
        completion.clone(),
        store.clone(),
        Arc::new(ToolExecutor::new(registry, 30)),
        classifier,
    ));
    let memory = Arc::new(ConversationMemory::new(store.clone(), 30));

    Harness {
        buffer: MessageBuffer::new(Duration::from_secs(15)),
        handler: Arc::new(TurnFlushHandler::new(orchestrator, memory.clone(), gateway.clone())),
        completion,
        gateway,
        memory,
    }
}

fn text(body: &str) -> InboundEvent {
    InboundEvent::text_message(INSTANCE, JID, body)
}

fn sent_texts(gateway: &RecordingGateway) -> Vec<String> {
    gateway
        .sent()
        .into_iter()
        .filter_map(|m| match m {
            SentMessage::Text { text, .. } => Some(text),
            SentMessage::Image { .. } => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_merged_and_search_is_delivered() {
    let h = harness().await;
    h.completion
        .push_tool_call(
            SEARCH_TOOL_NAME,
            json!({ "cidade": "Curitiba", "tipo_imovel": "apartamento", "tipo_transacao": "aluguel" }),
        )
        .push_text("Encontrei 4 apartamentos para alugar em Curitiba! Seguem os 3 primeiros.");

    assert!(h.buffer.submit(text("oi"), h.handler.clone()).await);
    tokio::time::advance(Duration::from_secs(5)).await;
    assert!(h
        .buffer
        .submit(text("quero um apartamento em Curitiba"), h.handler.clone())
        .await);
    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(h.buffer.submit(text("pra alugar"), h.handler.clone()).await);

    tokio::time::advance(Duration::from_secs(14)).await;
    assert_eq!(h.completion.call_count(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.buffer.pending_keys().is_empty());

    // 一次合并后的回合，两次补全（强制搜索 + 受限的后续）
    let requests = h.completion.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(
        requests[0].messages.last().map(|m| m.content.as_str()),
        Some("oi\nquero um apartamento em Curitiba\npra alugar")
    );
    assert_eq!(
        requests[0].tool_choice,
        ToolChoice::Required(SEARCH_TOOL_NAME.to_string())
    );
    assert_eq!(requests[1].tool_choice, ToolChoice::None);

    // 先文本，再三个房源（每个一段文字 + 两张图）
    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1 + 3 * 3);
    let texts = sent_texts(&h.gateway);
    assert!(texts[0].starts_with("Encontrei 4 apartamentos"));
    assert!(texts[1].contains("A101"));
    assert!(matches!(&sent[2], SentMessage::Image { url, .. } if url.ends_with("/1/1.jpg")));

    let history = h.memory.load_history(INSTANCE, PHONE).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
}

#[tokio::test(start_paused = true)]
async fn test_show_more_continues_from_cursor() {
    let h = harness().await;
    h.completion
        .push_tool_call(SEARCH_TOOL_NAME, json!({ "cidade": "Curitiba", "tipo_transacao": "aluguel" }))
        .push_text("Encontrei 4 opções para você, e tenho mais se quiser.")
        .push_tool_call(SEARCH_TOOL_NAME, json!({}))
        .push_text("Encontrei mais esta opção.");

    h.buffer
        .submit(text("quero alugar um apartamento em Curitiba"), h.handler.clone())
        .await;
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(h.completion.call_count(), 2);

    h.buffer.submit(text("tem mais?"), h.handler.clone()).await;
    tokio::time::sleep(Duration::from_secs(16)).await;

    let requests = h.completion.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(
        requests[2].tool_choice,
        ToolChoice::Required(SEARCH_TOOL_NAME.to_string())
    );

    let texts = sent_texts(&h.gateway);
    let last_card = texts.last().unwrap();
    assert!(last_card.contains("A104"));
    assert!(!texts.iter().any(|t| t.contains("A109")));

    let history = h.memory.load_history(INSTANCE, PHONE).await.unwrap();
    assert_eq!(history.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_instance_sends_nothing() {
    let h = harness().await;
    h.buffer
        .submit(InboundEvent::text_message("outra-instancia", JID, "oi"), h.handler.clone())
        .await;
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(h.completion.call_count(), 0);
    assert!(h.gateway.sent().is_empty());
    assert!(h
        .memory
        .load_history("outra-instancia", PHONE)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_voice_note_without_content_gets_a_reply() {
    let h = harness().await;
    h.completion
        .push_text("Recebi seu áudio, mas não consigo ouvi-lo. Pode me escrever o que procura?");

    let voice: InboundEvent = serde_json::from_value(json!({
        "event": "messages.upsert",
        "instance": INSTANCE,
        "data": {
            "key": { "remoteJid": JID, "fromMe": false, "id": "VOICE1" },
            "messageType": "audioMessage",
            "message": { "audioMessage": { "mimetype": "audio/ogg; codecs=opus" } }
        }
    }))
    .unwrap();
    assert!(!h.buffer.submit(voice, h.handler.clone()).await);

    let requests = h.completion.requests();
    assert_eq!(requests.len(), 1);
    let current = requests[0].messages.last().unwrap();
    assert!(current.content.starts_with("[áudio"));
    assert!(current.image.is_none());

    assert_eq!(sent_texts(&h.gateway).len(), 1);
    let history = h.memory.load_history(INSTANCE, PHONE).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].content.starts_with("[áudio"));
}
