//! 回合编排器
//!
//! 状态：Classify -> BuildRequest -> Complete(1) -> {Respond | ToolCall}
//! -> [ExecuteTool -> BuildFollowup -> Complete(2) -> Respond]
//!
//! 分类器判定为房源搜索时强制调用搜索工具；工具给出终止回复时跳过第二次补全。
//! 配置缺失返回 None（调用方不发送任何消息），其余错误统一转为固定致歉文案。

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};
use tracing::{debug, error, info, warn};

use super::context::{AgentRef, TurnContext, TurnInput, TurnResponse};
use super::delegation::select_agent;
use super::prompt::build_system_prompt;
use crate::core::AgentError;
use crate::intent::IntentClassifier;
use crate::llm::{Completion, CompletionRequest, CompletionService, LlmError, ToolChoice};
use crate::memory::Message;
use crate::store::Directory;
use crate::tools::{ToolContext, ToolExecutor, SEARCH_TOOL_NAME};

pub const APOLOGY_TEXT: &str =
    "Desculpe, tive um problema para processar sua mensagem. Pode tentar novamente em instantes?";

/// 第二次补全仍返回工具调用时使用的中性开场
const NEUTRAL_SEARCH_INTRO: &str = "Encontrei estas opções para você:";
const NEUTRAL_FOLLOWUP: &str = "Certo! Posso ajudar em mais alguma coisa?";

const DEFAULT_FOLLOWUP_INSTRUCTION: &str =
    "Responda ao cliente em no máximo duas frases curtas, com base no resultado da ferramenta.";

pub const DEFAULT_UTC_OFFSET_HOURS: i32 = -3;

pub struct TurnOrchestrator {
    completion: Arc<dyn CompletionService>,
    directory: Arc<dyn Directory>,
    tools: Arc<ToolExecutor>,
    classifier: IntentClassifier,
    utc_offset: FixedOffset,
}

fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours.saturating_mul(3600)).unwrap_or_else(|| Utc.fix())
}

impl TurnOrchestrator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        directory: Arc<dyn Directory>,
        tools: Arc<ToolExecutor>,
        classifier: IntentClassifier,
    ) -> Self {
        Self {
            completion,
            directory,
            tools,
            classifier,
            utc_offset: offset_from_hours(DEFAULT_UTC_OFFSET_HOURS),
        }
    }

    /// 日期上下文与预约日历日使用的时区
    pub fn with_utc_offset_hours(mut self, hours: i32) -> Self {
        self.utc_offset = offset_from_hours(hours);
        self
    }

    fn local_now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.utc_offset).naive_local()
    }

    /// 处理一个回合；None 表示「无法处理，不要投递」
    pub async fn handle_turn(&self, input: TurnInput) -> Option<TurnResponse> {
        let message_len = input.message.chars().count();
        let instance = input.instance_id.clone();
        let phone = input.phone.clone();

        match self.run_turn(input).await {
            Ok(response) => Some(response),
            Err(e) if e.is_config_absence() => {
                warn!(error = %e, instance = %instance, phone = %phone, "turn skipped");
                None
            }
            Err(e) => {
                error!(
                    error = %e,
                    message_len,
                    instance = %instance,
                    phone = %phone,
                    "turn failed"
                );
                Some(TurnResponse::text(APOLOGY_TEXT, None))
            }
        }
    }

    pub async fn run_turn(&self, input: TurnInput) -> Result<TurnResponse, AgentError> {
        let company_id = self
            .directory
            .company_for_instance(&input.instance_id)
            .await?
            .ok_or_else(|| AgentError::ConfigMissing(format!("instance {} has no company", input.instance_id)))?;

        let agents = self.directory.agents_for_company(&company_id).await?;
        let agent = select_agent(&agents, &input.message)
            .ok_or_else(|| AgentError::ConfigMissing(format!("company {company_id} has no enabled agent")))?;
        let agent_ref = AgentRef::from(agent);

        let settings = self
            .directory
            .ai_settings()
            .await?
            .filter(|s| !s.api_key.trim().is_empty())
            .ok_or_else(|| AgentError::ConfigMissing("global AI settings".to_string()))?;

        // Classify
        let now = self.local_now();
        let ctx = TurnContext::build(input, &self.classifier);
        let forced = ctx.forces_search();
        info!(
            instance = %ctx.instance_id,
            phone = %ctx.phone,
            agent = %agent.name,
            first_message = ctx.is_first_message,
            greeting = ctx.is_greeting,
            forced_search = forced,
            show_more = ctx.is_show_more,
            "turn started"
        );

        // BuildRequest
        let system = build_system_prompt(agent, &ctx, now);
        let mut messages = ctx.history.clone();
        messages.push(ctx.user_message());
        let tool_choice = if forced {
            ToolChoice::Required(SEARCH_TOOL_NAME.to_string())
        } else {
            ToolChoice::Auto
        };
        let specs = self.tools.specs();

        // Complete(1)
        let first = self
            .completion
            .complete(
                &settings,
                CompletionRequest {
                    system: system.clone(),
                    messages: messages.clone(),
                    tools: specs.clone(),
                    tool_choice,
                    max_tokens: settings.max_tokens,
                },
            )
            .await?;

        let mut calls = match first {
            Completion::Text(text) => {
                return Ok(TurnResponse::text(text.trim(), Some(agent_ref)));
            }
            Completion::ToolCalls(calls) => calls,
        };
        if calls.len() > 1 {
            let ignored: Vec<&str> = calls[1..].iter().map(|c| c.name.as_str()).collect();
            warn!(ignored = ?ignored, "multiple tool calls returned; only the first is executed");
        }
        if calls.is_empty() {
            return Err(LlmError::EmptyResponse.into());
        }
        let call = calls.swap_remove(0);

        // ExecuteTool
        let tool_ctx = ToolContext {
            company_id,
            instance_id: ctx.instance_id.clone(),
            phone: ctx.phone.clone(),
            sender_name: ctx.sender_name.clone(),
            message: ctx.message.clone(),
            history: ctx.history.clone(),
            is_show_more: ctx.is_show_more,
            now,
        };
        let outcome = self
            .tools
            .execute(&call.name, call.arguments.clone(), &tool_ctx)
            .await?;

        if let Some(reply) = outcome.terminal_reply {
            debug!(tool = %call.name, "terminal tool reply, skipping follow-up completion");
            return Ok(TurnResponse {
                text: reply,
                properties: outcome.properties,
                has_more: outcome.has_more,
                agent: Some(agent_ref),
            });
        }

        // BuildFollowup
        let instruction = outcome
            .followup_instruction
            .clone()
            .unwrap_or_else(|| DEFAULT_FOLLOWUP_INSTRUCTION.to_string());
        messages.push(Message::assistant_tool_call(call.clone()));
        messages.push(Message::tool_result(call.id.clone(), outcome.content.to_string()));
        messages.push(Message::system(instruction));

        // Complete(2)
        let second = self
            .completion
            .complete(
                &settings,
                CompletionRequest {
                    system,
                    messages,
                    tools: specs,
                    tool_choice: ToolChoice::None,
                    max_tokens: settings.followup_max_tokens,
                },
            )
            .await?;

        let text = match second {
            Completion::Text(text) => text.trim().to_string(),
            Completion::ToolCalls(_) => {
                warn!(tool = %call.name, "follow-up completion returned a tool call; using neutral reply");
                if outcome.properties.is_empty() {
                    NEUTRAL_FOLLOWUP.to_string()
                } else {
                    NEUTRAL_SEARCH_INTRO.to_string()
                }
            }
        };

        Ok(TurnResponse {
            text,
            properties: outcome.properties,
            has_more: outcome.has_more,
            agent: Some(agent_ref),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::intent::Vocabulary;
    use crate::llm::{AiSettings, ScriptedCompletion};
    use crate::memory::ToolInvocation;
    use crate::store::{AgentProfile, InMemoryStore, Property, TransactionType};
    use crate::tools::{SearchPropertiesTool, ToolRegistry, NO_RESULTS_REPLY};

    fn settings() -> AiSettings {
        AiSettings {
            api_key: "sk-test".into(),
            model: "gpt-4o-mini".into(),
            max_tokens: 600,
            followup_max_tokens: 150,
            temperature: 0.7,
        }
    }

    fn agent(id: &str, primary: bool, keywords: &[&str]) -> AgentProfile {
        AgentProfile {
            id: id.into(),
            name: format!("Agente {id}"),
            persona: format!("Você é o agente {id}."),
            is_primary: primary,
            trigger_keywords: keywords.iter().map(|k| k.to_string()).collect(),
            enabled: true,
        }
    }

    fn property(i: usize) -> Property {
        Property {
            id: format!("p{i}"),
            company_id: "c1".into(),
            code: format!("A{}", 100 + i),
            title: format!("Apartamento {i}"),
            property_type: "apartamento".into(),
            transaction: TransactionType::Aluguel,
            street: None,
            number: None,
            neighborhood: None,
            city: "Curitiba".into(),
            state: None,
            price: Some(2000.0),
            bedrooms: None,
            bathrooms: None,
            parking_spaces: None,
            area_m2: None,
            description: None,
            amenity_ids: vec![],
            images: vec![],
            active: true,
        }
    }

    async fn setup(properties: usize) -> (Arc<InMemoryStore>, Arc<ScriptedCompletion>, TurnOrchestrator) {
        let store = Arc::new(InMemoryStore::new());
        store.link_instance("i1", "c1").await;
        store.add_agent("c1", agent("vendas", true, &[])).await;
        store.add_agent("c1", agent("financiamento", false, &["financiamento"])).await;
        store.set_ai_settings(Some(settings())).await;
        for i in 0..properties {
            store.add_property(property(i)).await;
        }

        let classifier = IntentClassifier::new(Arc::new(Vocabulary::default()));
        let mut registry = ToolRegistry::new();
        registry.register(SearchPropertiesTool::new(store.clone(), store.clone(), classifier.clone()));
        let completion = Arc::new(ScriptedCompletion::new());
        let orchestrator = TurnOrchestrator::new(
            completion.clone(),
            store.clone(),
            Arc::new(ToolExecutor::new(registry, 5)),
            classifier,
        );
        (store, completion, orchestrator)
    }

    #[tokio::test]
    async fn test_missing_instance_mapping_returns_none() {
        let (_store, completion, orchestrator) = setup(0).await;
        let response = orchestrator
            .handle_turn(TurnInput::new("desconhecida", "5541", "oi"))
            .await;
        assert!(response.is_none());
        assert_eq!(completion.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_ai_settings_returns_none() {
        let (store, _completion, orchestrator) = setup(0).await;
        store.set_ai_settings(None).await;
        assert!(orchestrator.handle_turn(TurnInput::new("i1", "5541", "oi")).await.is_none());
    }

    #[tokio::test]
    async fn test_plain_text_reply_uses_auto_tool_choice() {
        let (_store, completion, orchestrator) = setup(0).await;
        completion.push_text("Olá! Como posso ajudar?");
        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "oi").with_sender_name(Some("Ana".into())))
            .await
            .unwrap();
        assert_eq!(response.text, "Olá! Como posso ajudar?");
        assert_eq!(response.agent.unwrap().id, "vendas");

        let requests = completion.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tool_choice, ToolChoice::Auto);
        assert!(requests[0].system.contains("Ana"));
    }

    #[tokio::test]
    async fn test_search_intent_forces_tool_and_constrains_followup() {
        let (_store, completion, orchestrator) = setup(7).await;
        completion
            .push_tool_call(SEARCH_TOOL_NAME, json!({ "cidade": "Curitiba", "tipo_imovel": "apartamento" }))
            .push_text("Encontrei 7 apartamentos em Curitiba, seguem os 3 primeiros!");

        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "quero um apartamento em Curitiba"))
            .await
            .unwrap();
        assert_eq!(response.properties.len(), 3);
        assert_eq!(response.has_more, Some(true));
        assert!(response.text.starts_with("Encontrei"));

        let requests = completion.requests();
        assert_eq!(
            requests[0].tool_choice,
            ToolChoice::Required(SEARCH_TOOL_NAME.to_string())
        );
        let followup = &requests[1];
        assert_eq!(followup.tool_choice, ToolChoice::None);
        assert_eq!(followup.max_tokens, 150);
        let tail: Vec<_> = followup.messages.iter().rev().take(3).map(|m| m.role).collect();
        assert_eq!(
            tail,
            vec![crate::memory::Role::System, crate::memory::Role::Tool, crate::memory::Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_terminal_reply_skips_second_completion() {
        let (_store, completion, orchestrator) = setup(0).await;
        completion.push_tool_call(SEARCH_TOOL_NAME, json!({ "cidade": "Curitiba" }));
        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "quero um apartamento em Curitiba"))
            .await
            .unwrap();
        assert_eq!(response.text, NO_RESULTS_REPLY);
        assert_eq!(completion.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failures_become_apology() {
        let (_store, completion, orchestrator) = setup(0).await;
        completion.push(Err(LlmError::Timeout));
        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "qual o horário de vocês?"))
            .await
            .unwrap();
        assert_eq!(response.text, APOLOGY_TEXT);

        completion.push_tool_call("enviar_email", json!({}));
        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "qual o horário de vocês?"))
            .await
            .unwrap();
        assert_eq!(response.text, APOLOGY_TEXT);
    }

    #[tokio::test]
    async fn test_followup_tool_call_uses_neutral_intro() {
        let (_store, completion, orchestrator) = setup(4).await;
        completion
            .push_tool_call(SEARCH_TOOL_NAME, json!({}))
            .push_tool_call(SEARCH_TOOL_NAME, json!({}));
        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "tem apartamento em Curitiba?"))
            .await
            .unwrap();
        assert_eq!(response.text, NEUTRAL_SEARCH_INTRO);
        assert_eq!(response.properties.len(), 3);
    }

    #[tokio::test]
    async fn test_only_first_of_several_tool_calls_runs() {
        let (_store, completion, orchestrator) = setup(4).await;
        let call = |id: &str, city: &str| ToolInvocation {
            id: id.into(),
            name: SEARCH_TOOL_NAME.into(),
            arguments: json!({ "cidade": city }),
        };
        completion
            .push(Ok(Completion::ToolCalls(vec![call("call_1", "Curitiba"), call("call_2", "Londrina")])))
            .push_text("Encontrei 4 apartamentos em Curitiba.");

        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "quero apartamento em Curitiba ou Londrina"))
            .await
            .unwrap();
        assert_eq!(response.properties.len(), 3);
        assert_eq!(completion.call_count(), 2);

        let followup = &completion.requests()[1];
        let tool_results: Vec<_> = followup
            .messages
            .iter()
            .filter(|m| m.role == crate::memory::Role::Tool)
            .collect();
        assert_eq!(tool_results.len(), 1);
        assert_eq!(tool_results[0].tool_call_id.as_deref(), Some("call_1"));

        let assistant = followup
            .messages
            .iter()
            .find(|m| !m.tool_calls.is_empty())
            .unwrap();
        assert_eq!(assistant.tool_calls.len(), 1);
        assert_eq!(assistant.tool_calls[0].id, "call_1");
    }

    #[tokio::test]
    async fn test_delegates_to_secondary_agent() {
        let (_store, completion, orchestrator) = setup(0).await;
        completion.push_text("Posso simular o financiamento para você.");
        let response = orchestrator
            .handle_turn(TurnInput::new("i1", "5541", "como funciona o financiamento?"))
            .await
            .unwrap();
        assert_eq!(response.agent.unwrap().id, "financiamento");
        assert!(completion.requests()[0].system.starts_with("Você é o agente financiamento."));
    }
}
