//! 系统提示构建
//!
//! 人设 + 当前日期上下文 + 客户姓名指令 + 工具使用规则 + 分类器上下文提示。
//! 补全服务只接受自然语言系统文本，所有上下文都写成句子。

use chrono::{Datelike, NaiveDateTime, Weekday};

use super::context::TurnContext;
use crate::store::AgentProfile;
use crate::tools::{SCHEDULE_TOOL_NAME, SEARCH_TOOL_NAME};

pub fn weekday_pt(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

/// 让「amanhã」「próxima quinta」之类的表达按真实日期解析
pub fn date_context(now: NaiveDateTime) -> String {
    format!(
        "Hoje é {}, {}. Use esta data como referência para interpretar expressões como \"amanhã\" \
         ou \"próxima quinta\". Ao agendar, envie data_hora sempre no formato DD/MM/AAAA HHh \
         (exemplo: 20/03/2026 14h).",
        weekday_pt(now.weekday()),
        now.format("%d/%m/%Y %H:%M")
    )
}

pub fn name_instruction(sender_name: Option<&str>, is_first_message: bool) -> Option<String> {
    let name = sender_name.map(str::trim).filter(|n| !n.is_empty())?;
    Some(if is_first_message {
        format!(
            "O nome do cliente é {name}. Esta é a primeira mensagem da conversa: cumprimente o cliente \
             pelo nome e apresente-se brevemente."
        )
    } else {
        format!(
            "O nome do cliente é {name}. Use o nome de forma natural quando fizer sentido, sem repetir \
             saudações e sem usar marcadores como [nome]."
        )
    })
}

fn tool_rules() -> String {
    format!(
        "Regras para ferramentas:\n\
         - Quando o cliente procurar imóveis, use SEMPRE a ferramenta {SEARCH_TOOL_NAME} em vez de fazer \
         perguntas; use os filtros já mencionados na conversa.\n\
         - Quando o cliente pedir para ver mais opções, chame {SEARCH_TOOL_NAME} novamente com os mesmos filtros.\n\
         - Os imóveis encontrados são enviados automaticamente com fotos; nunca descreva os imóveis no texto.\n\
         - Só chame {SCHEDULE_TOOL_NAME} depois de ter o nome do cliente, o código do imóvel e a data e hora \
         escolhidas. Se faltar alguma informação, pergunte antes.\n\
         - Nunca invente imóveis, preços, códigos ou horários."
    )
}

pub fn build_system_prompt(agent: &AgentProfile, ctx: &TurnContext, now: NaiveDateTime) -> String {
    let mut sections = vec![agent.persona.trim().to_string(), date_context(now)];
    if let Some(instruction) = name_instruction(ctx.sender_name.as_deref(), ctx.is_first_message) {
        sections.push(instruction);
    }
    sections.push(tool_rules());
    if let Some(hint) = ctx.classification.context_hint() {
        sections.push(hint);
    }
    sections.retain(|s| !s.is_empty());
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::intent::{IntentClassifier, Vocabulary};
    use crate::memory::Message;
    use crate::turn::TurnInput;

    fn agent() -> AgentProfile {
        AgentProfile {
            id: "a1".into(),
            name: "Sofia".into(),
            persona: "Você é Sofia, corretora virtual da Imobiliária Horizonte.".into(),
            is_primary: true,
            trigger_keywords: vec![],
            enabled: true,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 10)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap()
    }

    #[test]
    fn test_date_context_in_portuguese() {
        let text = date_context(now());
        assert!(text.contains("terça-feira, 10/03/2026 09:05"));
    }

    #[test]
    fn test_first_message_greets_by_name() {
        let classifier = IntentClassifier::new(Arc::new(Vocabulary::default()));
        let first = TurnContext::build(
            TurnInput::new("i1", "5541", "oi").with_sender_name(Some("Ana".into())),
            &classifier,
        );
        let prompt = build_system_prompt(&agent(), &first, now());
        assert!(prompt.starts_with("Você é Sofia"));
        assert!(prompt.contains("cumprimente o cliente pelo nome"));

        let later = TurnContext::build(
            TurnInput::new("i1", "5541", "e o preço?")
                .with_sender_name(Some("Ana".into()))
                .with_history(vec![Message::user("oi"), Message::assistant("Olá Ana!")]),
            &classifier,
        );
        let prompt = build_system_prompt(&agent(), &later, now());
        assert!(prompt.contains("sem usar marcadores"));
        assert!(!prompt.contains("cumprimente o cliente pelo nome"));
    }

    #[test]
    fn test_hint_appended_for_search() {
        let classifier = IntentClassifier::new(Arc::new(Vocabulary::default()));
        let ctx = TurnContext::build(TurnInput::new("i1", "5541", "quero casa em Curitiba"), &classifier);
        let prompt = build_system_prompt(&agent(), &ctx, now());
        assert!(prompt.contains("cidade: Curitiba"));
        assert!(name_instruction(None, true).is_none());
    }
}
