//! 意图分类器
//!
//! 纯函数：当前消息 + 历史 + 词表 -> 问候 / 房源搜索 / 「看更多」判定与搜索参数。
//! 无状态，无错误路径；未命中即为 None。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::text::{contains_word, fold, starts_with_word};
use super::vocabulary::Vocabulary;
use crate::memory::{Message, Role};
use crate::store::TransactionType;

const GREETINGS: &[&str] = &[
    "oi",
    "oii",
    "ola",
    "opa",
    "bom dia",
    "boa tarde",
    "boa noite",
    "e ai",
    "eai",
    "salve",
    "hello",
    "hi",
    "hey",
];

/// 请求动词：与物件或交易用语同时出现才算搜索请求
const REQUEST_VERBS: &[&str] = &[
    "quero",
    "queria",
    "procuro",
    "procurando",
    "busco",
    "buscando",
    "gostaria",
    "preciso",
    "tem",
    "teria",
    "existe",
    "mostra",
    "mostre",
    "mostrar",
    "interesse",
    "interessado",
    "interessada",
];

const SEARCH_OBJECTS: &[&str] = &["imovel", "imoveis", "opcoes", "opcao"];

const SCHEDULING_WORDS: &[&str] = &[
    "agendar",
    "agendamento",
    "visita",
    "visitar",
    "marcar",
    "horario",
];

const CONTINUATION_PHRASES: &[&str] = &[
    "mais",
    "ver mais",
    "mais opcoes",
    "proximo",
    "proximos",
    "proxima",
    "proximas",
    "outro",
    "outros",
    "outra",
    "outras",
    "seguintes",
    "continua",
    "continuar",
];

/// 之前的回复里出现过「找到」的字样
const FOUND_MARKER: &str = "encontr";

fn property_code_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z]\d{3,4}\b").expect("valid property code regex"))
}

/// 从文本中提取的搜索参数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub city: Option<String>,
    pub property_type: Option<String>,
    pub transaction: Option<TransactionType>,
}

impl SearchParams {
    pub fn is_empty(&self) -> bool {
        self.city.is_none() && self.property_type.is_none() && self.transaction.is_none()
    }
}

/// 一次分类的全部结论
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub is_greeting: bool,
    pub is_bare_greeting: bool,
    pub is_property_search: bool,
    pub is_show_more: bool,
    pub params: SearchParams,
}

impl Classification {
    /// 以自然语言给出的上下文提示（系统提示只接受文本）
    pub fn context_hint(&self) -> Option<String> {
        if !(self.is_property_search || self.is_show_more) || self.params.is_empty() {
            return None;
        }
        let mut parts = Vec::new();
        if let Some(kind) = &self.params.property_type {
            parts.push(format!("tipo de imóvel: {kind}"));
        }
        if let Some(city) = &self.params.city {
            parts.push(format!("cidade: {city}"));
        }
        if let Some(transaction) = self.params.transaction {
            parts.push(format!("transação: {}", transaction.as_str()));
        }
        let mut hint = format!(
            "O cliente já informou na conversa {}. Use esses filtros ao chamar buscar_imoveis.",
            parts.join(", ")
        );
        if self.is_show_more {
            hint.push_str(" O cliente pediu para ver mais opções da busca anterior.");
        }
        Some(hint)
    }
}

/// 意图分类器（持有词表）
#[derive(Clone)]
pub struct IntentClassifier {
    vocabulary: Arc<Vocabulary>,
}

impl IntentClassifier {
    pub fn new(vocabulary: Arc<Vocabulary>) -> Self {
        Self { vocabulary }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// 以问候语开头（后接词边界）
    pub fn is_greeting(&self, message: &str) -> bool {
        let folded = fold(message.trim());
        GREETINGS.iter().any(|g| starts_with_word(&folded, g))
    }

    /// 仅仅是问候：本身没有提到城市、房产类型或搜索用语
    pub fn is_bare_greeting(&self, message: &str) -> bool {
        self.is_greeting(message)
            && self.vocabulary.find_city(message).is_none()
            && self.vocabulary.find_property_type(message).is_none()
            && !self.is_search_request(message)
    }

    /// 单条消息本身就是搜索请求
    pub fn is_search_request(&self, message: &str) -> bool {
        let folded = fold(message);
        if has_any(&folded, SCHEDULING_WORDS) {
            return false;
        }
        let verb = has_any(&folded, REQUEST_VERBS);
        let object = has_any(&folded, SEARCH_OBJECTS) || self.vocabulary.mentions_property_word(&folded);
        let transaction = Vocabulary::mentions_transaction(&folded);
        (verb && (object || transaction)) || (transaction && object)
    }

    /// 是否应强制调用搜索工具
    ///
    /// 依次判断：空消息或纯问候不算；单条消息本身是搜索请求算；
    /// 历史 + 当前消息合起来同时出现房产类型与城市算。
    ///
    /// 例外：含预约用语（agendar、visita、horário 等）的消息即使在本条消息里
    /// 同时提到了房产类型和城市，也不强制搜索，交给模型选择预约工具。
    /// 这是有意收窄「类型 + 城市」规则的行为。
    pub fn is_property_search(&self, message: &str, history: &[Message]) -> bool {
        if message.trim().is_empty() || self.is_bare_greeting(message) {
            return false;
        }
        if self.is_search_request(message) {
            return true;
        }
        // 约定搜索之外的请求（预约）不由历史上下文触发
        if has_any(&fold(message), SCHEDULING_WORDS) {
            return false;
        }

        let history_text = dialogue_text(history);
        let combined = format!("{history_text}\n{message}");
        if self.vocabulary.find_property_type(&combined).is_some()
            && self.vocabulary.find_city(&combined).is_some()
        {
            return true;
        }

        let city_reply = self.vocabulary.is_city(message)
            && self.vocabulary.find_property_type(&history_text).is_some();
        let type_reply = self.vocabulary.find_property_type(message).is_some()
            && self.vocabulary.find_city(&history_text).is_some();
        city_reply || type_reply
    }

    /// 「看更多」：续看用语 + 历史中有过搜索结果
    pub fn is_show_more(&self, message: &str, history: &[Message]) -> bool {
        let folded = fold(message);
        if !has_any(&folded, CONTINUATION_PHRASES) {
            return false;
        }
        history
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| fold(&m.content))
            .any(|text| text.contains(FOUND_MARKER) || property_code_regex().is_match(&text))
    }

    /// 从任意文本提取参数（城市、类型、交易类型各至多一个）
    pub fn extract_params(&self, text: &str) -> SearchParams {
        SearchParams {
            city: self.vocabulary.find_city(text).map(str::to_string),
            property_type: self.vocabulary.find_property_type(text).map(str::to_string),
            transaction: self.vocabulary.find_transaction(text),
        }
    }

    /// 从完整对话（历史 + 当前消息）提取参数
    pub fn extract_from_conversation(&self, history: &[Message], message: &str) -> SearchParams {
        self.extract_params(&format!("{}\n{}", dialogue_text(history), message))
    }

    pub fn classify(&self, message: &str, history: &[Message]) -> Classification {
        let is_greeting = self.is_greeting(message);
        let is_bare_greeting = is_greeting && self.is_bare_greeting(message);
        let is_property_search = self.is_property_search(message, history);
        let is_show_more = !is_bare_greeting && self.is_show_more(message, history);
        let params = if is_bare_greeting {
            SearchParams::default()
        } else {
            self.extract_from_conversation(history, message)
        };
        Classification {
            is_greeting,
            is_bare_greeting,
            is_property_search,
            is_show_more,
            params,
        }
    }
}

fn has_any(folded: &str, words: &[&str]) -> bool {
    words.iter().any(|w| contains_word(folded, w))
}

/// 历史中客户与智能体说过的话
fn dialogue_text(history: &[Message]) -> String {
    history
        .iter()
        .filter(|m| m.is_dialogue())
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::new(Arc::new(Vocabulary::default()))
    }

    #[test]
    fn test_greeting_detection() {
        let c = classifier();
        assert!(c.is_greeting("Oi"));
        assert!(c.is_greeting("olá, tudo bem?"));
        assert!(c.is_greeting("Bom dia"));
        assert!(!c.is_greeting("oitenta mil reais"));
        assert!(!c.is_greeting("quero uma casa"));
    }

    #[test]
    fn test_bare_greeting_ignores_history_context() {
        let c = classifier();
        let history = vec![
            Message::user("procuro uma casa"),
            Message::assistant("Em qual cidade?"),
            Message::user("Curitiba"),
        ];
        assert!(!c.is_property_search("bom dia", &history));
        let classification = c.classify("bom dia", &history);
        assert!(classification.is_bare_greeting);
        assert!(classification.params.is_empty());
        assert!(classification.context_hint().is_none());
    }

    #[test]
    fn test_merged_greeting_with_request_is_search() {
        let c = classifier();
        let merged = "oi\nquero um apartamento em Curitiba\npra alugar";
        let classification = c.classify(merged, &[]);
        assert!(classification.is_greeting);
        assert!(!classification.is_bare_greeting);
        assert!(classification.is_property_search);
        assert_eq!(
            classification.params,
            SearchParams {
                city: Some("Curitiba".into()),
                property_type: Some("apartamento".into()),
                transaction: Some(TransactionType::Aluguel),
            }
        );
        let hint = classification.context_hint().unwrap();
        assert!(hint.contains("Curitiba"));
        assert!(hint.contains("apartamento"));
    }

    #[test]
    fn test_search_split_across_history() {
        let c = classifier();
        let history = vec![Message::user("tem casa?"), Message::assistant("Em qual cidade?")];
        assert!(c.is_property_search("Maringá", &history));

        let history = vec![Message::user("moro em Londrina")];
        assert!(c.is_property_search("apto", &history));

        assert!(!c.is_property_search("obrigado", &[]));
    }

    #[test]
    fn test_scheduling_message_not_forced_to_search() {
        let c = classifier();
        let history = vec![
            Message::user("quero um apartamento em Curitiba"),
            Message::assistant("Encontrei 3 imóveis: A101, A102, A103"),
        ];
        assert!(!c.is_property_search("quero agendar uma visita no A101", &history));
        // 本条消息自带类型与城市也一样
        assert!(!c.is_property_search("posso visitar o apartamento em Curitiba amanhã?", &[]));
        assert!(!c.is_property_search("queria marcar um horário pra ver a casa em Londrina", &[]));
    }

    #[test]
    fn test_show_more_requires_prior_results() {
        let c = classifier();
        assert!(!c.is_show_more("quero ver mais", &[]));

        let history = vec![Message::assistant("Encontrei 7 imóveis para você!")];
        assert!(c.is_show_more("quero ver mais", &history));
        assert!(c.is_show_more("próximos", &history));

        let history = vec![Message::assistant("O imóvel C202 fica no centro")];
        assert!(c.is_show_more("tem outros?", &history));
        assert!(!c.is_show_more("qual o valor?", &history));
    }

    #[test]
    fn test_extract_prefers_longest_alias() {
        let c = classifier();
        let params = c.extract_params("um apartamento ou ap em São José dos Pinhais");
        assert_eq!(params.property_type.as_deref(), Some("apartamento"));
        assert_eq!(params.city.as_deref(), Some("São José dos Pinhais"));
    }
}
