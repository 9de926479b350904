//! 封闭词表：城市、房产类型别名、交易类型用语
//!
//! 城市与别名都按折叠后长度降序排列，先匹配长的，避免 "ap" 之类的短别名抢先命中。

use std::collections::HashMap;

use super::text::{find_word, fold, strip_punctuation, word_positions};
use crate::store::TransactionType;

/// 默认城市列表
pub const DEFAULT_CITIES: &[&str] = &[
    "Curitiba",
    "São José dos Pinhais",
    "Pinhais",
    "Colombo",
    "Araucária",
    "Campo Largo",
    "Fazenda Rio Grande",
    "Almirante Tamandaré",
    "Ponta Grossa",
    "Londrina",
    "Maringá",
    "Cascavel",
    "Foz do Iguaçu",
    "Joinville",
    "Florianópolis",
    "Balneário Camboriú",
    "São Paulo",
    "Rio de Janeiro",
    "Belo Horizonte",
    "Porto Alegre",
];

/// 默认别名表：(别名, 规范类型)
pub const DEFAULT_PROPERTY_TYPES: &[(&str, &str)] = &[
    ("apartamento", "apartamento"),
    ("apartamentos", "apartamento"),
    ("apto", "apartamento"),
    ("ap", "apartamento"),
    ("apê", "apartamento"),
    ("casa", "casa"),
    ("casas", "casa"),
    ("sobrado", "casa"),
    ("terreno", "terreno"),
    ("terrenos", "terreno"),
    ("lote", "terreno"),
    ("kitnet", "kitnet"),
    ("kitinete", "kitnet"),
    ("quitinete", "kitnet"),
    ("studio", "kitnet"),
    ("cobertura", "cobertura"),
    ("sala comercial", "sala comercial"),
    ("sala", "sala comercial"),
    ("loja", "loja"),
    ("chácara", "chácara"),
    ("sítio", "chácara"),
];

const RENT_TERMS: &[&str] = &["alugar", "aluguel", "locacao", "locar", "alugo"];
const SALE_TERMS: &[&str] = &["comprar", "compra", "venda", "vender", "a venda"];

struct Term {
    folded: String,
    value: String,
}

fn longest_first(mut terms: Vec<Term>) -> Vec<Term> {
    terms.sort_by(|a, b| {
        b.folded
            .chars()
            .count()
            .cmp(&a.folded.chars().count())
            .then_with(|| a.folded.cmp(&b.folded))
    });
    terms.dedup_by(|a, b| a.folded == b.folded);
    terms
}

/// 城市与房产类型的封闭词表
pub struct Vocabulary {
    cities: Vec<Term>,
    aliases: Vec<Term>,
}

impl Vocabulary {
    pub fn new<C, A>(cities: C, aliases: A) -> Self
    where
        C: IntoIterator<Item = String>,
        A: IntoIterator<Item = (String, String)>,
    {
        let cities = cities
            .into_iter()
            .map(|city| Term {
                folded: fold(city.trim()),
                value: city.trim().to_string(),
            })
            .collect();
        let aliases = aliases
            .into_iter()
            .map(|(alias, canonical)| Term {
                folded: fold(alias.trim()),
                value: canonical.trim().to_string(),
            })
            .collect();
        Self {
            cities: longest_first(cities),
            aliases: longest_first(aliases),
        }
    }

    /// 从配置目录构建；空列表回退到默认词表
    pub fn from_catalog(cities: &[String], property_types: &HashMap<String, String>) -> Self {
        let default = Self::default();
        let cities = if cities.is_empty() {
            default.cities
        } else {
            longest_first(
                cities
                    .iter()
                    .map(|c| Term {
                        folded: fold(c.trim()),
                        value: c.trim().to_string(),
                    })
                    .collect(),
            )
        };
        let aliases = if property_types.is_empty() {
            default.aliases
        } else {
            let mut terms: Vec<Term> = property_types
                .iter()
                .map(|(alias, canonical)| Term {
                    folded: fold(alias.trim()),
                    value: canonical.trim().to_string(),
                })
                .collect();
            // 规范名自身也是别名
            let canonicals: Vec<Term> = property_types
                .values()
                .map(|c| Term {
                    folded: fold(c.trim()),
                    value: c.trim().to_string(),
                })
                .collect();
            terms.extend(canonicals);
            longest_first(terms)
        };
        Self { cities, aliases }
    }

    /// 文本中第一个命中的城市（按列表顺序，长名优先），返回配置中的展示名
    pub fn find_city(&self, text: &str) -> Option<&str> {
        let folded = fold(text);
        self.cities
            .iter()
            .find(|t| find_word(&folded, &t.folded).is_some())
            .map(|t| t.value.as_str())
    }

    /// 文本中第一个命中的房产类型，返回规范类型名
    pub fn find_property_type(&self, text: &str) -> Option<&str> {
        let folded = fold(text);
        self.aliases
            .iter()
            .find(|t| find_word(&folded, &t.folded).is_some())
            .map(|t| t.value.as_str())
    }

    /// 单个词（模型给出的参数）映射为规范类型
    pub fn canonical_type(&self, raw: &str) -> Option<&str> {
        let folded = fold(strip_punctuation(raw));
        self.aliases
            .iter()
            .find(|t| t.folded == folded)
            .map(|t| t.value.as_str())
    }

    /// 整条消息就是一个城市名（多轮对话中常见的单词回复）
    pub fn is_city(&self, text: &str) -> bool {
        self.city_named(text).is_some()
    }

    /// 城市名的规范写法
    pub fn city_named(&self, text: &str) -> Option<&str> {
        let folded = fold(strip_punctuation(text));
        self.cities
            .iter()
            .find(|t| t.folded == folded)
            .map(|t| t.value.as_str())
    }

    pub fn mentions_property_word(&self, folded: &str) -> bool {
        self.aliases.iter().any(|t| find_word(folded, &t.folded).is_some())
    }

    /// 交易类型：取文本中最后出现的用语（后来的说法覆盖先前的）
    pub fn find_transaction(&self, text: &str) -> Option<TransactionType> {
        let folded = fold(text);
        let last = |terms: &[&str]| {
            terms
                .iter()
                .filter_map(|term| word_positions(&folded, term).last())
                .max()
        };
        match (last(RENT_TERMS), last(SALE_TERMS)) {
            (Some(r), Some(s)) if s > r => Some(TransactionType::Venda),
            (Some(_), _) => Some(TransactionType::Aluguel),
            (None, Some(_)) => Some(TransactionType::Venda),
            (None, None) => None,
        }
    }

    /// 折叠文本中是否出现任何交易用语
    pub fn mentions_transaction(folded: &str) -> bool {
        RENT_TERMS
            .iter()
            .chain(SALE_TERMS.iter())
            .any(|term| find_word(folded, term).is_some())
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(
            DEFAULT_CITIES.iter().map(|c| c.to_string()),
            DEFAULT_PROPERTY_TYPES
                .iter()
                .map(|(a, c)| (a.to_string(), c.to_string())),
        )
    }
}
