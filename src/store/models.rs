//! 存储层领域模型：会话、房源、经纪人、预约、智能体配置

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::fold;

/// 公司（租户）标识
pub type CompanyId = String;

/// 交易类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Aluguel,
    Venda,
}

impl TransactionType {
    /// 宽松解析（模型可能给出 "locação"、"compra"、"Venda" 等）
    pub fn parse(raw: &str) -> Option<Self> {
        let folded = fold(raw.trim());
        match folded.as_str() {
            "aluguel" | "alugar" | "locacao" | "locar" | "rent" | "rental" => Some(Self::Aluguel),
            "venda" | "vender" | "compra" | "comprar" | "sale" | "buy" => Some(Self::Venda),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aluguel => "aluguel",
            Self::Venda => "venda",
        }
    }

    /// 面向客户的展示名
    pub fn label(self) -> &'static str {
        match self {
            Self::Aluguel => "Aluguel",
            Self::Venda => "Venda",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会话记录（实例 + 电话）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub instance_id: String,
    pub phone: String,
    pub contact_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 持久化消息的发送方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    Customer,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub sender: MessageSender,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(sender: MessageSender, body: impl Into<String>) -> Self {
        Self {
            sender,
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

/// 每个会话最近一次搜索的游标（过滤条件 + 下一页偏移）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchCursor {
    pub city: Option<String>,
    pub transaction: Option<TransactionType>,
    pub property_type: Option<String>,
    pub next_offset: usize,
    pub total: usize,
}

/// 房源查询条件（存储层只做简单过滤，分页在上层切片）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    pub city: Option<String>,
    pub transaction: Option<TransactionType>,
    pub property_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub company_id: CompanyId,
    pub code: String,
    pub title: String,
    /// 规范类型名（apartamento / casa / terreno ...）
    pub property_type: String,
    pub transaction: TransactionType,
    pub street: Option<String>,
    pub number: Option<String>,
    pub neighborhood: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub price: Option<f64>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub parking_spaces: Option<u32>,
    pub area_m2: Option<f64>,
    pub description: Option<String>,
    #[serde(default)]
    pub amenity_ids: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default = "default_enabled")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broker {
    pub id: String,
    pub company_id: CompanyId,
    pub name: String,
    pub phone: String,
    pub active: bool,
}

/// 新建预约的字段
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub company_id: CompanyId,
    pub property_id: String,
    pub property_code: String,
    pub broker_id: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    /// 解析失败时为 None，原始文本保留在 requested_time / notes
    pub scheduled_at: Option<NaiveDateTime>,
    pub requested_time: String,
    pub notes: String,
    /// 创建时所在的本地日历日（轮询分配按此分组）
    pub created_on: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub company_id: CompanyId,
    pub property_id: String,
    pub property_code: String,
    pub broker_id: Option<String>,
    pub client_name: String,
    pub client_phone: String,
    pub scheduled_at: Option<NaiveDateTime>,
    pub requested_time: String,
    pub notes: String,
    pub created_on: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// 智能体配置：人设文本 + 委派触发关键词
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub name: String,
    pub persona: String,
    pub is_primary: bool,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
