//! 存储协作者接口
//!
//! 会话、房源、经纪人、预约与租户目录都由外部系统持有，这里只定义接口，
//! 并提供一个进程内实现（测试与单机部署使用）。
//! 约定：同一回合内写入后立即读取必须可见（预约创建后轮询状态立即可查）。

pub mod memory;
pub mod models;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::llm::AiSettings;

pub use memory::{CatalogSeed, InMemoryStore};
pub use models::{
    AgentProfile, Appointment, Broker, CompanyId, ConversationRecord, MessageSender, NewAppointment,
    Property, PropertyFilter, SearchCursor, StoredMessage, TransactionType,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// 会话与消息存储
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_or_create_conversation(
        &self,
        instance_id: &str,
        phone: &str,
        contact_name: Option<&str>,
    ) -> Result<ConversationRecord, StoreError>;

    /// 按时间顺序返回（最新在最后）
    async fn history(&self, instance_id: &str, phone: &str) -> Result<Vec<StoredMessage>, StoreError>;

    async fn append_message(
        &self,
        instance_id: &str,
        phone: &str,
        message: StoredMessage,
    ) -> Result<(), StoreError>;

    async fn search_cursor(&self, instance_id: &str, phone: &str) -> Result<Option<SearchCursor>, StoreError>;

    async fn save_search_cursor(
        &self,
        instance_id: &str,
        phone: &str,
        cursor: SearchCursor,
    ) -> Result<(), StoreError>;
}

/// 房源存储
#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn search(&self, company_id: &str, filter: &PropertyFilter) -> Result<Vec<Property>, StoreError>;

    async fn get_by_code(&self, code: &str, company_id: &str) -> Result<Option<Property>, StoreError>;

    /// 设施 ID -> 名称（未知 ID 忽略）
    async fn amenity_names(&self, ids: &[String]) -> Result<Vec<String>, StoreError>;
}

/// 经纪人名册
#[async_trait]
pub trait BrokerStore: Send + Sync {
    async fn list_by_company(&self, company_id: &str) -> Result<Vec<Broker>, StoreError>;

    /// 该公司在指定日历日创建的最后一条预约
    async fn last_appointment_of_day(
        &self,
        company_id: &str,
        day: NaiveDate,
    ) -> Result<Option<Appointment>, StoreError>;
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn create(&self, appointment: NewAppointment) -> Result<Appointment, StoreError>;
}

/// 租户目录：实例 -> 公司、公司的智能体、全局 AI 配置
#[async_trait]
pub trait Directory: Send + Sync {
    async fn company_for_instance(&self, instance_id: &str) -> Result<Option<CompanyId>, StoreError>;

    /// 按配置顺序返回（委派时先匹配者优先）
    async fn agents_for_company(&self, company_id: &str) -> Result<Vec<AgentProfile>, StoreError>;

    async fn ai_settings(&self) -> Result<Option<AiSettings>, StoreError>;
}
