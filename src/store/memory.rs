//! 进程内存储实现
//!
//! 所有集合放在 tokio RwLock 后面；写入后同一回合内立即可读。

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::models::{
    AgentProfile, Appointment, Broker, CompanyId, ConversationRecord, NewAppointment, Property,
    PropertyFilter, SearchCursor, StoredMessage,
};
use super::{AppointmentStore, BrokerStore, ConversationStore, Directory, PropertyStore, StoreError};
use crate::intent::fold;
use crate::llm::AiSettings;

struct ConversationState {
    record: ConversationRecord,
    messages: Vec<StoredMessage>,
    cursor: Option<SearchCursor>,
}

type ConversationId = (String, String);

/// 启动时载入的种子数据（JSON）
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CatalogSeed {
    /// 网关实例 -> 公司
    pub instances: HashMap<String, CompanyId>,
    /// 公司 -> 智能体列表
    pub agents: HashMap<CompanyId, Vec<AgentProfile>>,
    /// 设施 id -> 名称
    pub amenities: HashMap<String, String>,
    pub properties: Vec<Property>,
    pub brokers: Vec<Broker>,
}

/// 进程内存储：同时实现全部存储接口
#[derive(Default)]
pub struct InMemoryStore {
    conversations: RwLock<HashMap<ConversationId, ConversationState>>,
    properties: RwLock<Vec<Property>>,
    amenities: RwLock<HashMap<String, String>>,
    brokers: RwLock<Vec<Broker>>,
    appointments: RwLock<Vec<Appointment>>,
    instances: RwLock<HashMap<String, CompanyId>>,
    agents: RwLock<HashMap<CompanyId, Vec<AgentProfile>>>,
    ai_settings: RwLock<Option<AiSettings>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_property(&self, property: Property) {
        self.properties.write().await.push(property);
    }

    pub async fn add_amenity(&self, id: impl Into<String>, name: impl Into<String>) {
        self.amenities.write().await.insert(id.into(), name.into());
    }

    pub async fn add_broker(&self, broker: Broker) {
        self.brokers.write().await.push(broker);
    }

    pub async fn link_instance(&self, instance_id: impl Into<String>, company_id: impl Into<String>) {
        self.instances
            .write()
            .await
            .insert(instance_id.into(), company_id.into());
    }

    pub async fn add_agent(&self, company_id: impl Into<String>, agent: AgentProfile) {
        self.agents
            .write()
            .await
            .entry(company_id.into())
            .or_default()
            .push(agent);
    }

    pub async fn set_ai_settings(&self, settings: Option<AiSettings>) {
        *self.ai_settings.write().await = settings;
    }

    /// 载入种子数据（追加到现有集合）
    pub async fn load_seed(&self, seed: CatalogSeed) {
        self.instances.write().await.extend(seed.instances);
        {
            let mut agents = self.agents.write().await;
            for (company, profiles) in seed.agents {
                agents.entry(company).or_default().extend(profiles);
            }
        }
        self.amenities.write().await.extend(seed.amenities);
        self.properties.write().await.extend(seed.properties);
        self.brokers.write().await.extend(seed.brokers);
    }

    /// 已创建的预约（按创建顺序）
    pub async fn appointments(&self) -> Vec<Appointment> {
        self.appointments.read().await.clone()
    }
}

fn conversation_id(instance_id: &str, phone: &str) -> ConversationId {
    (instance_id.to_string(), phone.to_string())
}

fn matches_filter(property: &Property, company_id: &str, filter: &PropertyFilter) -> bool {
    if !property.active || property.company_id != company_id {
        return false;
    }
    if let Some(city) = &filter.city {
        if fold(&property.city) != fold(city) {
            return false;
        }
    }
    if let Some(kind) = &filter.property_type {
        if fold(&property.property_type) != fold(kind) {
            return false;
        }
    }
    if let Some(transaction) = filter.transaction {
        if property.transaction != transaction {
            return false;
        }
    }
    true
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn get_or_create_conversation(
        &self,
        instance_id: &str,
        phone: &str,
        contact_name: Option<&str>,
    ) -> Result<ConversationRecord, StoreError> {
        let mut conversations = self.conversations.write().await;
        let state = conversations
            .entry(conversation_id(instance_id, phone))
            .or_insert_with(|| ConversationState {
                record: ConversationRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    instance_id: instance_id.to_string(),
                    phone: phone.to_string(),
                    contact_name: None,
                    created_at: Utc::now(),
                },
                messages: Vec::new(),
                cursor: None,
            });
        if let Some(name) = contact_name {
            state.record.contact_name = Some(name.to_string());
        }
        Ok(state.record.clone())
    }

    async fn history(&self, instance_id: &str, phone: &str) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(&conversation_id(instance_id, phone))
            .map(|s| s.messages.clone())
            .unwrap_or_default())
    }

    async fn append_message(
        &self,
        instance_id: &str,
        phone: &str,
        message: StoredMessage,
    ) -> Result<(), StoreError> {
        let mut conversations = self.conversations.write().await;
        let state = conversations
            .get_mut(&conversation_id(instance_id, phone))
            .ok_or_else(|| StoreError::NotFound(format!("conversation {instance_id}:{phone}")))?;
        state.messages.push(message);
        Ok(())
    }

    async fn search_cursor(&self, instance_id: &str, phone: &str) -> Result<Option<SearchCursor>, StoreError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(&conversation_id(instance_id, phone))
            .and_then(|s| s.cursor.clone()))
    }

    async fn save_search_cursor(
        &self,
        instance_id: &str,
        phone: &str,
        cursor: SearchCursor,
    ) -> Result<(), StoreError> {
        self.get_or_create_conversation(instance_id, phone, None).await?;
        let mut conversations = self.conversations.write().await;
        if let Some(state) = conversations.get_mut(&conversation_id(instance_id, phone)) {
            state.cursor = Some(cursor);
        }
        Ok(())
    }
}

#[async_trait]
impl PropertyStore for InMemoryStore {
    async fn search(&self, company_id: &str, filter: &PropertyFilter) -> Result<Vec<Property>, StoreError> {
        Ok(self
            .properties
            .read()
            .await
            .iter()
            .filter(|p| matches_filter(p, company_id, filter))
            .cloned()
            .collect())
    }

    async fn get_by_code(&self, code: &str, company_id: &str) -> Result<Option<Property>, StoreError> {
        let code = code.trim();
        Ok(self
            .properties
            .read()
            .await
            .iter()
            .find(|p| p.company_id == company_id && p.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn amenity_names(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        let amenities = self.amenities.read().await;
        Ok(ids.iter().filter_map(|id| amenities.get(id).cloned()).collect())
    }
}

#[async_trait]
impl BrokerStore for InMemoryStore {
    async fn list_by_company(&self, company_id: &str) -> Result<Vec<Broker>, StoreError> {
        Ok(self
            .brokers
            .read()
            .await
            .iter()
            .filter(|b| b.company_id == company_id && b.active)
            .cloned()
            .collect())
    }

    async fn last_appointment_of_day(
        &self,
        company_id: &str,
        day: NaiveDate,
    ) -> Result<Option<Appointment>, StoreError> {
        Ok(self
            .appointments
            .read()
            .await
            .iter()
            .rev()
            .find(|a| a.company_id == company_id && a.created_on == day)
            .cloned())
    }
}

#[async_trait]
impl AppointmentStore for InMemoryStore {
    async fn create(&self, appointment: NewAppointment) -> Result<Appointment, StoreError> {
        let created = Appointment {
            id: uuid::Uuid::new_v4().to_string(),
            company_id: appointment.company_id,
            property_id: appointment.property_id,
            property_code: appointment.property_code,
            broker_id: appointment.broker_id,
            client_name: appointment.client_name,
            client_phone: appointment.client_phone,
            scheduled_at: appointment.scheduled_at,
            requested_time: appointment.requested_time,
            notes: appointment.notes,
            created_on: appointment.created_on,
            created_at: Utc::now(),
        };
        self.appointments.write().await.push(created.clone());
        Ok(created)
    }
}

#[async_trait]
impl Directory for InMemoryStore {
    async fn company_for_instance(&self, instance_id: &str) -> Result<Option<CompanyId>, StoreError> {
        Ok(self.instances.read().await.get(instance_id).cloned())
    }

    async fn agents_for_company(&self, company_id: &str) -> Result<Vec<AgentProfile>, StoreError> {
        Ok(self
            .agents
            .read()
            .await
            .get(company_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ai_settings(&self) -> Result<Option<AiSettings>, StoreError> {
        Ok(self.ai_settings.read().await.clone())
    }
}
