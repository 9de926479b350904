//! 看房预约工具 `agendar_visita`
//!
//! 执行前检查必填字段（房源编码、日期时间；姓名/电话可从上下文补齐），缺失时返回
//! `missing_fields` 结果供模型追问，不创建预约。经纪人按当天轮询分配，
//! 创建后尽力通知经纪人，通知失败不影响预约结果。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::broker::assign_broker;
use super::registry::{Tool, ToolContext, ToolOutcome};
use super::schema::parameters_schema;
use super::search::format_address;
use super::visit_time::{parse_visit_time, VisitTime};
use crate::integrations::MessagingGateway;
use crate::store::{AppointmentStore, Broker, BrokerStore, NewAppointment, Property, PropertyStore};

pub const SCHEDULE_TOOL_NAME: &str = "agendar_visita";

const CONTACT_LINK_PLACEHOLDER: &str = "(número sem formato válido para link)";

/// 预约参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ScheduleArgs {
    /// Nome completo do cliente
    #[serde(default)]
    pub nome_cliente: Option<String>,
    /// Telefone do cliente com DDD
    #[serde(default)]
    pub telefone_cliente: Option<String>,
    /// Código do imóvel, por exemplo A101
    #[serde(default)]
    pub codigo_imovel: Option<String>,
    /// Data e hora da visita no formato DD/MM/AAAA HHh, por exemplo 20/03/2026 14h
    #[serde(default)]
    pub data_hora: Option<String>,
    /// Observações adicionais do cliente
    #[serde(default)]
    pub observacoes: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// wa.me 链接：只接受巴西号码（10-11 位本地号码，可带 55 国家码）
pub fn contact_link(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let international = match digits.len() {
        12 | 13 if digits.starts_with("55") => digits,
        10 | 11 => format!("55{digits}"),
        _ => return None,
    };
    Some(format!("https://wa.me/{international}"))
}

fn broker_notification(
    broker: &Broker,
    property: &Property,
    client_name: &str,
    client_phone: &str,
    when: &VisitTime,
    notes: Option<&str>,
) -> String {
    let link = contact_link(client_phone).unwrap_or_else(|| CONTACT_LINK_PLACEHOLDER.to_string());
    let mut lines = vec![
        format!("📅 *Nova visita agendada*, {}", broker.name),
        String::new(),
        format!("👤 Cliente: {client_name}"),
        format!("📞 Telefone: {client_phone}"),
        format!("🏠 Imóvel: {} - {}", property.code, property.title),
        format!("📍 Endereço: {}", format_address(property)),
        format!("🕐 Data/hora: {when}"),
    ];
    if let Some(notes) = notes {
        lines.push(format!("📝 Observações: {notes}"));
    }
    lines.push(format!("💬 Contato: {link}"));
    lines.join("\n")
}

pub struct ScheduleVisitTool {
    properties: Arc<dyn PropertyStore>,
    brokers: Arc<dyn BrokerStore>,
    appointments: Arc<dyn AppointmentStore>,
    notifier: Option<Arc<dyn MessagingGateway>>,
    rng: Mutex<StdRng>,
}

impl ScheduleVisitTool {
    pub fn new(
        properties: Arc<dyn PropertyStore>,
        brokers: Arc<dyn BrokerStore>,
        appointments: Arc<dyn AppointmentStore>,
    ) -> Self {
        Self {
            properties,
            brokers,
            appointments,
            notifier: None,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn MessagingGateway>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    async fn pick_broker(&self, ctx: &ToolContext) -> Result<Option<Broker>, String> {
        let roster = self
            .brokers
            .list_by_company(&ctx.company_id)
            .await
            .map_err(|e| e.to_string())?;
        let last = self
            .brokers
            .last_appointment_of_day(&ctx.company_id, ctx.today())
            .await
            .map_err(|e| e.to_string())?;
        let last_broker = last.and_then(|a| a.broker_id);

        let mut rng = self.rng.lock().map_err(|_| "broker rng poisoned".to_string())?;
        Ok(assign_broker(&roster, last_broker.as_deref(), &mut *rng))
    }
}

#[async_trait]
impl Tool for ScheduleVisitTool {
    fn name(&self) -> &str {
        SCHEDULE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Agenda uma visita a um imóvel. Só chame depois de ter o nome do cliente, o código do imóvel \
         e a data e hora escolhidas."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ScheduleArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, String> {
        let args: ScheduleArgs = if args.is_null() {
            ScheduleArgs::default()
        } else {
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?
        };

        let client_name = non_blank(&args.nome_cliente).or_else(|| non_blank(&ctx.sender_name));
        let client_phone = non_blank(&args.telefone_cliente).unwrap_or_else(|| ctx.phone.clone());
        let code = non_blank(&args.codigo_imovel);
        let requested = non_blank(&args.data_hora);

        let mut missing = Vec::new();
        if client_name.is_none() {
            missing.push("nome_cliente");
        }
        if code.is_none() {
            missing.push("codigo_imovel");
        }
        if requested.is_none() {
            missing.push("data_hora");
        }
        let (Some(client_name), Some(code), Some(requested)) = (client_name, code, requested) else {
            info!(missing = ?missing, phone = %ctx.phone, "scheduling called with missing fields");
            return Ok(ToolOutcome::new(json!({
                "status": "missing_fields",
                "campos_faltando": missing,
            }))
            .with_instruction(format!(
                "O agendamento NÃO foi feito porque faltam informações: {}. \
                 Peça ao cliente, em uma frase curta, apenas o que falta.",
                missing.join(", ")
            )));
        };

        let Some(property) = self
            .properties
            .get_by_code(&code, &ctx.company_id)
            .await
            .map_err(|e| e.to_string())?
        else {
            return Ok(ToolOutcome::new(json!({
                "status": "property_not_found",
                "codigo": code,
            }))
            .with_instruction(format!(
                "O código {code} não corresponde a nenhum imóvel disponível. \
                 Peça ao cliente, em uma frase curta, para confirmar o código do imóvel."
            )));
        };

        let broker = self.pick_broker(ctx).await?;
        let when = parse_visit_time(&requested, ctx.today());
        let extra_notes = non_blank(&args.observacoes);
        let notes = match (&when, &extra_notes) {
            (VisitTime::Unparsed(raw), Some(extra)) => format!("{extra}\nData/hora informada: {raw}"),
            (VisitTime::Unparsed(raw), None) => format!("Data/hora informada: {raw}"),
            (VisitTime::Parsed(_), Some(extra)) => extra.clone(),
            (VisitTime::Parsed(_), None) => String::new(),
        };

        let appointment = self
            .appointments
            .create(NewAppointment {
                company_id: ctx.company_id.clone(),
                property_id: property.id.clone(),
                property_code: property.code.clone(),
                broker_id: broker.as_ref().map(|b| b.id.clone()),
                client_name: client_name.clone(),
                client_phone: client_phone.clone(),
                scheduled_at: when.timestamp(),
                requested_time: requested.clone(),
                notes,
                created_on: ctx.today(),
            })
            .await
            .map_err(|e| e.to_string())?;

        info!(
            appointment = %appointment.id,
            property = %property.code,
            broker = ?appointment.broker_id,
            parsed = when.is_parsed(),
            "visit scheduled"
        );

        if let (Some(broker), Some(notifier)) = (&broker, &self.notifier) {
            let text = broker_notification(
                broker,
                &property,
                &client_name,
                &client_phone,
                &when,
                extra_notes.as_deref(),
            );
            if let Err(e) = notifier.send_text(&ctx.instance_id, &broker.phone, &text).await {
                warn!(error = %e, broker = %broker.id, "broker notification failed");
            }
        }

        let instruction = if when.is_parsed() {
            "Confirme o agendamento ao cliente em no máximo duas frases curtas, citando a data, o horário \
             e o código do imóvel."
        } else {
            "A solicitação foi registrada, mas a data/hora não pôde ser confirmada. Diga ao cliente, em \
             no máximo duas frases, que o corretor entrará em contato para confirmar o horário."
        };

        Ok(ToolOutcome::new(json!({
            "status": "agendado",
            "protocolo": appointment.id,
            "imovel": property.code,
            "data_hora": when.to_string(),
            "data_confirmada": when.is_parsed(),
            "corretor": broker.as_ref().map(|b| b.name.clone()),
        }))
        .with_instruction(instruction))
    }
}
