//! 房源搜索工具 `buscar_imoveis`
//!
//! 模型遗漏的参数从完整对话中重新提取；类型别名折叠为规范名后查询存储，
//! 分页是在过滤结果上切片。每个会话保存一个搜索游标（过滤条件 + 下一页偏移），
//! 「看更多」从游标继续；没有游标时退回按历史中「Encontrei」开头的回复数推算偏移。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::registry::{Tool, ToolContext, ToolOutcome};
use super::schema::parameters_schema;
use crate::intent::{fold, IntentClassifier, SearchParams};
use crate::memory::Role;
use crate::store::{ConversationStore, Property, PropertyFilter, PropertyStore, SearchCursor, TransactionType};

pub const SEARCH_TOOL_NAME: &str = "buscar_imoveis";
pub const DEFAULT_PAGE_SIZE: usize = 3;
pub const DEFAULT_MAX_IMAGES: usize = 5;

pub const NO_RESULTS_REPLY: &str = "No momento não há imóveis disponíveis com esses critérios. \
Quer que eu procure em outra cidade ou com outro tipo de imóvel?";
pub const EXHAUSTED_REPLY: &str = "Esses eram todos os imóveis disponíveis com esses critérios. \
Quer que eu faça uma nova busca com outros filtros?";

/// 历史回复中的结果公告标记（折叠后）
const ANNOUNCEMENT_MARKER: &str = "encontrei";

/// 搜索参数（模型给出，均可省略）
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// Cidade onde o cliente procura o imóvel
    #[serde(default)]
    pub cidade: Option<String>,
    /// Tipo de transação: "aluguel" ou "venda"
    #[serde(default)]
    pub tipo_transacao: Option<String>,
    /// Tipo de imóvel, por exemplo apartamento, casa, terreno
    #[serde(default)]
    pub tipo_imovel: Option<String>,
    /// Quantidade máxima de imóveis a retornar (no máximo 3)
    #[serde(default)]
    pub limite: Option<usize>,
    /// Quantos resultados pular (paginação)
    #[serde(default)]
    pub offset: Option<usize>,
}

/// 结构化房源结果（由投递层逐条发送：文本块 + 图片）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCard {
    pub code: String,
    pub title: String,
    pub address: String,
    /// 渲染好的描述块
    pub description: String,
    pub images: Vec<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// R$ 1.234.567,89
pub fn format_brl(value: f64) -> String {
    let cents = (value * 100.0).round() as i64;
    let (sign, cents) = if cents < 0 { ("-", -cents) } else { ("", cents) };
    let integer = (cents / 100).to_string();
    let mut grouped = String::new();
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (integer.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{sign}R$ {grouped},{:02}", cents % 100)
}

pub fn format_address(property: &Property) -> String {
    let street = match (&property.street, &property.number) {
        (Some(street), Some(number)) => Some(format!("{street}, {number}")),
        (Some(street), None) => Some(street.clone()),
        _ => None,
    };
    let city = match &property.state {
        Some(state) => format!("{}/{}", property.city, state),
        None => property.city.clone(),
    };
    street
        .into_iter()
        .chain(property.neighborhood.clone())
        .chain(std::iter::once(city))
        .collect::<Vec<_>>()
        .join(" - ")
}

fn render_card(property: &Property, amenities: &[String], max_images: usize) -> PropertyCard {
    let address = format_address(property);
    let mut lines = vec![format!("🏠 *{}*", property.title), format!("📍 {address}")];

    if let Some(price) = property.price {
        let suffix = match property.transaction {
            TransactionType::Aluguel => "/mês",
            TransactionType::Venda => "",
        };
        lines.push(format!(
            "💰 {}{suffix} ({})",
            format_brl(price),
            property.transaction.label()
        ));
    }

    let mut features = Vec::new();
    if let Some(n) = property.bedrooms {
        features.push(format!("🛏️ {n} quarto{}", if n == 1 { "" } else { "s" }));
    }
    if let Some(n) = property.bathrooms {
        features.push(format!("🚿 {n} banheiro{}", if n == 1 { "" } else { "s" }));
    }
    if let Some(n) = property.parking_spaces {
        features.push(format!("🚗 {n} vaga{}", if n == 1 { "" } else { "s" }));
    }
    if let Some(area) = property.area_m2 {
        features.push(format!("📐 {area:.0} m²"));
    }
    if !features.is_empty() {
        lines.push(features.join(" | "));
    }
    if !amenities.is_empty() {
        lines.push(format!("✨ {}", amenities.join(", ")));
    }
    if let Some(description) = property.description.as_deref().filter(|d| !d.trim().is_empty()) {
        lines.push(String::new());
        lines.push(description.trim().to_string());
    }
    lines.push(format!("Código: {}", property.code));

    PropertyCard {
        code: property.code.clone(),
        title: property.title.clone(),
        address,
        description: lines.join("\n"),
        images: property.images.iter().take(max_images).cloned().collect(),
    }
}

/// 明确给出的每个条件都与游标一致（未给出的不比较）
fn continues_cursor(explicit: &PropertyFilter, cursor: &SearchCursor) -> bool {
    let same_text = |given: &Option<String>, saved: &Option<String>| match (given, saved) {
        (None, _) => true,
        (Some(g), Some(s)) => fold(g) == fold(s),
        (Some(_), None) => false,
    };
    same_text(&explicit.city, &cursor.city)
        && same_text(&explicit.property_type, &cursor.property_type)
        && explicit
            .transaction
            .map_or(true, |t| cursor.transaction == Some(t))
}

/// 历史推算偏移：每条以「Encontrei」宣布过结果的回复算一页
pub fn history_offset(history: &[crate::memory::Message], page_size: usize) -> usize {
    let announcements = history
        .iter()
        .filter(|m| m.role == Role::Assistant && fold(&m.content).contains(ANNOUNCEMENT_MARKER))
        .count();
    announcements * page_size
}

pub struct SearchPropertiesTool {
    properties: Arc<dyn PropertyStore>,
    conversations: Arc<dyn ConversationStore>,
    classifier: IntentClassifier,
    page_size: usize,
    max_images: usize,
}

impl SearchPropertiesTool {
    pub fn new(
        properties: Arc<dyn PropertyStore>,
        conversations: Arc<dyn ConversationStore>,
        classifier: IntentClassifier,
    ) -> Self {
        Self {
            properties,
            conversations,
            classifier,
            page_size: DEFAULT_PAGE_SIZE,
            max_images: DEFAULT_MAX_IMAGES,
        }
    }

    /// 页大小上限 3，图片上限 5
    pub fn with_limits(mut self, page_size: usize, max_images: usize) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self.max_images = max_images.min(DEFAULT_MAX_IMAGES);
        self
    }

    /// 模型参数优先，缺失的由 fallback 补齐
    fn filter_with(&self, args: &SearchArgs, fallback: SearchParams) -> PropertyFilter {
        let vocab = self.classifier.vocabulary();

        let city = non_blank(args.cidade.clone())
            .map(|c| vocab.city_named(&c).map(str::to_string).unwrap_or(c))
            .or(fallback.city);
        let property_type = non_blank(args.tipo_imovel.clone())
            .map(|t| vocab.canonical_type(&t).map(str::to_string).unwrap_or_else(|| fold(&t)))
            .or(fallback.property_type);
        let transaction = non_blank(args.tipo_transacao.clone())
            .and_then(|t| TransactionType::parse(&t))
            .or(fallback.transaction);

        PropertyFilter {
            city,
            transaction,
            property_type,
        }
    }

    /// 完整过滤条件：缺失的从整段对话中提取
    fn resolve_filter(&self, args: &SearchArgs, ctx: &ToolContext) -> PropertyFilter {
        let derived = self
            .classifier
            .extract_from_conversation(&ctx.history, &ctx.message);
        self.filter_with(args, derived)
    }

    /// 本回合明确给出的条件：只看模型参数与当前消息，不看历史
    fn explicit_filter(&self, args: &SearchArgs, ctx: &ToolContext) -> PropertyFilter {
        self.filter_with(args, self.classifier.extract_params(&ctx.message))
    }

    /// 本次查询的过滤条件与起始偏移
    ///
    /// 「看更多」只有在本回合没有给出与游标不同的条件时才从游标继续；
    /// 「tem outras casas em Londrina?」这类消息是新搜索，从 0 开始。
    async fn window(&self, args: &SearchArgs, ctx: &ToolContext) -> (PropertyFilter, usize) {
        if !ctx.is_show_more {
            return (self.resolve_filter(args, ctx), args.offset.unwrap_or(0));
        }

        match self.conversations.search_cursor(&ctx.instance_id, &ctx.phone).await {
            Ok(Some(cursor)) => {
                if continues_cursor(&self.explicit_filter(args, ctx), &cursor) {
                    debug!(offset = cursor.next_offset, "continuing from search cursor");
                    let filter = PropertyFilter {
                        city: cursor.city,
                        transaction: cursor.transaction,
                        property_type: cursor.property_type,
                    };
                    return (filter, cursor.next_offset);
                }
                debug!("continuation names new filters, starting a new search");
                return (self.resolve_filter(args, ctx), 0);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "search cursor unavailable, falling back to history"),
        }
        let offset = history_offset(&ctx.history, self.page_size);
        (self.resolve_filter(args, ctx), offset)
    }

    async fn save_cursor(&self, ctx: &ToolContext, filter: &PropertyFilter, next_offset: usize, total: usize) {
        let cursor = SearchCursor {
            city: filter.city.clone(),
            transaction: filter.transaction,
            property_type: filter.property_type.clone(),
            next_offset,
            total,
        };
        if let Err(e) = self
            .conversations
            .save_search_cursor(&ctx.instance_id, &ctx.phone, cursor)
            .await
        {
            warn!(error = %e, phone = %ctx.phone, "failed to save search cursor");
        }
    }
}

#[async_trait]
impl Tool for SearchPropertiesTool {
    fn name(&self) -> &str {
        SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Busca imóveis disponíveis da imobiliária por cidade, tipo de transação e tipo de imóvel. \
         Retorna no máximo 3 imóveis por chamada."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SearchArgs>()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome, String> {
        let args: SearchArgs = if args.is_null() {
            SearchArgs::default()
        } else {
            serde_json::from_value(args).map_err(|e| format!("invalid arguments: {e}"))?
        };

        let (filter, offset) = self.window(&args, ctx).await;
        let limit = args.limite.unwrap_or(self.page_size).clamp(1, self.page_size);

        let matches = self
            .properties
            .search(&ctx.company_id, &filter)
            .await
            .map_err(|e| e.to_string())?;
        let total = matches.len();
        let page: Vec<&Property> = matches.iter().skip(offset).take(limit).collect();

        debug!(
            city = ?filter.city,
            property_type = ?filter.property_type,
            transaction = ?filter.transaction,
            total,
            offset,
            returned = page.len(),
            "property search"
        );

        if page.is_empty() {
            self.save_cursor(ctx, &filter, offset, total).await;
            let (status, reply) = if offset == 0 {
                ("sem_resultados", NO_RESULTS_REPLY)
            } else {
                ("esgotado", EXHAUSTED_REPLY)
            };
            let mut outcome = ToolOutcome::new(json!({ "status": status, "total": total })).terminal(reply);
            outcome.has_more = Some(false);
            return Ok(outcome);
        }

        let mut cards = Vec::with_capacity(page.len());
        for property in &page {
            let amenities = if property.amenity_ids.is_empty() {
                Vec::new()
            } else {
                self.properties
                    .amenity_names(&property.amenity_ids)
                    .await
                    .map_err(|e| e.to_string())?
            };
            cards.push(render_card(property, &amenities, self.max_images));
        }

        let returned = cards.len();
        let remaining = total.saturating_sub(offset + returned);
        let has_more = remaining > 0;
        self.save_cursor(ctx, &filter, offset + returned, total).await;

        let content = json!({
            "status": "ok",
            "total": total,
            "retornados": returned,
            "restantes": remaining,
            "tem_mais": has_more,
            "imoveis": cards
                .iter()
                .map(|c| json!({ "codigo": c.code, "titulo": c.title, "endereco": c.address }))
                .collect::<Vec<_>>(),
        });

        let mut instruction = String::from(
            "Os imóveis encontrados serão enviados ao cliente em mensagens separadas, com fotos. \
             Responda com UMA frase curta de introdução começando com \"Encontrei\". \
             Não liste os imóveis, códigos, preços nem endereços.",
        );
        if has_more {
            instruction.push_str(" Diga também que há mais opções e que o cliente pode pedir para ver mais.");
        }

        let mut outcome = ToolOutcome::new(content).with_instruction(instruction);
        outcome.properties = cards;
        outcome.has_more = Some(has_more);
        Ok(outcome)
    }
}
