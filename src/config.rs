//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `IMOB__*` 覆盖（双下划线表示嵌套，如 `IMOB__BUFFER__QUIET_WINDOW_SECS=5`）。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::intent::Vocabulary;
use crate::llm::AiSettings;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub buffer: BufferSection,
    pub llm: LlmSection,
    pub catalog: CatalogSection,
    pub tools: ToolsSection,
    pub whatsapp: WhatsappSection,
}

/// [app] 段：监听地址、历史条数、时区
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// 每回合加载的历史消息条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// 日期上下文与预约日历日所用时区（相对 UTC 的小时数）
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    /// 种子数据（实例映射、智能体、房源、经纪人）的 JSON 文件
    pub seed_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            listen_addr: default_listen_addr(),
            history_limit: default_history_limit(),
            utc_offset_hours: default_utc_offset_hours(),
            seed_path: None,
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_history_limit() -> usize {
    30
}

fn default_utc_offset_hours() -> i32 {
    -3
}

/// [buffer] 段
#[derive(Debug, Clone, Deserialize)]
pub struct BufferSection {
    /// 静默窗口（秒）
    #[serde(default = "default_quiet_window_secs")]
    pub quiet_window_secs: u64,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            quiet_window_secs: default_quiet_window_secs(),
        }
    }
}

fn default_quiet_window_secs() -> u64 {
    15
}

/// [llm] 段：OpenAI 兼容端点、模型与生成参数
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// 未设置时回退到环境变量 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_followup_max_tokens")]
    pub followup_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_model(),
            api_key: None,
            max_tokens: default_max_tokens(),
            followup_max_tokens: default_followup_max_tokens(),
            temperature: default_temperature(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    600
}

fn default_followup_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [catalog] 段：城市列表与房产类型别名表（别名 -> 规范名），为空时使用内置默认
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CatalogSection {
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub property_types: HashMap<String, String>,
}

impl CatalogSection {
    pub fn vocabulary(&self) -> Vocabulary {
        Vocabulary::from_catalog(&self.cities, &self.property_types)
    }
}

/// [tools] 段：工具超时、分页大小、每个房源的图片上限
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            page_size: default_page_size(),
            max_images: default_max_images(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    3
}

fn default_max_images() -> usize {
    5
}

/// [whatsapp] 段：网关 API 与 Webhook 校验令牌
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WhatsappSection {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    /// 设置后，Webhook 请求必须携带相同的 `apikey` 头
    pub webhook_token: Option<String>,
}

impl AppConfig {
    /// 全局 AI 配置；没有可用的 API Key 时返回 None
    pub fn ai_settings(&self) -> Option<AiSettings> {
        let api_key = self
            .llm
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())?;
        Some(AiSettings {
            api_key,
            model: self.llm.model.clone(),
            max_tokens: self.llm.max_tokens,
            followup_max_tokens: self.llm.followup_max_tokens,
            temperature: self.llm.temperature,
        })
    }
}

/// 从 config 目录加载配置，环境变量 IMOB__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 IMOB__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("IMOB")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
