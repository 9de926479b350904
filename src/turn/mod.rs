//! 回合层：上下文、系统提示、智能体委派与编排器

pub mod context;
pub mod delegation;
pub mod orchestrator;
pub mod prompt;

pub use context::{AgentRef, MediaPayload, TurnContext, TurnInput, TurnResponse};
pub use delegation::select_agent;
pub use orchestrator::{TurnOrchestrator, APOLOGY_TEXT, DEFAULT_UTC_OFFSET_HOURS};
pub use prompt::build_system_prompt;
