//! imob-agent - 房产中介 WhatsApp 销售智能体核心
//!
//! 模块划分：
//! - **buffer**: 入站事件模型与按会话防抖的聚合缓冲区
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与优雅关闭
//! - **integrations**: 出站消息网关与 WhatsApp Webhook 入口
//! - **intent**: 词表、文本归一化与意图分类
//! - **llm**: 补全服务抽象、OpenAI 兼容客户端与脚本化 Mock
//! - **memory**: 对话消息模型与会话记忆适配器
//! - **observability**: tracing 初始化
//! - **store**: 存储接口、领域模型与进程内实现
//! - **tools**: 工具注册、执行器、房源搜索与看房预约
//! - **turn**: 回合上下文、系统提示、智能体委派与编排器

pub mod buffer;
pub mod config;
pub mod core;
pub mod integrations;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod store;
pub mod tools;
pub mod turn;
