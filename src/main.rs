//! imob-agent - WhatsApp 房产销售智能体
//!
//! 入口：加载配置、初始化日志、组装缓冲区 -> 编排器 -> 网关，并运行 Webhook 服务。

#[cfg(feature = "whatsapp")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    server::run().await
}

#[cfg(not(feature = "whatsapp"))]
fn main() {
    eprintln!("imob-agent was built without the `whatsapp` feature; nothing to run.");
}

#[cfg(feature = "whatsapp")]
mod server {
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Context;
    use imob_agent::buffer::MessageBuffer;
    use imob_agent::config::load_config;
    use imob_agent::core::{BufferCleanup, ShutdownCoordinator, ShutdownManager};
    use imob_agent::integrations::whatsapp::{create_router, TurnFlushHandler, WhatsappState};
    use imob_agent::integrations::{HttpGateway, MessagingGateway};
    use imob_agent::intent::IntentClassifier;
    use imob_agent::llm::OpenAiCompletion;
    use imob_agent::memory::ConversationMemory;
    use imob_agent::observability;
    use imob_agent::store::{CatalogSeed, InMemoryStore};
    use imob_agent::tools::{ScheduleVisitTool, SearchPropertiesTool, ToolExecutor, ToolRegistry};
    use imob_agent::turn::TurnOrchestrator;

    pub async fn run() -> anyhow::Result<()> {
        observability::init();

        let config_path = std::env::args().nth(1).map(Into::into);
        let config = load_config(config_path).context("Failed to load configuration")?;

        let store = Arc::new(InMemoryStore::new());
        if let Some(path) = &config.app.seed_path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read seed file {}", path.display()))?;
            let seed: CatalogSeed = serde_json::from_str(&raw).context("Invalid seed file")?;
            store.load_seed(seed).await;
        }
        let ai_settings = config.ai_settings();
        if ai_settings.is_none() {
            tracing::warn!("No LLM API key configured; turns will be skipped");
        }
        store.set_ai_settings(ai_settings).await;

        let api_url = config
            .whatsapp
            .api_url
            .as_deref()
            .context("whatsapp.api_url is required")?;
        let gateway: Arc<dyn MessagingGateway> = Arc::new(HttpGateway::new(
            api_url,
            config.whatsapp.api_key.as_deref().unwrap_or_default(),
        )?);

        let classifier = IntentClassifier::new(Arc::new(config.catalog.vocabulary()));
        let mut registry = ToolRegistry::new();
        registry.register(
            SearchPropertiesTool::new(store.clone(), store.clone(), classifier.clone())
                .with_limits(config.tools.page_size, config.tools.max_images),
        );
        registry.register(
            ScheduleVisitTool::new(store.clone(), store.clone(), store.clone())
                .with_notifier(Arc::clone(&gateway)),
        );
        let tools = Arc::new(ToolExecutor::new(registry, config.tools.tool_timeout_secs));

        let completion = Arc::new(OpenAiCompletion::new(
            config.llm.base_url.as_deref(),
            Duration::from_secs(config.llm.timeouts.request),
        )?);
        let orchestrator = Arc::new(
            TurnOrchestrator::new(completion, store.clone(), tools, classifier)
                .with_utc_offset_hours(config.app.utc_offset_hours),
        );
        let memory = Arc::new(ConversationMemory::new(store.clone(), config.app.history_limit));

        let buffer = Arc::new(MessageBuffer::new(Duration::from_secs(
            config.buffer.quiet_window_secs,
        )));
        let state = Arc::new(WhatsappState {
            buffer: Arc::clone(&buffer),
            handler: Arc::new(TurnFlushHandler::new(orchestrator, memory, gateway)),
            webhook_token: config.whatsapp.webhook_token.clone(),
        });

        let shutdown = ShutdownManager::new();
        shutdown.install_signal_handlers();
        let mut coordinator = ShutdownCoordinator::new();
        coordinator.register(BufferCleanup::new(Arc::clone(&buffer)));

        let listener = tokio::net::TcpListener::bind(&config.app.listen_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.app.listen_addr))?;
        tracing::info!(
            addr = %config.app.listen_addr,
            quiet_window_secs = config.buffer.quiet_window_secs,
            "WhatsApp webhook listening"
        );

        let signal = shutdown.clone();
        axum::serve(listener, create_router(state))
            .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
            .await
            .context("Server error")?;

        let completed = coordinator.run_cleanup().await;
        tracing::info!(reason = ?shutdown.reason(), cleanup_tasks = completed, "Shut down");
        Ok(())
    }
}
