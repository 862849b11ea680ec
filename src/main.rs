//! taskhive - Agent Pool Entry Point
//!
//! Starts the persistent system with the built-in agents and runs until
//! interrupted.

use std::sync::Arc;
use taskhive::agent::{Agent, AssistantAgent, EchoAgent};
use taskhive::config::Config;
use taskhive::llm::{LlmClient, OpenRouterClient};
use taskhive::system::PersistentSystem;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskhive=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    let llm_client: Option<Arc<dyn LlmClient>> = config
        .api_key
        .clone()
        .map(|key| Arc::new(OpenRouterClient::new(key)) as Arc<dyn LlmClient>);
    if llm_client.is_none() {
        info!("No API key configured; assistant agent runs in offline mode");
    }

    let agents: Vec<(Arc<dyn Agent>, usize)> = vec![
        (Arc::new(EchoAgent::default()), 4),
        (
            Arc::new(AssistantAgent::new(
                "assistant",
                config.assistant_model.clone(),
                llm_client,
            )),
            2,
        ),
    ];

    let system = PersistentSystem::from_config(agents, config)?;
    system.start().await?;
    info!("taskhive running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    system.stop().await;

    Ok(())
}
