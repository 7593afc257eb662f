use chat_memory::{
    api::{start_server, ApiState},
    config::AppConfig,
    documents::WebpageReader,
    llm::build_chat_model,
    select_policy, SessionStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    info!("Bounded chat memory - API Server");
    info!("Port: {}", config.port);
    info!("Memory policy: {}", config.policy);

    // Create components
    let model = build_chat_model(&config.llm)?;
    let collaborators = config.collaborators(model.clone())?;
    let memory = select_policy(config.policy, &collaborators);
    let sessions = Arc::new(
        SessionStore::new(memory, config.greeting.clone())
            .with_limits(config.max_sessions, config.session_idle_ttl),
    );
    let documents = Arc::new(WebpageReader::new()?);

    info!(model = model.name(), "Chat model ready");
    info!(
        max_sessions = config.max_sessions,
        idle_secs = config.session_idle_ttl.as_secs(),
        "Session limits"
    );

    // Idle sessions also go away when nobody is creating new ones
    let sweeper = sessions.clone();
    let sweep_every = (config.session_idle_ttl / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            sweeper.evict_idle().await;
        }
    });

    start_server(
        ApiState {
            sessions,
            model,
            documents,
        },
        config.port,
    )
    .await?;

    Ok(())
}
