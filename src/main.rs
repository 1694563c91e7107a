//! Banking triage orchestrator server

use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use triage_orchestrator::api::{create_router, AppState};
use triage_orchestrator::config::AppConfig;
use triage_orchestrator::llm::{LlmService, LoggingService, OpenAiService};
use triage_orchestrator::responder::banking;
use triage_orchestrator::router::{Router, TriagePolicy, BANKING_TRIAGE_RULES};
use triage_orchestrator::session::{InMemorySessionStore, SessionStore};
use triage_orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "triage_orchestrator=info,tower_http=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();
    if config.llm.api_key.is_none() {
        tracing::warn!("No API key configured. Set OPENAI_API_KEY; turns will fail until then.");
    }

    let classifier: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(
        OpenAiService::new(
            config.llm.api_key.clone(),
            &config.llm.base_url,
            config.llm.router_model.clone(),
        )?,
    )));
    let responder_llm: Arc<dyn LlmService> = Arc::new(LoggingService::new(Arc::new(
        OpenAiService::new(
            config.llm.api_key.clone(),
            &config.llm.base_url,
            config.llm.responder_model.clone(),
        )?,
    )));

    let responders = banking::registry(responder_llm, &config.prompt)?;
    let router = Router::new(
        classifier,
        TriagePolicy::new(BANKING_TRIAGE_RULES, &responders),
    );
    let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
    let orchestrator = Arc::new(Orchestrator::new(store, router, responders).with_limits(config.limits));

    tracing::info!(
        responders = ?orchestrator.responders().names(),
        router_model = %config.llm.router_model,
        responder_model = %config.llm.responder_model,
        "Orchestrator ready"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(AppState::new(orchestrator))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Triage orchestrator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
