use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

use persona_chat_server::auth::{self, jwt::JwtManager};
use persona_chat_server::config::Settings;
use persona_chat_server::database::{DbPool, Repository};
use persona_chat_server::handlers;
use persona_chat_server::logging::{ActivityLogger, LoggerConfig};
use persona_chat_server::services::conversation::{PromptBuilder, TurnRunner};
use persona_chat_server::services::embedding::EmbeddingClient;
use persona_chat_server::services::event_bus::EventBus;
use persona_chat_server::services::llm::LlmClient;
use persona_chat_server::services::retriever::{PgVectorSearch, Retriever};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,persona_chat_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("🚀 Starting Persona Chat Server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Initialize database pool
    let db_pool = DbPool::new(&settings.database).await?;
    info!("✅ Database connection established");

    let repository = Arc::new(Repository::new(db_pool.clone()));
    repository.ensure_schema().await?;
    info!("✅ Database schema verified");

    // Auth
    let jwt = Arc::new(JwtManager::new(
        &settings.auth.jwt_secret,
        settings.auth.jwt_expiration_seconds,
    ));

    // Live event fan-out
    let events = Arc::new(EventBus::new(settings.server.event_capacity));

    // Activity logging (async batch writer)
    let activity = ActivityLogger::new(db_pool.get_pool().clone(), LoggerConfig::default());

    // Turn pipeline
    let embedding = EmbeddingClient::new(settings.embedding.clone())?;
    let search = Arc::new(PgVectorSearch::new(embedding, repository.clone()));
    let retriever = Retriever::new(search, settings.rag.retrieval_top_k);

    let llm = Arc::new(LlmClient::new(settings.llm.clone())?);

    let runner = Arc::new(TurnRunner::new(
        retriever,
        PromptBuilder::new(settings.prompts.system_instruction.clone()),
        llm,
        repository.clone(),
        events.clone(),
        activity.clone(),
    ));

    // Build router
    let app = build_router(jwt, repository, events, runner, activity);

    // Server address
    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn build_router(
    jwt: Arc<JwtManager>,
    repository: Arc<Repository>,
    events: Arc<EventBus>,
    runner: Arc<TurnRunner>,
    activity: ActivityLogger,
) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/ready", get(handlers::health::ready));

    // REST surface (bearer-token auth)
    let api_routes = Router::new()
        .route(
            "/api/sessions",
            post(handlers::sessions::create_session).get(handlers::sessions::list_sessions),
        )
        .route(
            "/api/sessions/{session_id}/messages",
            get(handlers::sessions::list_messages),
        )
        .layer(middleware::from_fn(auth::middleware::require_auth));

    // WebSocket (query-token auth, handled pre-upgrade)
    let ws_routes = Router::new().route("/ws/chat/{session_id}", get(handlers::ws::chat_socket));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(ws_routes)
        // Shared state
        .layer(Extension(jwt))
        .layer(Extension(repository))
        .layer(Extension(events))
        .layer(Extension(runner))
        .layer(Extension(activity))
        // CORS
        .layer(CorsLayer::permissive())
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}
