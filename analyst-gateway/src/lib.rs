//! Analyst Gateway - chat-driven requirements gathering service.
//!
//! This crate provides the server for the Analyst assistant:
//! - Login and HTTP auth with HS256 tokens
//! - The agent WebSocket channel: interview turns, reply classification
//!   and document generation
//! - The team WebSocket channel: direct messages between users
//! - REST endpoints for sessions, drafts and accounts
//!
//! ## Architecture
//!
//! ```text
//! Client ─ws/agent→ AgentEngine → LlmGateway → Gemini
//!                        ↓
//!                 ReplyClassifier → DraftService → DocxRenderer
//!
//! Client ─ws/team→ PeerEngine → ConnectionHub → other clients
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod agent;
pub mod auth;
pub mod classify;
pub mod document;
pub mod drafts;
pub mod events;
pub mod hub;
pub mod llm;
pub mod outbound;
pub mod peer;
pub mod provider;
pub mod routes;
pub mod ws;

pub use agent::{AgentEngine, AgentServices};
pub use auth::{AuthOutcome, AuthState, ConnectionContext, IdentityPolicy};
pub use classify::{ReplyClassifier, ReplyKind};
pub use drafts::{DraftError, DraftService};
pub use hub::ConnectionHub;
pub use llm::{LlmError, LlmGateway};
pub use provider::{
    ChatRequest, ChatResponse, GeminiProvider, Provider, ProviderError, ResilienceConfig,
    ResilientProvider,
};
pub use routes::AppState;

use analyst_common::config::Config;
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the gateway router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_all_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Startup housekeeping: drop orphaned messages and seed the admin account.
pub fn prepare(state: &AppState) -> anyhow::Result<()> {
    let purged = state.messages.purge_orphans()?;
    if purged > 0 {
        tracing::info!(purged, "Removed orphaned messages");
    }

    let auth = &state.config.auth;
    match (auth.admin_email.as_deref(), auth.admin_password.as_deref()) {
        (Some(email), Some(password)) => {
            if let Some(admin) = state.users.seed_admin(email, password)? {
                tracing::info!(user_id = admin.id, "Seeded admin account");
            }
        }
        _ => tracing::debug!("No admin credentials configured, skipping seed"),
    }

    if !state.auth.is_configured() {
        tracing::warn!("No JWT secret configured: HTTP routes are open and WebSocket channels refuse every connection");
    }
    Ok(())
}

/// Start the gateway server.
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.listen_address().parse()?;
    let state = AppState::from_config(config)?;
    prepare(&state)?;

    let hub = state.hub.clone();
    let router = build_router(state);

    tracing::info!("Starting Analyst Gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub.clear().await;
    tracing::info!("Analyst Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
