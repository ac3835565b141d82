//! MindGym · skills trainer backend
//!
//! - Axum HTTP + WebSocket API
//! - LLM judge via a local generate API or any OpenAI-compatible endpoint
//! - Static SPA fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                : u16 (default 3000)
//!   MINDGYM_PROVIDER    : ollama (default) | openrouter | openai | mistral | custom
//!   MINDGYM_API_KEY     : bearer key for hosted providers
//!   MINDGYM_MODEL       : overrides the provider's default model
//!   MINDGYM_BASE_URL    : overrides the provider's base URL (required for custom)
//!   MINDGYM_CONFIG_PATH : path to TOML config (prompts, coach messages, timeouts)
//!   MINDGYM_COURSES_DIR : catalog directory (default ./courses)
//!   MINDGYM_DATA_DIR    : progress + local library files (default ./data)
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, instrument};

use mindgym::config::Settings;
use mindgym::routes::build_router;
use mindgym::state::AppState;
use mindgym::telemetry;

/// Resolves on Ctrl+C so in-flight requests can finish.
async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!(target: "mindgym", error = %e, "Failed to install Ctrl+C handler");
    std::future::pending::<()>().await;
  }
  info!(target: "mindgym", "Received shutdown signal. Shutting down gracefully...");
}

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  let settings = Settings::from_env();

  // Shared application state (stores, catalog, judge client, sessions).
  let state = Arc::new(AppState::from_settings(&settings).await?);
  let sweeper = state.spawn_session_sweeper(settings.agent.timeouts.session_idle());

  // Build the HTTP router with routes, CORS and tracing layers.
  let app = build_router(state.clone());

  let listener = TcpListener::bind(settings.addr).await?;
  info!(target: "mindgym", addr = %settings.addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  sweeper.abort();
  info!(target: "mindgym", "Server has shut down.");
  Ok(())
}
