//! ScriptHub Server
//!
//! HTTP server that delivers protected scripts to game clients and exposes
//! the management console API.

pub mod config;
pub mod console_api;
pub mod delivery;
pub mod obfuscation;
pub mod rest_store;

use std::sync::Arc;

use anyhow::Context;
use axum::{http::HeaderName, response::IntoResponse, routing::get, Json, Router};
use scripthub_core::{
    AccessEngine, Clock, CodeTransform, Console, EngineConfig, LocalTransform, MemoryStore,
    RecordStore, SystemClock,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use config::{ConfigError, ServerConfig, StoreBackend};
pub use obfuscation::{RemoteObfuscator, TransformError};
pub use rest_store::RestStore;

/// Shared application state
pub struct AppState {
    pub engine: Arc<AccessEngine>,
    pub console: Console,
    pub brand: String,
    /// Where browsers are sent instead of receiving code
    pub browser_redirect: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        transform: Arc<dyn CodeTransform>,
        clock: Arc<dyn Clock>,
        brand: String,
        browser_redirect: Option<String>,
    ) -> Arc<Self> {
        let engine = AccessEngine::new(
            store.clone(),
            transform.clone(),
            clock.clone(),
            EngineConfig {
                brand: brand.clone(),
            },
        );
        Arc::new(Self {
            engine: Arc::new(engine),
            console: Console::new(store, transform, clock),
            brand,
            browser_redirect,
        })
    }

    /// Build state from configuration, wiring the configured store and the
    /// remote transform with its local fallback
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Arc<Self>> {
        let store: Arc<dyn RecordStore> = match config.store.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory record store; data is lost on exit");
                Arc::new(MemoryStore::new())
            }
            StoreBackend::Rest => {
                let url = config.store.url.as_deref().context("store.url is not set")?;
                let key = config
                    .store
                    .service_key
                    .as_deref()
                    .context("store.service_key is not set")?;
                Arc::new(RestStore::new(url, key).context("Failed to create REST store")?)
            }
        };

        let fallback = LocalTransform::new(config.fallback.clone(), config.brand.clone());
        let transform = RemoteObfuscator::new(&config.obfuscator, fallback)
            .context("Failed to create obfuscation client")?;
        if config.obfuscator.api_key.is_none() {
            tracing::warn!("No obfuscator API key configured; using the local transform only");
        }

        Ok(Self::new(
            store,
            Arc::new(transform),
            Arc::new(SystemClock),
            config.brand.clone(),
            config.browser_redirect.clone(),
        ))
    }
}

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([
            HeaderName::from_static("x-script-key"),
            HeaderName::from_static("x-hwid"),
            HeaderName::from_static("x-user-id"),
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Router::new()
        // Script delivery
        .route("/deliver", get(delivery::handle_deliver_root))
        .route("/deliver/:script_id", get(delivery::handle_deliver))
        .route("/loader", get(delivery::handle_deliver_root))
        .route("/loader/:script_id", get(delivery::handle_deliver))
        // Health check
        .route("/health", get(handle_health))
        .merge(console_api::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start the server
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;
    let router = create_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("ScriptHub server listening on {}", addr);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use scripthub_core::ObfuscatorConfig;

    pub fn test_state(browser_redirect: Option<&str>) -> Arc<AppState> {
        AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LocalTransform::new(ObfuscatorConfig::default(), "ScriptHub")),
            Arc::new(SystemClock),
            "ScriptHub".to_string(),
            browser_redirect.map(str::to_string),
        )
    }

    pub async fn body_text(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }
}
