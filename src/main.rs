use anyhow::Context;
use dotenvy::dotenv;
use log::{info, warn};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use kpiserver::api_router::configure_api_routes;
use kpiserver::config::{AppConfig, StoreBackend};
use kpiserver::llm::OpenAIClient;
use kpiserver::permissions::bootstrap_admin;
use kpiserver::shared::state::AppState;
use kpiserver::store::{spawn_error_listener, DocumentStore, MemoryStore};

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            use kpiserver::store::postgres::{create_pool, PgDocumentStore};

            let url = config.store.database_url.clone().unwrap_or_default();
            let pool_size = config.store.pool_size;
            let store = tokio::task::spawn_blocking(move || {
                let store = PgDocumentStore::new(create_pool(&url, pool_size)?);
                store.migrate()?;
                Ok::<_, kpiserver::store::StoreError>(store)
            })
            .await
            .context("store setup task panicked")?
            .context("failed to open the postgres document store")?;
            info!("Connected to postgres document store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => {
            anyhow::bail!("store.backend = \"postgres\" needs a build with the postgres feature")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load(None).context("invalid configuration")?;
    let store = build_store(&config).await?;

    if let Some(email) = config.auth.bootstrap_admin.as_deref() {
        bootstrap_admin(store.as_ref(), email)
            .await
            .context("failed to bootstrap the admin account")?;
    }
    if config.llm.api_key.is_empty() {
        warn!("llm.api_key is empty; insight requests will likely be rejected upstream");
    }

    let llm_provider = Arc::new(OpenAIClient::from_config(&config.llm));
    let bind_address = config.bind_address();
    let (state, store_errors) = AppState::new(config, store, llm_provider);
    spawn_error_listener(store_errors);

    let app = configure_api_routes()
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    info!("kpiserver listening on {bind_address}");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
