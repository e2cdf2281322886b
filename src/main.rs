use axum::{
    http::Method,
    routing::get,
    Router,
};
use chrono::Duration;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod campaigns;
mod config;
mod database;
mod dispatch;
mod engine;
mod error;
mod handlers;
mod jobs;
mod models;
mod rules;
mod services;
mod store;

pub use error::{EngineError, EngineResult};

#[cfg(test)]
mod tests;

use campaigns::CampaignEngine;
use dispatch::Dispatcher;
use engine::AutomationEngine;
use handlers::AppState;
use jobs::JobRunner;
use rules::RuleEngine;
use services::{
    ContentGenerator, EmailTransport, HttpGenerator, HttpSmsGateway, SmsTransport, SmtpMailer,
};
use store::{EngineStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;

    let store: Arc<dyn EngineStore> = match config.store_backend {
        config::StoreBackend::Postgres => {
            let pool = database::create_pool(&config.database_url).await?;
            database::migrate(&pool).await?;
            Arc::new(PgStore::new(pool))
        }
        config::StoreBackend::Memory => {
            tracing::warn!("using in-memory store; state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let campaign_engine = Arc::new(CampaignEngine::new(store.clone()));
    let rule_engine = RuleEngine::new(
        store.clone(),
        Duration::seconds(config.engine.default_cooldown_secs),
    );
    let automation = AutomationEngine::start(
        store.clone(),
        rule_engine,
        campaign_engine.clone(),
        config.engine.evaluation_shards,
    );

    if !config.smtp.is_configured() {
        tracing::warn!("smtp credentials not configured; email delivery will fail until set");
    }
    let email: Arc<dyn EmailTransport> = Arc::new(SmtpMailer::new(&config.smtp)?);
    let sms: Option<Arc<dyn SmsTransport>> = match &config.sms {
        Some(sms_config) => Some(Arc::new(HttpSmsGateway::new(sms_config)?)),
        None => None,
    };
    let generator: Option<Arc<dyn ContentGenerator>> = match &config.generation {
        Some(generation_config) => Some(Arc::new(HttpGenerator::new(generation_config)?)),
        None => None,
    };

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        campaign_engine,
        email,
        sms,
        generator,
        config.dispatcher_config(),
    ));

    let job_runner = JobRunner::new(store.clone(), dispatcher, config.job_config()).await?;
    job_runner.start().await?;

    let app_state = Arc::new(AppState {
        engine: automation,
        store,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Nurture Automation Engine v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", handlers::api_routes())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    job_runner.shutdown().await?;
    Ok(())
}
