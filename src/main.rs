mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use axum::http::{header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE}, HeaderValue, Method};
use config::Config;
use db::{db::DBClient, memory::MemoryStore, Store};
use dotenv::dotenv;
use routes::create_router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};

use service::{
    commission::CommissionEngine,
    referral_service::ReferralService,
    user_service::UserService,
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub store: Arc<dyn Store>,
    // Services
    pub referral_service: Arc<ReferralService>,
    pub user_service: Arc<UserService>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let engine = CommissionEngine::new(store.clone(), config.commission);
        let referral_service = ReferralService::new(store.clone(), engine);
        let user_service = UserService::new(
            store.clone(),
            referral_service.clone(),
            config.app_url.clone(),
        );

        Self {
            env: config,
            store,
            referral_service: Arc::new(referral_service),
            user_service: Arc::new(user_service),
        }
    }
}

async fn connect_store(config: &Config) -> Arc<dyn Store> {
    let database_url = match (&config.database_url, config.use_memory_store) {
        (Some(url), false) => url.clone(),
        _ => {
            println!("⚠️  Using the in-memory store - data is lost on restart");
            return Arc::new(MemoryStore::new());
        }
    };

    let pool = match PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&database_url)
        .await
    {
        Ok(pool) => {
            println!("✅ Connection to the database is successful!");
            println!("📊 Max connections: {}", config.database_max_connections);
            pool
        }
        Err(err) => {
            println!("🔥 Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    let db_client = DBClient::new(pool);

    if let Err(err) = db_client.migrate().await {
        println!("🔥 Failed to run database migrations: {:?}", err);
        std::process::exit(1);
    }

    Arc::new(db_client)
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = Config::init();

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    let store = connect_store(&config).await;

    let allowed_origins: Vec<HeaderValue> = [config.app_url.as_str(), "http://localhost:5173"]
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::PATCH]);

    let policy = config.commission;
    tracing::info!(
        "Commission policy: level 1 at {}, decay /{}, minimum {}, halt on store error: {}",
        policy.level_one_rate(),
        policy.decay_divisor,
        policy.min_rate(),
        policy.halt_on_store_error
    );

    let app_state = Arc::new(AppState::new(store, config.clone()));

    let app = create_router(app_state.clone()).layer(cors);

    println!("🚀 Server is running on http://localhost:{}", config.port);
    println!("💾 Store backend: {}", app_state.store.backend());

    let listener = match tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            println!("🔥 Failed to bind port {}: {:?}", config.port, err);
            std::process::exit(1);
        }
    };

    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", err);
    }
}
