mod auth;
mod clients;
mod config;
mod db;
mod handlers;
mod ingest;
mod models;
mod routes;
mod ws;

use clients::token_cache::TokenCache;
use config::Config;
use db::dbtasks::DbTasks;
use routes::create_routes;
use std::panic;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use ws::fanout::OwnershipResolver;
use ws::session::SessionRegistry;

/// Shared state handed to every connection and request handler.
pub struct AppState {
    pub config: Config,
    pub db: Arc<DbTasks>,
    pub token_cache: TokenCache,
    pub registry: SessionRegistry,
}

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "taskboard_gateway=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting manager dashboard gateway...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // The gateway cannot do anything useful without its store, token
    // cache and broker, so all three are fatal at start-up.
    let db = match DbTasks::new(&config.db_url).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let token_cache = match TokenCache::connect(&config.redis_url()).await {
        Ok(cache) => cache,
        Err(e) => {
            error!("Failed to connect to Redis: {}", e);
            std::process::exit(1);
        }
    };

    let queue = match ingest::consumer::start(&config.amqp_url()).await {
        Ok(queue) => queue,
        Err(e) => {
            error!("Failed to connect to RabbitMQ: {}", e);
            std::process::exit(1);
        }
    };

    let registry = SessionRegistry::new();
    let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity);

    // Ingest: queue envelope -> enriched TaskEvent -> broadcast channel
    tokio::spawn(queue.run(db.clone(), broadcast_tx));

    // Fan-out: broadcast channel -> every authorized session
    let resolver: Arc<dyn OwnershipResolver> = db.clone();
    tokio::spawn(ws::fanout::run(broadcast_rx, registry.clone(), resolver));

    let state = Arc::new(AppState {
        config: config.clone(),
        db,
        token_cache,
        registry,
    });

    let app_routes = create_routes(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("Gateway running on http://{}", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
