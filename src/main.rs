use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use lume_session::config::{Settings, StorageBackend};
use lume_session::core::{CallLimits, ExpirySweeper, Matcher, RewardPolicy, SessionRegistry};
use lume_session::relay::RelayHub;
use lume_session::routes::{self, AppState};
use lume_session::services::{MemoryStore, PostgresStore, ProfileClient, ProfileDirectory, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle path parameter errors
pub fn handle_path_error(err: error::PathError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("Path error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_path".to_string(),
        message: format!("Invalid path parameter: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_tracing(level: &str, format: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

fn startup_error(context: &str, err: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, err);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    init_tracing(&settings.logging.level, &settings.logging.format);

    info!("Starting Lume session service...");

    // Initialize session store
    let store: Arc<dyn SessionStore> = match settings.storage.backend {
        StorageBackend::Postgres => {
            let postgres = PostgresStore::from_settings(
                &settings.database.url,
                settings.database.max_connections,
                settings.database.min_connections,
                settings.database.acquire_timeout_secs,
                settings.database.idle_timeout_secs,
            )
            .await
            .map_err(|e| startup_error("Failed to connect to PostgreSQL", e))?;

            info!(
                "PostgreSQL store initialized (max: {} connections)",
                settings.database.max_connections.unwrap_or(10)
            );
            Arc::new(postgres)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory store; state is lost on restart and not shared between instances");
            Arc::new(MemoryStore::new())
        }
    };

    let matcher = Matcher::new(store.clone(), settings.matching.ticket_ttl_secs);

    // Profile directory is optional; sessions work without partner details
    let profiles = match settings.profiles.endpoint.clone() {
        Some(endpoint) => {
            let client = ProfileClient::new(endpoint, settings.profiles.api_key.clone())
                .map_err(|e| startup_error("Failed to build profile client", e))?;
            info!(
                "Profile directory enabled (cache: {} entries, TTL: {}s)",
                settings.profiles.cache_size, settings.profiles.cache_ttl_secs
            );
            Some(Arc::new(ProfileDirectory::new(
                client,
                settings.profiles.cache_size,
                settings.profiles.cache_ttl_secs,
            )))
        }
        None => {
            info!("No profile endpoint configured, partner details disabled");
            None
        }
    };

    let registry = SessionRegistry::new(
        store.clone(),
        RewardPolicy::from(&settings.rewards),
        CallLimits::from(&settings.call),
        profiles,
    );

    let relay = RelayHub::new();

    // Background expiry sweep
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(matcher.clone(), relay.clone()).spawn(
        Duration::from_secs(settings.matching.sweep_interval_secs.max(1)),
        shutdown_rx,
    );

    info!(
        "Matcher initialized (ticket TTL: {}s, sweep every {}s)",
        settings.matching.ticket_ttl_secs, settings.matching.sweep_interval_secs
    );

    // Build application state
    let app_state = AppState {
        store,
        matcher,
        registry,
        relay,
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::PathConfig::default().error_handler(handle_path_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await;

    info!("HTTP server stopped, shutting down sweeper");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!("Sweeper task failed: {}", e);
    }

    result
}
