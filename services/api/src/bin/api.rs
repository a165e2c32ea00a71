//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, MemoryIdentity, PgIdentity},
    config::{Config, StoreBackend},
    error::ApiError,
    tasks::spawn_sweeper,
    web::{
        auth::{login_handler, logout_handler, signup_handler},
        rest::{self, ApiDoc},
        state::AppState,
        require_auth, ws_handler,
    },
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use scribe_market_core::ports::{IdentityProvider, MarketStore, SystemClock};
use scribe_market_core::{InMemoryStore, Marketplace};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect the Store & Identity Provider ---
    let (store, identity): (Arc<dyn MarketStore>, Arc<dyn IdentityProvider>) =
        match config.store_backend {
            StoreBackend::Postgres => {
                let database_url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| ApiError::Internal("DATABASE_URL is required".to_string()))?;
                info!("Connecting to database...");
                let db_pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(database_url)
                    .await?;
                let db_adapter = DbAdapter::new(db_pool.clone());
                info!("Running database migrations...");
                db_adapter.run_migrations().await?;
                info!("Database migrations complete.");
                let identity = PgIdentity::new(
                    db_pool,
                    config.allowed_email_domains.clone(),
                    config.session_ttl,
                );
                let store: Arc<dyn MarketStore> = Arc::new(db_adapter);
                let identity: Arc<dyn IdentityProvider> = Arc::new(identity);
                (store, identity)
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store; all data is lost on restart.");
                let identity = MemoryIdentity::new(
                    config.allowed_email_domains.clone(),
                    config.session_ttl,
                );
                let store: Arc<dyn MarketStore> = Arc::new(InMemoryStore::new());
                let identity: Arc<dyn IdentityProvider> = Arc::new(identity);
                (store, identity)
            }
        };

    // --- 3. Build the Shared AppState ---
    let market = Marketplace::new(store, Arc::new(SystemClock), config.policy);
    let app_state = Arc::new(AppState {
        market: market.clone(),
        identity,
        config: config.clone(),
    });

    // --- 4. Start Background Tasks ---
    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(market, config.sweep_interval, shutdown.clone());

    // --- 5. Create the Web Router ---
    let allowed_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/users/{username}", get(rest::public_profile_handler))
        .route("/writers", get(rest::list_writers_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(rest::me_handler))
        .route("/onboarding", post(rest::onboarding_handler))
        .route(
            "/writers/me",
            post(rest::become_writer_handler).patch(rest::update_writer_handler),
        )
        .route("/writers/{id}/requests", post(rest::propose_task_handler))
        .route(
            "/assignments",
            post(rest::post_assignment_handler).get(rest::available_work_handler),
        )
        .route("/assignments/mine", get(rest::my_assignments_handler))
        .route(
            "/assignments/{id}",
            axum::routing::delete(rest::delete_assignment_handler),
        )
        .route("/assignments/{id}/claim", post(rest::claim_assignment_handler))
        .route("/assignments/{id}/requests", post(rest::request_assignment_handler))
        .route("/assignments/{id}/finish", post(rest::finish_assignment_handler))
        .route("/notifications", get(rest::inbox_handler))
        .route("/notifications/{id}/accept", post(rest::accept_notification_handler))
        .route("/notifications/{id}/reject", post(rest::reject_notification_handler))
        .route("/notifications/{id}/open", post(rest::open_notification_handler))
        .route("/chats", get(rest::list_chats_handler))
        .route("/chats/{id}", get(rest::get_chat_handler))
        .route("/chats/{id}/messages", post(rest::send_message_handler))
        .route("/chats/{id}/typing", post(rest::typing_handler))
        .route("/chats/{id}/end", post(rest::end_chat_handler))
        .route("/chats/{id}/read", post(rest::mark_read_handler))
        .route("/chats/{id}/countdown", get(rest::countdown_handler))
        .route("/chats/{id}/feedback", post(rest::feedback_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- 7. Stop Background Tasks ---
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!("Sweeper task ended abnormally: {:?}", e);
    }
    info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received."),
        Err(e) => {
            error!("Failed to listen for the shutdown signal: {:?}", e);
            std::future::pending::<()>().await;
        }
    }
}
