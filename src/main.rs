//! Beraber Admin Backend
//!
//! REST backend for the Beraber donation platform's admin panel, on a SQLite document
//! store with live views, feeds and push delivery.

mod api;
mod auth;
mod config;
mod db;
mod errors;
mod feed;
mod models;
mod push;
mod repository;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{Gatekeeper, GuardRegistry, JwtIdentityProvider};
use config::Config;
use db::{DocumentStore, IndexPolicy, SqliteStore};
use feed::{FeedRegistry, LiveRegistry};
use push::{LogPushGateway, PushDispatcher};
use repository::Repos;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repos: Repos,
    pub identity: Arc<JwtIdentityProvider>,
    pub gatekeeper: Gatekeeper,
    pub guards: Arc<GuardRegistry>,
    pub feeds: Arc<FeedRegistry>,
    pub live: Arc<LiveRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire every component around one store handle.
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        let repos = Repos::new(store.clone());
        let identity = Arc::new(JwtIdentityProvider::new(
            store.clone(),
            &config.jwt_secret,
            &config.jwt_issuer,
            config.token_ttl_secs,
        ));
        let gatekeeper = Gatekeeper::new(
            repos.whitelist.clone(),
            repos.users.clone(),
            identity.clone(),
            config.claims_retries,
            config.claims_backoff,
        );

        Self {
            repos,
            identity,
            gatekeeper,
            guards: Arc::new(GuardRegistry::new()),
            feeds: Arc::new(FeedRegistry::new(store)),
            live: Arc::new(LiveRegistry::new()),
            config: Arc::new(config),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Beraber Admin Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (BERABER_API_PSK). Maintenance routes are open!");
    }
    if config.jwt_secret == config::DEV_JWT_SECRET {
        tracing::warn!("Using the development JWT secret (BERABER_JWT_SECRET unset)");
    }
    if config.enforce_indexes {
        tracing::info!(
            declared = config.declared_indexes.len(),
            "Composite index policy enforced"
        );
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let policy = IndexPolicy::new(config.enforce_indexes, config.declared_indexes.clone());
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::new(pool, policy));

    let state = AppState::new(store.clone(), config.clone());

    // Push delivery follows the change feed for the life of the process
    PushDispatcher::new(
        state.repos.notifications.clone(),
        state.repos.users.clone(),
        Arc::new(LogPushGateway),
    )
    .spawn(store.changes());

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the maintenance layer
    let psk = state.config.api_psk.clone();

    // Trusted processes only
    let maintenance_routes = Router::new()
        .route("/tokens", post(api::issue_token))
        .route("/claims/sync", post(api::sync_claims))
        .route("/claims/{uid}", put(api::set_claims))
        .route("/team/normalize", post(api::normalize_team))
        .route("/highlights/backfill", post(api::backfill_highlights))
        .route("/donations/{id}/progress", post(api::report_progress))
        .route("/users/{uid}", put(api::upsert_user))
        .route("/user-stats", put(api::update_user_stats))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Admin panel routes, admitted per request
    let admin_routes = Router::new()
        .route("/session", get(api::get_session))
        // Donations
        .route("/donations", get(api::list_donations).post(api::create_donation))
        .route("/donations/search", get(api::search_donations))
        .route("/donations/completed", get(api::list_completed))
        .route("/donations/photo-pending", get(api::list_photo_pending))
        .route("/donations/campaign-options", get(api::campaign_options))
        .route(
            "/donations/{id}",
            get(api::get_donation)
                .put(api::update_donation)
                .delete(api::delete_donation),
        )
        .route("/donations/{id}/photo", put(api::set_donation_photo))
        // Notifications
        .route(
            "/notifications",
            get(api::list_notifications).post(api::create_notification),
        )
        .route(
            "/notifications/{id}",
            get(api::get_notification)
                .put(api::update_notification)
                .delete(api::delete_notification),
        )
        // Team
        .route("/team", get(api::list_team).post(api::create_team_member))
        .route("/team/lookup", get(api::lookup_team_member))
        .route(
            "/team/{id}",
            put(api::update_team_member).delete(api::delete_team_member),
        )
        // Community
        .route("/community/posts", get(api::list_posts).post(api::create_post))
        .route(
            "/community/posts/{id}",
            put(api::update_post).delete(api::delete_post),
        )
        .route(
            "/community/highlights",
            get(api::list_highlights).post(api::create_highlight),
        )
        .route(
            "/community/highlights/{id}",
            put(api::update_highlight).delete(api::delete_highlight),
        )
        // Todos
        .route("/todos", get(api::list_todos).post(api::create_todo))
        .route("/todos/{id}/toggle", post(api::toggle_todo))
        // Reports
        .route("/reports/dashboard", get(api::dashboard_report))
        .route("/reports/totals", get(api::totals_report))
        .route("/reports/categories", get(api::categories_report))
        .route("/reports/monthly-users", get(api::monthly_users_report))
        // Feeds
        .route("/feeds", post(api::open_feed))
        .route("/feeds/{id}", get(api::get_feed).delete(api::close_feed))
        .route("/feeds/{id}/more", post(api::load_more_feed))
        // Live views
        .route("/live/{view}", get(api::live_view))
        .route("/live/donations/{id}", get(api::live_donation))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admission,
        ));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api/maintenance", maintenance_routes)
        .nest("/api", admin_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
