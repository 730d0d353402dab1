use axum::{
    Router,
    http::Method,
    routing::get,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod pagination;
mod services;

pub use error::{ApiError, ApiResult, AppError};
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};

use services::cache::CacheService;
use services::email::EmailService;

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub cache: CacheService,
    /// Due-date offset for invoices whose order has no lead time of its own.
    pub default_lead_time_days: i32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let email_service = if config.smtp.is_configured() {
        match EmailService::new(&config.smtp).await {
            Ok(service) => Some(service),
            Err(e) => {
                tracing::warn!("SMTP transport setup failed, emails disabled: {}", e);
                None
            }
        }
    } else {
        tracing::warn!("SMTP not configured, invoice and reminder emails disabled");
        None
    };

    let mut scheduler = jobs::JobScheduler::new(
        db_pool.clone(),
        email_service,
        jobs::JobConfig::from(&config.jobs),
    )
    .await?;
    scheduler.start().await?;

    let app_state = Arc::new(AppState {
        db_pool: db_pool.clone(),
        cache: CacheService::new(db_pool),
        default_lead_time_days: config.jobs.default_lead_time_days,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "Billcycle Billing API v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .route("/api/v1/dashboard", get(handlers::dashboard_stats))
        .nest("/api/v1/clients", handlers::client_routes())
        .nest("/api/v1/orders", handlers::order_routes())
        .nest("/api/v1/invoices", handlers::invoice_routes())
        .nest("/api/v1/payments", handlers::payment_routes())
        .nest("/api/v1/reporting", handlers::reporting_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    scheduler.shutdown().await?;

    Ok(())
}
