use axum::{extract::State, response::Json};
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;
use crate::database;
use crate::error::ApiResult;
use crate::services::cache::{cache_keys, ttl};

pub mod clients;
pub mod invoices;
pub mod orders;
pub mod payments;
pub mod reporting;

pub use clients::client_routes;
pub use invoices::invoice_routes;
pub use orders::order_routes;
pub use payments::payment_routes;
pub use reporting::reporting_routes;

/// Drop the reporting and dashboard caches after a billing mutation.
/// Best-effort: the cache is an optimization, never a correctness dependency.
pub(crate) async fn invalidate_reporting_caches(state: &AppState) {
    if let Err(err) = state
        .cache
        .invalidate_pattern(&cache_keys::reporting_pattern())
        .await
    {
        warn!("Failed to invalidate reporting caches: {}", err);
    }
    if let Err(err) = state.cache.delete(&cache_keys::dashboard_stats()).await {
        warn!("Failed to invalidate dashboard cache: {}", err);
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let database_ok = database::health_check(&state.db_pool).await;
    let pool = database::get_pool_stats(&state.db_pool);

    Json(json!({
        "status": if database_ok { "ok" } else { "degraded" },
        "database": database_ok,
        "pool": pool,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// Headline numbers for the landing dashboard.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct DashboardStats {
    pub total_clients: i64,
    pub active_orders: i64,
    /// Payments received in the current calendar month.
    pub monthly_revenue: Decimal,
    /// Sum of SENT + OVERDUE invoice amounts.
    pub outstanding_amount: Decimal,
    pub overdue_invoices: i64,
    pub draft_invoices: i64,
}

pub async fn dashboard_stats(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DashboardStats>> {
    let key = cache_keys::dashboard_stats();
    if let Ok(Some(cached)) = state.cache.get::<DashboardStats>(&key).await {
        return Ok(Json(cached));
    }

    let today = Utc::now().date_naive();
    let month_start = today.with_day(1).unwrap_or(today);

    let stats = sqlx::query_as::<_, DashboardStats>(
        "SELECT
            (SELECT COUNT(*) FROM clients) AS total_clients,
            (SELECT COUNT(*) FROM orders WHERE status = 'active') AS active_orders,
            (SELECT COALESCE(SUM(amount), 0) FROM payments
                WHERE paid_date >= $1) AS monthly_revenue,
            (SELECT COALESCE(SUM(amount), 0) FROM invoices
                WHERE status IN ('sent', 'overdue')) AS outstanding_amount,
            (SELECT COUNT(*) FROM invoices WHERE status = 'overdue') AS overdue_invoices,
            (SELECT COUNT(*) FROM invoices WHERE status = 'draft') AS draft_invoices",
    )
    .bind(month_start)
    .fetch_one(&state.db_pool)
    .await?;

    if let Err(err) = state.cache.set(&key, &stats, ttl::DASHBOARD).await {
        warn!("Failed to cache dashboard stats: {}", err);
    }

    Ok(Json(stats))
}
