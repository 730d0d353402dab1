use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::get,
};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::clients::ensure_client_exists;
use crate::services::cache::{cache_keys, ttl};

/// One month's worth of received payments.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct MonthlyRevenue {
    /// `YYYY-MM`
    pub month: String,
    pub revenue: Decimal,
    pub payment_count: i64,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct TopClient {
    pub client_id: Uuid,
    pub name: String,
    pub total_revenue: Decimal,
    pub invoice_count: i64,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientStats {
    pub order_count: i64,
    pub invoice_count: i64,
    pub payment_count: i64,
    pub total_revenue: Decimal,
    pub outstanding_amount: Decimal,
    pub last_order_at: Option<DateTime<Utc>>,
}

pub fn reporting_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/revenue/monthly", get(revenue_by_month))
        .route("/clients/top", get(top_clients))
        .route("/clients/:id", get(client_stats))
}

/// Revenue bucketed by payment month over a trailing 12-month window.
/// Months with no payments appear with zero revenue so charts stay aligned.
async fn revenue_by_month(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<MonthlyRevenue>>> {
    let key = cache_keys::revenue_by_month();
    if let Ok(Some(cached)) = state.cache.get::<Vec<MonthlyRevenue>>(&key).await {
        return Ok(Json(cached));
    }

    let today = Utc::now().date_naive();
    let window_start = month_start(today)
        .checked_sub_months(Months::new(11))
        .ok_or_else(|| ApiError::internal("Date arithmetic overflow in revenue window"))?;

    let rows = sqlx::query_as::<_, MonthlyRevenue>(
        "SELECT to_char(date_trunc('month', paid_date), 'YYYY-MM') AS month,
                COALESCE(SUM(amount), 0) AS revenue,
                COUNT(*) AS payment_count
         FROM payments
         WHERE paid_date >= $1
         GROUP BY 1
         ORDER BY 1",
    )
    .bind(window_start)
    .fetch_all(&state.db_pool)
    .await?;

    let mut by_month: HashMap<String, MonthlyRevenue> =
        rows.into_iter().map(|r| (r.month.clone(), r)).collect();

    let mut series = Vec::with_capacity(12);
    let mut cursor = window_start;
    for _ in 0..12 {
        let label = format!("{:04}-{:02}", cursor.year(), cursor.month());
        series.push(by_month.remove(&label).unwrap_or(MonthlyRevenue {
            month: label,
            revenue: Decimal::ZERO,
            payment_count: 0,
        }));
        cursor = cursor
            .checked_add_months(Months::new(1))
            .ok_or_else(|| ApiError::internal("Date arithmetic overflow in revenue window"))?;
    }

    if let Err(err) = state.cache.set(&key, &series, ttl::REPORTING).await {
        warn!("Failed to cache monthly revenue: {}", err);
    }

    Ok(Json(series))
}

/// Top 10 clients by lifetime received revenue.
async fn top_clients(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<TopClient>>> {
    let key = cache_keys::top_clients();
    if let Ok(Some(cached)) = state.cache.get::<Vec<TopClient>>(&key).await {
        return Ok(Json(cached));
    }

    let clients = sqlx::query_as::<_, TopClient>(
        "SELECT c.id AS client_id,
                c.name,
                COALESCE(SUM(p.amount), 0) AS total_revenue,
                COUNT(DISTINCT i.id) AS invoice_count
         FROM clients c
         JOIN invoices i ON i.client_id = c.id
         JOIN payments p ON p.invoice_id = i.id
         GROUP BY c.id, c.name
         ORDER BY total_revenue DESC
         LIMIT 10",
    )
    .fetch_all(&state.db_pool)
    .await?;

    if let Err(err) = state.cache.set(&key, &clients, ttl::REPORTING).await {
        warn!("Failed to cache top clients: {}", err);
    }

    Ok(Json(clients))
}

async fn client_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ClientStats>> {
    ensure_client_exists(&state, id).await?;

    let key = cache_keys::client_stats(id);
    if let Ok(Some(cached)) = state.cache.get::<ClientStats>(&key).await {
        return Ok(Json(cached));
    }

    let stats = sqlx::query_as::<_, ClientStats>(
        "SELECT
            (SELECT COUNT(*) FROM orders WHERE client_id = $1) AS order_count,
            (SELECT COUNT(*) FROM invoices WHERE client_id = $1) AS invoice_count,
            (SELECT COUNT(*) FROM payments p
                JOIN invoices i ON i.id = p.invoice_id
                WHERE i.client_id = $1) AS payment_count,
            (SELECT COALESCE(SUM(p.amount), 0) FROM payments p
                JOIN invoices i ON i.id = p.invoice_id
                WHERE i.client_id = $1) AS total_revenue,
            (SELECT COALESCE(SUM(amount), 0) FROM invoices
                WHERE client_id = $1 AND status IN ('sent', 'overdue')) AS outstanding_amount,
            (SELECT MAX(created_at) FROM orders WHERE client_id = $1) AS last_order_at",
    )
    .bind(id)
    .fetch_one(&state.db_pool)
    .await?;

    if let Err(err) = state.cache.set(&key, &stats, ttl::REPORTING).await {
        warn!("Failed to cache client stats: {}", err);
    }

    Ok(Json(stats))
}

fn month_start(date: NaiveDate) -> NaiveDate {
    // Day 1 always exists.
    date.with_day(1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_start_truncates_the_day() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 30).unwrap();
        assert_eq!(month_start(date), NaiveDate::from_ymd_opt(2025, 8, 1).unwrap());
    }

    #[test]
    fn trailing_window_spans_twelve_months() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 30).unwrap();
        let start = month_start(today)
            .checked_sub_months(Months::new(11))
            .unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 9, 1).unwrap());
    }
}
