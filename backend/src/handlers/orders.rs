use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use billcycle_shared::{Frequency, Order, OrderStatus};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult, validation_error};
use crate::handlers::clients::ensure_client_exists;
use crate::pagination::{OrderListParams, PaginatedResponse, QueryBuilder};
use crate::services::{invoicing, schedule};

const ORDER_COLUMNS: &str = "id, client_id, description, amount, frequency, custom_days, \
     start_date, next_invoice_date, lead_time_days, status, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct OrderCreate {
    pub client_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub frequency: Frequency,
    pub custom_days: Option<i32>,
    pub start_date: NaiveDate,
    pub lead_time_days: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderUpdate {
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub frequency: Option<Frequency>,
    pub custom_days: Option<i32>,
    pub start_date: Option<NaiveDate>,
    /// Absent keeps the current lead time; an explicit null clears it back
    /// to the configured default.
    #[serde(default, deserialize_with = "crate::pagination::patch_field")]
    pub lead_time_days: Option<Option<i32>>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleParams {
    pub count: Option<usize>,
}

/// Projected billing schedule plus the annualized revenue estimate.
#[derive(Debug, Serialize)]
pub struct SchedulePreview {
    pub order_id: Uuid,
    pub upcoming_dates: Vec<NaiveDate>,
    pub estimated_annual_revenue: Decimal,
}

pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route(
            "/:id",
            get(get_order).put(update_order).delete(delete_order),
        )
        .route("/:id/schedule", get(get_order_schedule))
        .route("/sweep/generate", post(run_generation_sweep))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(params): Query<OrderListParams>,
) -> ApiResult<Json<PaginatedResponse<Order>>> {
    let today = Utc::now().date_naive();

    let mut qb = QueryBuilder::new();
    let pattern = params.search.search_pattern();
    if pattern.is_some() {
        qb.add_condition("description ILIKE {}");
    }
    if params.client_id.is_some() {
        qb.add_condition("client_id = {}");
    }
    if params.status.is_some() {
        qb.add_condition("status = {}");
    }
    if params.frequency.is_some() {
        qb.add_condition("frequency = {}");
    }
    if params.due_only {
        qb.add_condition("status = 'active' AND next_invoice_date <= {}");
    }
    let where_clause = qb.where_clause();

    macro_rules! bind_filters {
        ($query:expr) => {{
            let mut q = $query;
            if let Some(p) = &pattern {
                q = q.bind(p);
            }
            if let Some(client_id) = params.client_id {
                q = q.bind(client_id);
            }
            if let Some(status) = params.status {
                q = q.bind(status);
            }
            if let Some(frequency) = params.frequency {
                q = q.bind(frequency);
            }
            if params.due_only {
                q = q.bind(today);
            }
            q
        }};
    }

    let count_sql = format!("SELECT COUNT(*) FROM orders {}", where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(&state.db_pool)
        .await?;

    let sort_field = params.pagination.validated_sort_field(
        &["next_invoice_date", "start_date", "amount", "created_at"],
        "next_invoice_date",
    );
    let list_sql = format!(
        "SELECT {} FROM orders {} ORDER BY {} {} LIMIT {} OFFSET {}",
        ORDER_COLUMNS,
        where_clause,
        sort_field,
        params.pagination.sort_direction(),
        params.pagination.limit(),
        params.pagination.offset(),
    );
    let orders = bind_filters!(sqlx::query_as::<_, Order>(&list_sql))
        .fetch_all(&state.db_pool)
        .await?;

    Ok(Json(PaginatedResponse::new(
        orders,
        &params.pagination,
        total,
    )))
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<OrderCreate>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let today = Utc::now().date_naive();

    if payload.description.trim().is_empty() {
        return Err(validation_error("description", "Description is required"));
    }
    if payload.amount <= Decimal::ZERO {
        return Err(validation_error("amount", "Amount must be positive"));
    }
    if payload.start_date < today {
        return Err(validation_error(
            "start_date",
            "Start date cannot be in the past",
        ));
    }
    schedule::validate_frequency(payload.frequency, payload.custom_days)?;
    ensure_client_exists(&state, payload.client_id).await?;

    // First invoice lands one period after the start date.
    let next_invoice_date =
        schedule::next_invoice_date(payload.start_date, payload.frequency, payload.custom_days)?;

    let order = sqlx::query_as::<_, Order>(&format!(
        "INSERT INTO orders
            (id, client_id, description, amount, frequency, custom_days,
             start_date, next_invoice_date, lead_time_days, status, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'active', NOW())
         RETURNING {}",
        ORDER_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(payload.client_id)
    .bind(payload.description.trim())
    .bind(payload.amount)
    .bind(payload.frequency)
    .bind(payload.custom_days)
    .bind(payload.start_date)
    .bind(next_invoice_date)
    .bind(payload.lead_time_days)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Order>> {
    Ok(Json(fetch_order(&state, id).await?))
}

/// Update an order. `next_invoice_date` is never user-settable; it is
/// recomputed from the start date only when the billing rhythm itself
/// (frequency, custom_days, or start_date) changes.
async fn update_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OrderUpdate>,
) -> ApiResult<Json<Order>> {
    let existing = fetch_order(&state, id).await?;

    if let Some(amount) = payload.amount {
        if amount <= Decimal::ZERO {
            return Err(validation_error("amount", "Amount must be positive"));
        }
    }
    if payload
        .description
        .as_deref()
        .is_some_and(|d| d.trim().is_empty())
    {
        return Err(validation_error("description", "Description cannot be empty"));
    }

    let status = match payload.status {
        Some(next) if next != existing.status => {
            if !existing.status.can_transition(next) {
                return Err(ApiError::state_conflict(format!(
                    "Order cannot move from {} to {}",
                    existing.status, next
                )));
            }
            next
        }
        _ => existing.status,
    };

    let frequency = payload.frequency.unwrap_or(existing.frequency);
    let custom_days = match (frequency, payload.custom_days) {
        (_, Some(days)) => Some(days),
        (Frequency::Custom, None) => existing.custom_days,
        (_, None) => None,
    };
    schedule::validate_frequency(frequency, custom_days)?;

    let start_date = payload.start_date.unwrap_or(existing.start_date);
    let lead_time_days = payload.lead_time_days.unwrap_or(existing.lead_time_days);

    let rhythm_changed = frequency != existing.frequency
        || custom_days != existing.custom_days
        || start_date != existing.start_date;
    let next_invoice_date = if rhythm_changed {
        schedule::next_invoice_date(start_date, frequency, custom_days)?
    } else {
        existing.next_invoice_date
    };

    let order = sqlx::query_as::<_, Order>(&format!(
        "UPDATE orders
         SET description = COALESCE($2, description),
             amount = COALESCE($3, amount),
             frequency = $4,
             custom_days = $5,
             start_date = $6,
             next_invoice_date = $7,
             lead_time_days = $8,
             status = $9,
             updated_at = NOW()
         WHERE id = $1
         RETURNING {}",
        ORDER_COLUMNS
    ))
    .bind(id)
    .bind(payload.description.as_deref().map(str::trim))
    .bind(payload.amount)
    .bind(frequency)
    .bind(custom_days)
    .bind(start_date)
    .bind(next_invoice_date)
    .bind(lead_time_days)
    .bind(status)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(Json(order))
}

/// Orders that have already produced invoices are cancelled via the status
/// field, never hard-deleted.
async fn delete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let invoice_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM invoices WHERE order_id = $1")
            .bind(id)
            .fetch_one(&state.db_pool)
            .await?;

    if invoice_count > 0 {
        return Err(ApiError::state_conflict(format!(
            "Order has {} invoices; set status to CANCELLED instead of deleting",
            invoice_count
        )));
    }

    let result = sqlx::query("DELETE FROM orders WHERE id = $1")
        .bind(id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Order"));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn get_order_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<ScheduleParams>,
) -> ApiResult<Json<SchedulePreview>> {
    let order = fetch_order(&state, id).await?;
    let count = params.count.unwrap_or(6);
    if !(1..=24).contains(&count) {
        return Err(ApiError::bad_request("count must be between 1 and 24"));
    }

    // Project forward from the last scheduled date, not from today, so the
    // preview lines up with what the sweep will actually generate.
    let upcoming_dates = schedule::invoice_schedule(
        order.next_invoice_date,
        order.frequency,
        count - 1,
        order.custom_days,
    )?;
    let mut dates = Vec::with_capacity(count);
    dates.push(order.next_invoice_date);
    dates.extend(upcoming_dates);

    let estimated_annual_revenue =
        schedule::estimated_annual_revenue(order.amount, order.frequency, order.custom_days)?;

    Ok(Json(SchedulePreview {
        order_id: order.id,
        upcoming_dates: dates,
        estimated_annual_revenue,
    }))
}

async fn run_generation_sweep(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<invoicing::SweepReport>> {
    let today = Utc::now().date_naive();
    let report = invoicing::generate_invoices_for_due_orders(
        &state.db_pool,
        today,
        state.default_lead_time_days,
    )
    .await?;
    Ok(Json(report))
}

async fn fetch_order(state: &AppState, id: Uuid) -> ApiResult<Order> {
    sqlx::query_as::<_, Order>(&format!(
        "SELECT {} FROM orders WHERE id = $1",
        ORDER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Order"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_update_lead_time_distinguishes_absent_from_null() {
        let absent: OrderUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.lead_time_days, None);

        let cleared: OrderUpdate = serde_json::from_str(r#"{"lead_time_days": null}"#).unwrap();
        assert_eq!(cleared.lead_time_days, Some(None));

        let set: OrderUpdate = serde_json::from_str(r#"{"lead_time_days": 45}"#).unwrap();
        assert_eq!(set.lead_time_days, Some(Some(45)));
    }
}
