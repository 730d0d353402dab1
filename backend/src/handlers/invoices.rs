use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
};
use billcycle_shared::{Invoice, InvoiceStatus};
use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult, AppError, is_unique_violation, validation_error};
use crate::handlers::clients::ensure_client_exists;
use crate::pagination::{InvoiceListParams, PaginatedResponse, QueryBuilder};
use crate::services::cache::{cache_keys, ttl};
use crate::services::invoicing::{
    self, InvoiceStatistics, invoice_due_date, issue_invoice_number,
};
use crate::services::payments::check_status_against_payments;

const INVOICE_COLUMNS: &str = "id, client_id, company_id, order_id, invoice_number, amount, \
     currency, issue_date, due_date, status, paid_date, notes, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct InvoiceCreate {
    pub client_id: Uuid,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceUpdate {
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: InvoiceStatus,
}

pub fn invoice_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/stats", get(invoice_stats))
        .route("/overdue", get(list_overdue))
        .route("/sweep/overdue", post(run_overdue_sweep))
        .route("/from-order/:order_id", post(generate_from_order))
        .route(
            "/:id",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
        .route("/:id/status", patch(change_status))
}

async fn list_invoices(
    State(state): State<Arc<AppState>>,
    Query(params): Query<InvoiceListParams>,
) -> ApiResult<Json<PaginatedResponse<Invoice>>> {
    let today = Utc::now().date_naive();

    let mut qb = QueryBuilder::new();
    let pattern = params.search.search_pattern();
    if pattern.is_some() {
        qb.add_condition("(i.invoice_number ILIKE {} OR c.name ILIKE {} OR i.notes ILIKE {})");
    }
    if params.client_id.is_some() {
        qb.add_condition("i.client_id = {}");
    }
    if params.order_id.is_some() {
        qb.add_condition("i.order_id = {}");
    }
    if params.status.is_some() {
        qb.add_condition("i.status = {}");
    }
    if params.search.from_date.is_some() {
        qb.add_condition("i.issue_date >= {}");
    }
    if params.search.to_date.is_some() {
        qb.add_condition("i.issue_date <= {}");
    }
    if params.overdue_only {
        qb.add_condition("(i.status = 'overdue' OR (i.status = 'sent' AND i.due_date < {}))");
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
            if let Some(order_id) = params.order_id {
                q = q.bind(order_id);
            }
            if let Some(status) = params.status {
                q = q.bind(status);
            }
            if let Some(from) = params.search.from_date {
                q = q.bind(from);
            }
            if let Some(to) = params.search.to_date {
                q = q.bind(to);
            }
            if params.overdue_only {
                q = q.bind(today);
            }
            q
        }};
    }

    let count_sql = format!(
        "SELECT COUNT(*) FROM invoices i JOIN clients c ON c.id = i.client_id {}",
        where_clause
    );
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(&state.db_pool)
        .await?;

    let sort_field = params.pagination.validated_sort_field(
        &["issue_date", "due_date", "amount", "invoice_number", "created_at"],
        "issue_date",
    );
    let columns = invoice_columns_qualified();
    let list_sql = format!(
        "SELECT {} FROM invoices i JOIN clients c ON c.id = i.client_id {}
         ORDER BY i.{} {} LIMIT {} OFFSET {}",
        columns,
        where_clause,
        sort_field,
        params.pagination.sort_direction(),
        params.pagination.limit(),
        params.pagination.offset(),
    );
    let invoices = bind_filters!(sqlx::query_as::<_, Invoice>(&list_sql))
        .fetch_all(&state.db_pool)
        .await?;

    Ok(Json(PaginatedResponse::new(
        invoices,
        &params.pagination,
        total,
    )))
}

/// Manually create a DRAFT invoice (not tied to an order). The number is
/// allocated like generated ones, with the same collision retry.
async fn create_invoice(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InvoiceCreate>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let today = Utc::now().date_naive();

    if payload.amount <= Decimal::ZERO {
        return Err(validation_error("amount", "Amount must be positive"));
    }
    ensure_client_exists(&state, payload.client_id).await?;

    let issue_date = payload.issue_date.unwrap_or(today);
    let due_date = payload
        .due_date
        .unwrap_or_else(|| invoice_due_date(issue_date, None, state.default_lead_time_days));
    if due_date < issue_date {
        return Err(validation_error(
            "due_date",
            "Due date cannot be before the issue date",
        ));
    }

    for _attempt in 0..3 {
        let mut tx = state.db_pool.begin().await?;
        let invoice_number = issue_invoice_number(&mut tx, issue_date.year()).await?;

        let inserted = sqlx::query_as::<_, Invoice>(&format!(
            "INSERT INTO invoices
                (id, client_id, company_id, order_id, invoice_number, amount,
                 currency, issue_date, due_date, status, notes, created_at)
             VALUES ($1, $2, NULL, NULL, $3, $4, $5, $6, $7, 'draft', $8, NOW())
             RETURNING {}",
            INVOICE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(payload.client_id)
        .bind(&invoice_number)
        .bind(payload.amount)
        .bind(payload.currency.as_deref().unwrap_or("USD"))
        .bind(issue_date)
        .bind(due_date)
        .bind(&payload.notes)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(invoice) => {
                tx.commit().await?;
                return Ok((StatusCode::CREATED, Json(invoice)));
            }
            Err(err) if is_unique_violation(&err) => {
                warn!("Invoice number {} collided, retrying", invoice_number);
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::InvoiceNumberCollision)
}

async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    Ok(Json(fetch_invoice(&state, id).await?))
}

/// Monetary and date fields are frozen once the invoice leaves DRAFT; only
/// notes stay editable.
async fn update_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<InvoiceUpdate>,
) -> ApiResult<Json<Invoice>> {
    let existing = fetch_invoice(&state, id).await?;

    let touches_frozen_fields = payload.amount.is_some()
        || payload.currency.is_some()
        || payload.issue_date.is_some()
        || payload.due_date.is_some();
    if existing.status != InvoiceStatus::Draft && touches_frozen_fields {
        return Err(ApiError::state_conflict(format!(
            "Invoice is {} and only its notes can be edited",
            existing.status
        )));
    }
    if let Some(amount) = payload.amount {
        if amount <= Decimal::ZERO {
            return Err(validation_error("amount", "Amount must be positive"));
        }
    }

    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "UPDATE invoices
         SET amount = COALESCE($2, amount),
             currency = COALESCE($3, currency),
             issue_date = COALESCE($4, issue_date),
             due_date = COALESCE($5, due_date),
             notes = COALESCE($6, notes),
             updated_at = NOW()
         WHERE id = $1
         RETURNING {}",
        INVOICE_COLUMNS
    ))
    .bind(id)
    .bind(payload.amount)
    .bind(payload.currency)
    .bind(payload.issue_date)
    .bind(payload.due_date)
    .bind(payload.notes)
    .fetch_one(&state.db_pool)
    .await?;

    Ok(Json(invoice))
}

/// Explicit status transitions, checked against the lifecycle state machine
/// and against the recorded payments: the invoice is PAID exactly when its
/// payments cover the amount, so PAID cannot be set (or left) by hand while
/// the payments say otherwise.
async fn change_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusChange>,
) -> ApiResult<Json<Invoice>> {
    let existing = fetch_invoice(&state, id).await?;
    let next = payload.status;

    if next == existing.status {
        return Ok(Json(existing));
    }
    if !existing.status.can_transition(next) {
        return Err(ApiError::state_conflict(format!(
            "Invoice cannot move from {} to {}",
            existing.status, next
        )));
    }

    let (paid_total, latest_paid_date) = sqlx::query_as::<_, (Decimal, Option<NaiveDate>)>(
        "SELECT COALESCE(SUM(amount), 0), MAX(paid_date)
         FROM payments WHERE invoice_id = $1",
    )
    .bind(id)
    .fetch_one(&state.db_pool)
    .await?;
    check_status_against_payments(next, existing.amount, paid_total)?;

    let paid_date = if next == InvoiceStatus::Paid {
        latest_paid_date.or_else(|| Some(Utc::now().date_naive()))
    } else {
        None
    };

    let invoice = sqlx::query_as::<_, Invoice>(&format!(
        "UPDATE invoices SET status = $2, paid_date = $3, updated_at = NOW()
         WHERE id = $1
         RETURNING {}",
        INVOICE_COLUMNS
    ))
    .bind(id)
    .bind(next)
    .bind(paid_date)
    .fetch_one(&state.db_pool)
    .await?;

    crate::handlers::invalidate_reporting_caches(&state).await;
    Ok(Json(invoice))
}

/// Only DRAFT invoices with no payments can be deleted.
async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let existing = fetch_invoice(&state, id).await?;

    if existing.status != InvoiceStatus::Draft {
        return Err(ApiError::state_conflict(format!(
            "Invoice is {}; only DRAFT invoices can be deleted",
            existing.status
        )));
    }

    let payment_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments WHERE invoice_id = $1")
            .bind(id)
            .fetch_one(&state.db_pool)
            .await?;
    if payment_count > 0 {
        return Err(ApiError::state_conflict(
            "Invoice has recorded payments and cannot be deleted",
        ));
    }

    sqlx::query("DELETE FROM invoices WHERE id = $1")
        .bind(id)
        .execute(&state.db_pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

async fn generate_from_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let today = Utc::now().date_naive();
    let invoice = invoicing::generate_invoice_from_order(
        &state.db_pool,
        order_id,
        today,
        state.default_lead_time_days,
    )
    .await?;
    crate::handlers::invalidate_reporting_caches(&state).await;
    Ok((StatusCode::CREATED, Json(invoice)))
}

async fn invoice_stats(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<InvoiceStatistics>> {
    let key = cache_keys::invoice_stats();
    if let Ok(Some(stats)) = state.cache.get::<InvoiceStatistics>(&key).await {
        return Ok(Json(stats));
    }

    let stats = invoicing::invoice_statistics(&state.db_pool).await?;
    if let Err(err) = state.cache.set(&key, &stats, ttl::REPORTING).await {
        warn!("Failed to cache invoice statistics: {}", err);
    }

    Ok(Json(stats))
}

async fn list_overdue(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Invoice>>> {
    let today = Utc::now().date_naive();

    let invoices = sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices
         WHERE status = 'overdue' OR (status = 'sent' AND due_date < $1)
         ORDER BY due_date ASC",
        INVOICE_COLUMNS
    ))
    .bind(today)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(invoices))
}

async fn run_overdue_sweep(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let today = Utc::now().date_naive();
    let marked = invoicing::mark_overdue_invoices(&state.db_pool, today).await?;
    Ok(Json(serde_json::json!({ "marked_overdue": marked })))
}

fn invoice_columns_qualified() -> String {
    INVOICE_COLUMNS
        .split(", ")
        .map(|col| format!("i.{}", col.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

async fn fetch_invoice(state: &AppState, id: Uuid) -> ApiResult<Invoice> {
    sqlx::query_as::<_, Invoice>(&format!(
        "SELECT {} FROM invoices WHERE id = $1",
        INVOICE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Invoice"))
}
