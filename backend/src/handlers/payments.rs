use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use billcycle_shared::{Payment, PaymentMethod};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::pagination::{PaginatedResponse, PaymentListParams, QueryBuilder};
use crate::services::payments::{self, PaymentDeletion, PaymentInput, PaymentUpdate};

const PAYMENT_COLUMNS: &str =
    "id, invoice_id, amount, method, paid_date, notes, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct PaymentCreate {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

pub fn payment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_payments).post(record_payment))
        .route(
            "/:id",
            get(get_payment).put(update_payment).delete(delete_payment),
        )
}

async fn list_payments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaymentListParams>,
) -> ApiResult<Json<PaginatedResponse<Payment>>> {
    let mut qb = QueryBuilder::new();
    let pattern = params.search.search_pattern();
    if pattern.is_some() {
        qb.add_condition("(i.invoice_number ILIKE {} OR c.name ILIKE {} OR p.notes ILIKE {})");
    }
    if params.client_id.is_some() {
        qb.add_condition("i.client_id = {}");
    }
    if params.invoice_id.is_some() {
        qb.add_condition("p.invoice_id = {}");
    }
    if params.method.is_some() {
        qb.add_condition("p.method = {}");
    }
    if params.search.from_date.is_some() {
        qb.add_condition("p.paid_date >= {}");
    }
    if params.search.to_date.is_some() {
        qb.add_condition("p.paid_date <= {}");
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
            if let Some(invoice_id) = params.invoice_id {
                q = q.bind(invoice_id);
            }
            if let Some(method) = params.method {
                q = q.bind(method);
            }
            if let Some(from) = params.search.from_date {
                q = q.bind(from);
            }
            if let Some(to) = params.search.to_date {
                q = q.bind(to);
            }
            q
        }};
    }

    let joins = "FROM payments p
         JOIN invoices i ON i.id = p.invoice_id
         JOIN clients c ON c.id = i.client_id";

    let count_sql = format!("SELECT COUNT(*) {} {}", joins, where_clause);
    let total = bind_filters!(sqlx::query_scalar::<_, i64>(&count_sql))
        .fetch_one(&state.db_pool)
        .await?;

    let sort_field = params
        .pagination
        .validated_sort_field(&["paid_date", "amount", "created_at"], "paid_date");
    let columns = PAYMENT_COLUMNS
        .split(", ")
        .map(|col| format!("p.{}", col))
        .collect::<Vec<_>>()
        .join(", ");
    let list_sql = format!(
        "SELECT {} {} {} ORDER BY p.{} {} LIMIT {} OFFSET {}",
        columns,
        joins,
        where_clause,
        sort_field,
        params.pagination.sort_direction(),
        params.pagination.limit(),
        params.pagination.offset(),
    );
    let rows = bind_filters!(sqlx::query_as::<_, Payment>(&list_sql))
        .fetch_all(&state.db_pool)
        .await?;

    Ok(Json(PaginatedResponse::new(rows, &params.pagination, total)))
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentCreate>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let today = Utc::now().date_naive();
    let input = PaymentInput {
        amount: payload.amount,
        method: payload.method,
        paid_date: payload.paid_date,
        notes: payload.notes,
    };

    let payment =
        payments::record_payment(&state.db_pool, payload.invoice_id, input, today).await?;
    crate::handlers::invalidate_reporting_caches(&state).await;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    let payment = sqlx::query_as::<_, Payment>(&format!(
        "SELECT {} FROM payments WHERE id = $1",
        PAYMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Payment"))?;

    Ok(Json(payment))
}

async fn update_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PaymentUpdate>,
) -> ApiResult<Json<Payment>> {
    let payment = payments::update_payment(&state.db_pool, id, payload).await?;
    crate::handlers::invalidate_reporting_caches(&state).await;
    Ok(Json(payment))
}

async fn delete_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PaymentDeletion>> {
    let outcome = payments::delete_payment(&state.db_pool, id).await?;
    crate::handlers::invalidate_reporting_caches(&state).await;
    Ok(Json(outcome))
}
