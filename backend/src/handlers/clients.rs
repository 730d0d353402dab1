use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use billcycle_shared::{Client, Invoice, Order};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::AppState;
use crate::error::{ApiError, ApiResult, ValidationBuilder};
use crate::pagination::{PaginatedResponse, PaginationParams, QueryBuilder, SearchParams};

const CLIENT_COLUMNS: &str =
    "id, name, email, company, phone, address, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct ClientCreate {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientListParams {
    #[serde(flatten)]
    pub pagination: PaginationParams,
    #[serde(flatten)]
    pub search: SearchParams,
}

pub fn client_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_clients).post(create_client))
        .route(
            "/:id",
            get(get_client).put(update_client).delete(delete_client),
        )
        .route("/:id/orders", get(get_client_orders))
        .route("/:id/invoices", get(get_client_invoices))
}

async fn list_clients(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ClientListParams>,
) -> ApiResult<Json<PaginatedResponse<Client>>> {
    let mut qb = QueryBuilder::new();
    let pattern = params.search.search_pattern();
    if pattern.is_some() {
        qb.add_condition("(name ILIKE {} OR email ILIKE {} OR company ILIKE {})");
    }
    let where_clause = qb.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM clients {}", where_clause);
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    if let Some(p) = &pattern {
        count_query = count_query.bind(p);
    }
    let total = count_query.fetch_one(&state.db_pool).await?;

    let sort_field = params
        .pagination
        .validated_sort_field(&["name", "email", "created_at"], "name");
    let list_sql = format!(
        "SELECT {} FROM clients {} ORDER BY {} {} LIMIT {} OFFSET {}",
        CLIENT_COLUMNS,
        where_clause,
        sort_field,
        params.pagination.sort_direction(),
        params.pagination.limit(),
        params.pagination.offset(),
    );
    let mut list_query = sqlx::query_as::<_, Client>(&list_sql);
    if let Some(p) = &pattern {
        list_query = list_query.bind(p);
    }
    let clients = list_query.fetch_all(&state.db_pool).await?;

    Ok(Json(PaginatedResponse::new(
        clients,
        &params.pagination,
        total,
    )))
}

async fn create_client(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ClientCreate>,
) -> ApiResult<(StatusCode, Json<Client>)> {
    validate_contact(&payload.name, &payload.email)?;

    let client = sqlx::query_as::<_, Client>(&format!(
        "INSERT INTO clients (id, name, email, company, phone, address, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW())
         RETURNING {}",
        CLIENT_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(payload.name.trim())
    .bind(payload.email.trim())
    .bind(&payload.company)
    .bind(&payload.phone)
    .bind(&payload.address)
    .fetch_one(&state.db_pool)
    .await?;

    Ok((StatusCode::CREATED, Json(client)))
}

async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Client>> {
    let client = sqlx::query_as::<_, Client>(&format!(
        "SELECT {} FROM clients WHERE id = $1",
        CLIENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Client"))?;

    Ok(Json(client))
}

async fn update_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ClientUpdate>,
) -> ApiResult<Json<Client>> {
    let mut validation = ValidationBuilder::new();
    if payload.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
        validation = validation.error("name", "Name cannot be empty");
    }
    if let Some(email) = payload.email.as_deref() {
        if !email.contains('@') {
            validation = validation.error("email", "Email address is invalid");
        }
    }
    if let Some(err) = validation.build() {
        return Err(err);
    }

    let client = sqlx::query_as::<_, Client>(&format!(
        "UPDATE clients
         SET name = COALESCE($2, name),
             email = COALESCE($3, email),
             company = COALESCE($4, company),
             phone = COALESCE($5, phone),
             address = COALESCE($6, address),
             updated_at = NOW()
         WHERE id = $1
         RETURNING {}",
        CLIENT_COLUMNS
    ))
    .bind(id)
    .bind(payload.name.as_deref().map(str::trim))
    .bind(payload.email.as_deref().map(str::trim))
    .bind(&payload.company)
    .bind(&payload.phone)
    .bind(&payload.address)
    .fetch_optional(&state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Client"))?;

    Ok(Json(client))
}

/// Clients with orders cannot be deleted; their history must stay intact.
async fn delete_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let order_count =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders WHERE client_id = $1")
            .bind(id)
            .fetch_one(&state.db_pool)
            .await?;

    if order_count > 0 {
        return Err(ApiError::state_conflict(format!(
            "Client has {} orders and cannot be deleted",
            order_count
        )));
    }

    let result = sqlx::query("DELETE FROM clients WHERE id = $1")
        .bind(id)
        .execute(&state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Client"));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn get_client_orders(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Order>>> {
    ensure_client_exists(&state, id).await?;

    let orders = sqlx::query_as::<_, Order>(
        "SELECT id, client_id, description, amount, frequency, custom_days,
                start_date, next_invoice_date, lead_time_days, status,
                created_at, updated_at
         FROM orders WHERE client_id = $1
         ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(orders))
}

async fn get_client_invoices(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Invoice>>> {
    ensure_client_exists(&state, id).await?;

    let invoices = sqlx::query_as::<_, Invoice>(
        "SELECT id, client_id, company_id, order_id, invoice_number, amount, currency,
                issue_date, due_date, status, paid_date, notes, created_at, updated_at
         FROM invoices WHERE client_id = $1
         ORDER BY issue_date DESC",
    )
    .bind(id)
    .fetch_all(&state.db_pool)
    .await?;

    Ok(Json(invoices))
}

pub(crate) async fn ensure_client_exists(state: &AppState, id: Uuid) -> ApiResult<()> {
    let exists =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM clients WHERE id = $1)")
            .bind(id)
            .fetch_one(&state.db_pool)
            .await?;

    if exists {
        Ok(())
    } else {
        Err(ApiError::not_found("Client"))
    }
}

fn validate_contact(name: &str, email: &str) -> ApiResult<()> {
    let mut validation = ValidationBuilder::new();
    if name.trim().is_empty() {
        validation = validation.error("name", "Name is required");
    }
    if email.trim().is_empty() {
        validation = validation.error("email", "Email is required");
    } else if !email.contains('@') {
        validation = validation.error("email", "Email address is invalid");
    }
    match validation.build() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn contact_validation_collects_field_errors() {
        let err = validate_contact("", "not-an-email").unwrap_err();
        match err {
            AppError::ValidationError { details } => {
                assert!(details.contains_key("name"));
                assert!(details.contains_key("email"));
            }
            other => panic!("expected ValidationError, got {:?}", other),
        }

        assert!(validate_contact("Acme Corp", "billing@acme.example").is_ok());
    }
}
