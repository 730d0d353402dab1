//! Invoice numbering, due dates, and the invoice-generation lifecycle.
//!
//! Invoice creation and the order's next-date advance happen in one
//! transaction with the order row locked, so a crash or a concurrent request
//! can never observe an invoice without the matching date advance. Invoice
//! numbers are allocated inside the same transaction; the UNIQUE constraint
//! on `invoice_number` is the backstop and the whole transaction is retried
//! on a collision.

use billcycle_shared::{Invoice, InvoiceStatus, Order, OrderStatus};
use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, AppError, is_unique_violation};
use crate::services::schedule;

/// Prefix for every generated invoice number.
pub const INVOICE_NUMBER_PREFIX: &str = "INV";
/// Last-resort due-date offset when the configured default is unusable.
pub const DEFAULT_LEAD_TIME_DAYS: i64 = 30;

const NUMBER_ALLOCATION_ATTEMPTS: u32 = 3;

/// Next year-scoped invoice number given the current largest one.
///
/// `INV-2025-000041` becomes `INV-2025-000042`; no prior number for the year
/// starts the sequence at `INV-2025-000001`.
pub fn next_invoice_number(latest: Option<&str>, year: i32) -> String {
    let counter = latest
        .and_then(|n| n.rsplit('-').next())
        .and_then(|digits| digits.parse::<u32>().ok())
        .unwrap_or(0)
        + 1;
    format!("{}-{}-{:06}", INVOICE_NUMBER_PREFIX, year, counter)
}

/// Due date from an issue date plus the order's lead time, falling back to
/// the operator-configured default when the order carries none.
pub fn invoice_due_date(
    issue_date: NaiveDate,
    lead_time_days: Option<i32>,
    default_days: i32,
) -> NaiveDate {
    let days = match lead_time_days {
        Some(days) if days > 0 => i64::from(days),
        _ if default_days > 0 => i64::from(default_days),
        _ => DEFAULT_LEAD_TIME_DAYS,
    };
    issue_date + Duration::days(days)
}

/// Whether an order may legally produce an invoice right now.
pub fn check_can_generate(order: &Order, today: NaiveDate) -> ApiResult<()> {
    if order.status != OrderStatus::Active {
        return Err(ApiError::state_conflict(format!(
            "Order is {}, only ACTIVE orders can generate invoices",
            order.status
        )));
    }
    if order.next_invoice_date > today {
        return Err(ApiError::state_conflict(format!(
            "Order is not due for billing until {}",
            order.next_invoice_date
        )));
    }
    Ok(())
}

/// Result of a due-order generation sweep. Per-order failures are collected
/// here, never allowed to abort the sweep.
#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub generated: i32,
    pub errors: Vec<SweepError>,
}

#[derive(Debug, Serialize)]
pub struct SweepError {
    pub order_id: Uuid,
    pub error: String,
}

/// Aggregate invoice counts and sums, computed in one pass.
#[derive(Debug, Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct InvoiceStatistics {
    pub total: i64,
    pub draft: i64,
    pub sent: i64,
    pub paid: i64,
    pub overdue: i64,
    pub cancelled: i64,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub overdue_amount: Decimal,
}

enum GenerateError {
    /// The allocated invoice number lost a race; retry the transaction.
    NumberTaken,
    App(AppError),
}

impl From<AppError> for GenerateError {
    fn from(err: AppError) -> Self {
        GenerateError::App(err)
    }
}

impl From<sqlx::Error> for GenerateError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            GenerateError::NumberTaken
        } else {
            GenerateError::App(err.into())
        }
    }
}

/// Generate a DRAFT invoice from an order and advance the order's
/// `next_invoice_date`, atomically.
pub async fn generate_invoice_from_order(
    pool: &PgPool,
    order_id: Uuid,
    today: NaiveDate,
    default_lead_time_days: i32,
) -> ApiResult<Invoice> {
    for attempt in 1..=NUMBER_ALLOCATION_ATTEMPTS {
        match try_generate(pool, order_id, today, default_lead_time_days).await {
            Ok(invoice) => {
                info!(
                    "Generated invoice {} for order {}",
                    invoice.invoice_number, order_id
                );
                return Ok(invoice);
            }
            Err(GenerateError::NumberTaken) => {
                warn!(
                    "Invoice number collision for order {} (attempt {}), retrying",
                    order_id, attempt
                );
            }
            Err(GenerateError::App(err)) => return Err(err),
        }
    }

    Err(AppError::InvoiceNumberCollision)
}

async fn try_generate(
    pool: &PgPool,
    order_id: Uuid,
    today: NaiveDate,
    default_lead_time_days: i32,
) -> Result<Invoice, GenerateError> {
    let mut tx = pool.begin().await.map_err(AppError::from)?;

    let order = sqlx::query_as::<_, Order>(
        "SELECT id, client_id, description, amount, frequency, custom_days,
                start_date, next_invoice_date, lead_time_days, status,
                created_at, updated_at
         FROM orders WHERE id = $1
         FOR UPDATE",
    )
    .bind(order_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(AppError::from)?
    .ok_or_else(|| ApiError::not_found("Order"))?;

    check_can_generate(&order, today)?;

    let invoice_number = issue_invoice_number(&mut tx, today.year()).await?;
    let due_date = invoice_due_date(today, order.lead_time_days, default_lead_time_days);

    let invoice = sqlx::query_as::<_, Invoice>(
        "INSERT INTO invoices
            (id, client_id, company_id, order_id, invoice_number, amount,
             currency, issue_date, due_date, status, notes, created_at)
         VALUES ($1, $2, NULL, $3, $4, $5, 'USD', $6, $7, 'draft', $8, NOW())
         RETURNING id, client_id, company_id, order_id, invoice_number, amount,
                   currency, issue_date, due_date, status, paid_date, notes,
                   created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(order.client_id)
    .bind(order.id)
    .bind(&invoice_number)
    .bind(order.amount)
    .bind(today)
    .bind(due_date)
    .bind(format!("Recurring order: {}", order.description))
    .fetch_one(&mut *tx)
    .await?;

    let next_date =
        schedule::next_invoice_date(order.next_invoice_date, order.frequency, order.custom_days)?;

    sqlx::query("UPDATE orders SET next_invoice_date = $2, updated_at = NOW() WHERE id = $1")
        .bind(order.id)
        .bind(next_date)
        .execute(&mut *tx)
        .await
        .map_err(AppError::from)?;

    tx.commit().await.map_err(AppError::from)?;

    Ok(invoice)
}

/// Allocate the next invoice number for `year` inside the caller's
/// transaction. The UNIQUE constraint catches concurrent issuance.
pub async fn issue_invoice_number(
    tx: &mut Transaction<'_, Postgres>,
    year: i32,
) -> Result<String, sqlx::Error> {
    let latest = sqlx::query_scalar::<_, String>(
        "SELECT invoice_number FROM invoices
         WHERE invoice_number LIKE $1
         ORDER BY invoice_number DESC
         LIMIT 1",
    )
    .bind(format!("{}-{}-%", INVOICE_NUMBER_PREFIX, year))
    .fetch_optional(&mut **tx)
    .await?;

    Ok(next_invoice_number(latest.as_deref(), year))
}

/// Generate invoices for every ACTIVE order whose `next_invoice_date` has
/// arrived. Each order runs in its own transaction so one failure never
/// blocks the rest.
pub async fn generate_invoices_for_due_orders(
    pool: &PgPool,
    today: NaiveDate,
    default_lead_time_days: i32,
) -> ApiResult<SweepReport> {
    let due_orders = sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM orders
         WHERE status = 'active' AND next_invoice_date <= $1
         ORDER BY next_invoice_date ASC",
    )
    .bind(today)
    .fetch_all(pool)
    .await?;

    let mut report = SweepReport::default();

    for order_id in due_orders {
        match generate_invoice_from_order(pool, order_id, today, default_lead_time_days).await {
            Ok(_) => report.generated += 1,
            Err(err) => report.errors.push(SweepError {
                order_id,
                error: err.message(),
            }),
        }
    }

    info!(
        "Due-order sweep: {} invoices generated, {} errors",
        report.generated,
        report.errors.len()
    );

    Ok(report)
}

/// Whether the overdue sweep should move this invoice to OVERDUE. Only SENT
/// invoices strictly past their due date qualify, which is what makes the
/// sweep idempotent: rows already OVERDUE are left alone.
pub fn becomes_overdue(status: InvoiceStatus, due_date: NaiveDate, today: NaiveDate) -> bool {
    status == InvoiceStatus::Sent && due_date < today
}

/// Transition every SENT invoice past its due date to OVERDUE. Idempotent:
/// a second run affects zero rows.
pub async fn mark_overdue_invoices(pool: &PgPool, today: NaiveDate) -> ApiResult<u64> {
    let candidates = sqlx::query_as::<_, (Uuid, InvoiceStatus, NaiveDate)>(
        "SELECT id, status, due_date FROM invoices
         WHERE status IN ('sent', 'overdue') AND due_date < $1",
    )
    .bind(today)
    .fetch_all(pool)
    .await?;

    let ids: Vec<Uuid> = candidates
        .iter()
        .filter(|(_, status, due_date)| becomes_overdue(*status, *due_date, today))
        .map(|(id, _, _)| *id)
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        "UPDATE invoices SET status = 'overdue', updated_at = NOW()
         WHERE id = ANY($1) AND status = 'sent'",
    )
    .bind(&ids)
    .execute(pool)
    .await?;

    let affected = result.rows_affected();
    if affected > 0 {
        info!("Marked {} invoices overdue", affected);
    }
    Ok(affected)
}

pub async fn invoice_statistics(pool: &PgPool) -> ApiResult<InvoiceStatistics> {
    let stats = sqlx::query_as::<_, InvoiceStatistics>(
        "SELECT
            COUNT(*) AS total,
            COUNT(*) FILTER (WHERE status = 'draft') AS draft,
            COUNT(*) FILTER (WHERE status = 'sent') AS sent,
            COUNT(*) FILTER (WHERE status = 'paid') AS paid,
            COUNT(*) FILTER (WHERE status = 'overdue') AS overdue,
            COUNT(*) FILTER (WHERE status = 'cancelled') AS cancelled,
            COALESCE(SUM(amount), 0) AS total_amount,
            COALESCE(SUM(amount) FILTER (WHERE status = 'paid'), 0) AS paid_amount,
            COALESCE(SUM(amount) FILTER (WHERE status = 'overdue'), 0) AS overdue_amount
         FROM invoices",
    )
    .fetch_one(pool)
    .await?;

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use billcycle_shared::Frequency;
    use chrono::Utc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn order(status: OrderStatus, next_invoice_date: NaiveDate) -> Order {
        Order {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            description: "Managed hosting".into(),
            amount: Decimal::from(100),
            frequency: Frequency::Monthly,
            custom_days: None,
            start_date: date(2025, 1, 1),
            next_invoice_date,
            lead_time_days: None,
            status,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn number_starts_at_one_per_year() {
        assert_eq!(next_invoice_number(None, 2025), "INV-2025-000001");
    }

    #[test]
    fn number_increments_and_keeps_padding() {
        assert_eq!(
            next_invoice_number(Some("INV-2025-000041"), 2025),
            "INV-2025-000042"
        );
        assert_eq!(
            next_invoice_number(Some("INV-2025-000999"), 2025),
            "INV-2025-001000"
        );
    }

    #[test]
    fn number_resets_across_years() {
        // The latest passed in is always scoped to the requested year, so a
        // new year simply starts from nothing.
        assert_eq!(next_invoice_number(None, 2026), "INV-2026-000001");
    }

    #[test]
    fn garbage_latest_number_restarts_sequence() {
        assert_eq!(
            next_invoice_number(Some("INV-2025-xyz"), 2025),
            "INV-2025-000001"
        );
    }

    #[test]
    fn due_date_uses_lead_time_when_positive() {
        let issue = date(2025, 3, 10);
        assert_eq!(invoice_due_date(issue, Some(14), 30), date(2025, 3, 24));
        assert_eq!(invoice_due_date(issue, Some(0), 30), date(2025, 4, 9));
        assert_eq!(invoice_due_date(issue, Some(-5), 30), date(2025, 4, 9));
        assert_eq!(invoice_due_date(issue, None, 30), date(2025, 4, 9));
    }

    #[test]
    fn due_date_honors_configured_default() {
        let issue = date(2025, 3, 10);
        assert_eq!(invoice_due_date(issue, None, 45), date(2025, 4, 24));
        // The order's own lead time still wins over the configured default.
        assert_eq!(invoice_due_date(issue, Some(14), 45), date(2025, 3, 24));
        // A broken default falls back to net-30.
        assert_eq!(invoice_due_date(issue, None, 0), date(2025, 4, 9));
    }

    #[test]
    fn overdue_sweep_is_idempotent_per_row() {
        let today = date(2025, 4, 10);

        assert!(becomes_overdue(InvoiceStatus::Sent, date(2025, 4, 9), today));
        // Due today is not yet overdue.
        assert!(!becomes_overdue(InvoiceStatus::Sent, today, today));
        // A second sweep sees the row as OVERDUE and leaves it alone.
        assert!(!becomes_overdue(InvoiceStatus::Overdue, date(2025, 4, 9), today));
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Paid,
            InvoiceStatus::Cancelled,
        ] {
            assert!(!becomes_overdue(status, date(2025, 1, 1), today));
        }
    }

    #[test]
    fn only_active_due_orders_generate() {
        let today = date(2025, 2, 1);

        assert!(check_can_generate(&order(OrderStatus::Active, today), today).is_ok());
        assert!(
            check_can_generate(&order(OrderStatus::Active, date(2025, 1, 15)), today).is_ok()
        );

        let err =
            check_can_generate(&order(OrderStatus::Paused, today), today).unwrap_err();
        assert!(matches!(err, AppError::StateConflict(_)));

        let err = check_can_generate(&order(OrderStatus::Active, date(2025, 3, 1)), today)
            .unwrap_err();
        match err {
            AppError::StateConflict(reason) => assert!(reason.contains("2025-03-01")),
            other => panic!("expected StateConflict, got {:?}", other),
        }
    }
}
