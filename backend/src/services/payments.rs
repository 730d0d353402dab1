//! Payment recording and invoice status reconciliation.
//!
//! Every mutation locks the invoice row first, so two concurrent payments
//! against the same invoice serialize and the overpayment check always sees
//! the committed total. Status reconciliation is a pure function of the
//! invoice amount and the paid total, applied after each change.

use billcycle_shared::{Invoice, InvoiceStatus, Payment, PaymentMethod};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, AppError, validation_error};

/// Request body for recording a payment against an invoice.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInput {
    pub amount: Decimal,
    pub method: PaymentMethod,
    /// Defaults to the reference date when omitted.
    pub paid_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Partial update for an existing payment. `notes` distinguishes an absent
/// field (keep) from an explicit null (clear).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentUpdate {
    pub amount: Option<Decimal>,
    pub method: Option<PaymentMethod>,
    pub paid_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "crate::pagination::patch_field")]
    pub notes: Option<Option<String>>,
}

/// Outcome of deleting a payment, after reconciliation.
#[derive(Debug, Serialize)]
pub struct PaymentDeletion {
    pub invoice_id: Uuid,
    pub invoice_amount: Decimal,
    pub remaining_paid: Decimal,
    pub invoice_status: InvoiceStatus,
}

/// Validate a (new or updated) payment amount against what the invoice still
/// allows. `already_paid` excludes the payment being updated.
pub fn check_payment_amount(
    invoice_amount: Decimal,
    already_paid: Decimal,
    amount: Decimal,
) -> ApiResult<()> {
    if amount <= Decimal::ZERO {
        return Err(validation_error("amount", "Payment amount must be positive"));
    }

    let remaining = invoice_amount - already_paid;
    if amount > remaining {
        return Err(AppError::Overpayment {
            invoice_total: invoice_amount,
            already_paid,
            remaining,
        });
    }

    Ok(())
}

/// The invoice status implied by its paid total.
///
/// Fully paid promotes to PAID. A partial payment promotes DRAFT to SENT but
/// leaves SENT and OVERDUE alone. A PAID invoice whose total drops below the
/// amount demotes to SENT. CANCELLED is handled by the callers and never
/// reconciled.
pub fn reconciled_status(
    current: InvoiceStatus,
    invoice_amount: Decimal,
    paid_total: Decimal,
) -> InvoiceStatus {
    if paid_total >= invoice_amount && paid_total > Decimal::ZERO {
        return InvoiceStatus::Paid;
    }

    match current {
        InvoiceStatus::Paid => InvoiceStatus::Sent,
        InvoiceStatus::Draft if paid_total > Decimal::ZERO => InvoiceStatus::Sent,
        other => other,
    }
}

/// Guard for explicit status changes: an invoice may be marked PAID exactly
/// when its payments cover the amount, and may not leave PAID while they
/// still do. Cancellation is an administrative override and passes either
/// way.
pub fn check_status_against_payments(
    next: InvoiceStatus,
    invoice_amount: Decimal,
    paid_total: Decimal,
) -> ApiResult<()> {
    let covered = paid_total >= invoice_amount;
    match next {
        InvoiceStatus::Cancelled => Ok(()),
        InvoiceStatus::Paid if !covered => Err(ApiError::state_conflict(format!(
            "Cannot mark invoice PAID: only {} of {} is paid",
            paid_total, invoice_amount
        ))),
        InvoiceStatus::Paid => Ok(()),
        _ if covered => Err(ApiError::state_conflict(
            "Payments fully cover the invoice; adjust the payments instead of the status",
        )),
        _ => Ok(()),
    }
}

/// Record a payment and reconcile the invoice status, atomically.
pub async fn record_payment(
    pool: &PgPool,
    invoice_id: Uuid,
    input: PaymentInput,
    today: NaiveDate,
) -> ApiResult<Payment> {
    let mut tx = pool.begin().await?;

    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    if invoice.status == InvoiceStatus::Cancelled {
        return Err(ApiError::state_conflict(
            "Invoice is CANCELLED and can no longer accept payments",
        ));
    }

    let already_paid = paid_total(&mut tx, invoice_id, None).await?;
    check_payment_amount(invoice.amount, already_paid, input.amount)?;

    let payment = sqlx::query_as::<_, Payment>(
        "INSERT INTO payments (id, invoice_id, amount, method, paid_date, notes, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, NOW())
         RETURNING id, invoice_id, amount, method, paid_date, notes, created_at, updated_at",
    )
    .bind(Uuid::new_v4())
    .bind(invoice_id)
    .bind(input.amount)
    .bind(input.method)
    .bind(input.paid_date.unwrap_or(today))
    .bind(&input.notes)
    .fetch_one(&mut *tx)
    .await?;

    let status = reconcile(&mut tx, &invoice, already_paid + input.amount).await?;
    tx.commit().await?;

    info!(
        "Recorded payment of {} against invoice {} (now {})",
        payment.amount, invoice.invoice_number, status
    );
    Ok(payment)
}

/// Update a payment and re-reconcile. The new amount is validated against
/// the sum of the invoice's *other* payments.
pub async fn update_payment(
    pool: &PgPool,
    payment_id: Uuid,
    update: PaymentUpdate,
) -> ApiResult<Payment> {
    let mut tx = pool.begin().await?;

    let invoice_id = payment_invoice_id(&mut tx, payment_id).await?;
    let invoice = lock_invoice(&mut tx, invoice_id).await?;
    if invoice.status == InvoiceStatus::Cancelled {
        return Err(ApiError::state_conflict(
            "Payments on a CANCELLED invoice cannot be modified",
        ));
    }

    let existing = sqlx::query_as::<_, Payment>(
        "SELECT id, invoice_id, amount, method, paid_date, notes, created_at, updated_at
         FROM payments WHERE id = $1
         FOR UPDATE",
    )
    .bind(payment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Payment"))?;

    let amount = update.amount.unwrap_or(existing.amount);
    let others = paid_total(&mut tx, invoice_id, Some(payment_id)).await?;
    check_payment_amount(invoice.amount, others, amount)?;

    let payment = sqlx::query_as::<_, Payment>(
        "UPDATE payments
         SET amount = $2, method = $3, paid_date = $4, notes = $5, updated_at = NOW()
         WHERE id = $1
         RETURNING id, invoice_id, amount, method, paid_date, notes, created_at, updated_at",
    )
    .bind(payment_id)
    .bind(amount)
    .bind(update.method.unwrap_or(existing.method))
    .bind(update.paid_date.unwrap_or(existing.paid_date))
    .bind(update.notes.unwrap_or(existing.notes))
    .fetch_one(&mut *tx)
    .await?;

    reconcile(&mut tx, &invoice, others + amount).await?;
    tx.commit().await?;

    Ok(payment)
}

/// Delete a payment and re-reconcile; a fully paid invoice whose remainder
/// falls short drops back to SENT with `paid_date` cleared.
pub async fn delete_payment(pool: &PgPool, payment_id: Uuid) -> ApiResult<PaymentDeletion> {
    let mut tx = pool.begin().await?;

    let invoice_id = payment_invoice_id(&mut tx, payment_id).await?;
    let invoice = lock_invoice(&mut tx, invoice_id).await?;

    let result = sqlx::query("DELETE FROM payments WHERE id = $1")
        .bind(payment_id)
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Payment"));
    }

    let remaining_paid = paid_total(&mut tx, invoice_id, None).await?;
    let invoice_status = reconcile(&mut tx, &invoice, remaining_paid).await?;
    tx.commit().await?;

    info!(
        "Deleted payment {} from invoice {} ({} of {} still paid)",
        payment_id, invoice.invoice_number, remaining_paid, invoice.amount
    );

    Ok(PaymentDeletion {
        invoice_id,
        invoice_amount: invoice.amount,
        remaining_paid,
        invoice_status,
    })
}

async fn payment_invoice_id(
    tx: &mut Transaction<'_, Postgres>,
    payment_id: Uuid,
) -> ApiResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>("SELECT invoice_id FROM payments WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Payment"))
}

async fn lock_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> ApiResult<Invoice> {
    sqlx::query_as::<_, Invoice>(
        "SELECT id, client_id, company_id, order_id, invoice_number, amount, currency,
                issue_date, due_date, status, paid_date, notes, created_at, updated_at
         FROM invoices WHERE id = $1
         FOR UPDATE",
    )
    .bind(invoice_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Invoice"))
}

/// Sum of the invoice's payments, optionally excluding one payment (used
/// when validating an update against the other payments).
async fn paid_total(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
    exclude: Option<Uuid>,
) -> ApiResult<Decimal> {
    let total = sqlx::query_scalar::<_, Decimal>(
        "SELECT COALESCE(SUM(amount), 0) FROM payments
         WHERE invoice_id = $1 AND ($2::uuid IS NULL OR id <> $2)",
    )
    .bind(invoice_id)
    .bind(exclude)
    .fetch_one(&mut **tx)
    .await?;

    Ok(total)
}

/// Apply the reconciled status to the invoice row. `paid_date` tracks the
/// latest payment date while PAID and is NULL otherwise.
async fn reconcile(
    tx: &mut Transaction<'_, Postgres>,
    invoice: &Invoice,
    paid_total: Decimal,
) -> ApiResult<InvoiceStatus> {
    if invoice.status == InvoiceStatus::Cancelled {
        return Ok(InvoiceStatus::Cancelled);
    }

    let new_status = reconciled_status(invoice.status, invoice.amount, paid_total);

    let paid_date: Option<NaiveDate> = if new_status == InvoiceStatus::Paid {
        sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT MAX(paid_date) FROM payments WHERE invoice_id = $1",
        )
        .bind(invoice.id)
        .fetch_one(&mut **tx)
        .await?
    } else {
        None
    };

    if new_status != invoice.status || paid_date != invoice.paid_date {
        sqlx::query(
            "UPDATE invoices SET status = $2, paid_date = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(invoice.id)
        .bind(new_status)
        .bind(paid_date)
        .execute(&mut **tx)
        .await?;
    }

    Ok(new_status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::from(n)
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(matches!(
            check_payment_amount(dec(100), dec(0), dec(0)),
            Err(AppError::ValidationError { .. })
        ));
        assert!(matches!(
            check_payment_amount(dec(100), dec(0), dec(-5)),
            Err(AppError::ValidationError { .. })
        ));
    }

    #[test]
    fn exact_remainder_is_allowed() {
        assert!(check_payment_amount(dec(100), dec(60), dec(40)).is_ok());
        assert!(check_payment_amount(dec(100), dec(0), dec(100)).is_ok());
    }

    #[test]
    fn overpayment_reports_remaining() {
        match check_payment_amount(dec(100), dec(60), dec(50)) {
            Err(AppError::Overpayment {
                invoice_total,
                already_paid,
                remaining,
            }) => {
                assert_eq!(invoice_total, dec(100));
                assert_eq!(already_paid, dec(60));
                assert_eq!(remaining, dec(40));
            }
            other => panic!("expected Overpayment, got {:?}", other),
        }
    }

    #[test]
    fn full_payment_promotes_to_paid() {
        for current in [
            InvoiceStatus::Draft,
            InvoiceStatus::Sent,
            InvoiceStatus::Overdue,
        ] {
            assert_eq!(
                reconciled_status(current, dec(100), dec(100)),
                InvoiceStatus::Paid
            );
        }
    }

    #[test]
    fn partial_payment_promotes_draft_only() {
        assert_eq!(
            reconciled_status(InvoiceStatus::Draft, dec(100), dec(60)),
            InvoiceStatus::Sent
        );
        assert_eq!(
            reconciled_status(InvoiceStatus::Sent, dec(100), dec(60)),
            InvoiceStatus::Sent
        );
        // An overdue invoice stays overdue until fully paid.
        assert_eq!(
            reconciled_status(InvoiceStatus::Overdue, dec(100), dec(60)),
            InvoiceStatus::Overdue
        );
    }

    #[test]
    fn shrinking_the_total_demotes_paid() {
        assert_eq!(
            reconciled_status(InvoiceStatus::Paid, dec(100), dec(60)),
            InvoiceStatus::Sent
        );
        assert_eq!(
            reconciled_status(InvoiceStatus::Paid, dec(100), dec(0)),
            InvoiceStatus::Sent
        );
        assert_eq!(
            reconciled_status(InvoiceStatus::Paid, dec(100), dec(100)),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn explicit_paid_requires_full_coverage() {
        for paid in [dec(0), dec(60), dec(99)] {
            match check_status_against_payments(InvoiceStatus::Paid, dec(100), paid) {
                Err(AppError::StateConflict(reason)) => {
                    assert!(reason.contains(&format!("{} of 100", paid)))
                }
                other => panic!("expected StateConflict, got {:?}", other),
            }
        }
        assert!(check_status_against_payments(InvoiceStatus::Paid, dec(100), dec(100)).is_ok());
        assert!(check_status_against_payments(InvoiceStatus::Paid, dec(100), dec(120)).is_ok());
    }

    #[test]
    fn leaving_paid_is_blocked_while_covered() {
        assert!(matches!(
            check_status_against_payments(InvoiceStatus::Sent, dec(100), dec(100)),
            Err(AppError::StateConflict(_))
        ));
        assert!(check_status_against_payments(InvoiceStatus::Sent, dec(100), dec(60)).is_ok());
        assert!(check_status_against_payments(InvoiceStatus::Overdue, dec(100), dec(0)).is_ok());
    }

    #[test]
    fn cancellation_ignores_payment_coverage() {
        assert!(
            check_status_against_payments(InvoiceStatus::Cancelled, dec(100), dec(100)).is_ok()
        );
        assert!(check_status_against_payments(InvoiceStatus::Cancelled, dec(100), dec(0)).is_ok());
    }

    #[test]
    fn payment_update_distinguishes_absent_notes_from_null() {
        let absent: PaymentUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.notes, None);

        let cleared: PaymentUpdate = serde_json::from_str(r#"{"notes": null}"#).unwrap();
        assert_eq!(cleared.notes, Some(None));

        let set: PaymentUpdate = serde_json::from_str(r#"{"notes": "wire ref 991"}"#).unwrap();
        assert_eq!(set.notes, Some(Some("wire ref 991".to_string())));
    }

    #[test]
    fn zero_total_leaves_draft_untouched() {
        assert_eq!(
            reconciled_status(InvoiceStatus::Draft, dec(100), dec(0)),
            InvoiceStatus::Draft
        );
    }
}
