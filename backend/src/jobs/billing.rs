// Billing sweep - invoice generation, overdue marking, and payment reminders

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::email::{EmailService, InvoiceEmailData};
use crate::services::invoicing;

/// Reminder schedule relative to the due date: 7 days before, on the day,
/// then 7, 14, and 30 days overdue.
pub const REMINDER_THRESHOLDS: [i32; 5] = [-7, 0, 7, 14, 30];

#[derive(Debug)]
pub struct BillingSweepJob {
    db_pool: PgPool,
    email_service: Option<EmailService>,
    auto_invoice_enabled: bool,
    payment_reminder_enabled: bool,
    default_lead_time_days: i32,
}

#[derive(Debug, Default)]
pub struct BillingSweepResult {
    pub invoices_generated: i32,
    pub invoices_marked_overdue: i32,
    pub reminders_sent: i32,
    pub total_amount_invoiced: Decimal,
    pub errors: Vec<String>,
}

impl BillingSweepResult {
    pub fn items_processed(&self) -> i32 {
        self.invoices_generated + self.invoices_marked_overdue + self.reminders_sent
    }
}

#[derive(Debug, FromRow)]
struct DueOrder {
    id: Uuid,
    client_name: String,
    client_email: String,
}

#[derive(Debug, FromRow)]
struct UnpaidInvoice {
    id: Uuid,
    invoice_number: String,
    client_name: String,
    client_email: String,
    amount: Decimal,
    currency: String,
    issue_date: NaiveDate,
    due_date: NaiveDate,
    days_overdue: i32,
    last_reminder_date: Option<NaiveDate>,
}

/// Whether an unpaid invoice hits a reminder threshold today. A 1-day
/// tolerance absorbs sweeps that skip a calendar day; the last-reminder
/// check keeps any threshold from firing twice in a row.
pub fn should_send_reminder(
    days_overdue: i32,
    last_reminder_date: Option<NaiveDate>,
    today: NaiveDate,
) -> bool {
    let matches_threshold = REMINDER_THRESHOLDS
        .iter()
        .any(|t| (days_overdue - *t).abs() <= 1);
    if !matches_threshold {
        return false;
    }

    match last_reminder_date {
        Some(last) => last < today - Duration::days(1),
        None => true,
    }
}

impl BillingSweepJob {
    pub fn new(
        db_pool: PgPool,
        email_service: Option<EmailService>,
        auto_invoice_enabled: bool,
        payment_reminder_enabled: bool,
        default_lead_time_days: i32,
    ) -> Self {
        Self {
            db_pool,
            email_service,
            auto_invoice_enabled,
            payment_reminder_enabled,
            default_lead_time_days,
        }
    }

    pub async fn run(&self) -> Result<BillingSweepResult, Box<dyn std::error::Error + Send + Sync>> {
        let today = Utc::now().date_naive();
        let mut result = BillingSweepResult::default();

        if self.auto_invoice_enabled {
            if let Err(e) = self.generate_due_invoices(today, &mut result).await {
                result.errors.push(format!("Invoice generation error: {}", e));
            }
        }

        match invoicing::mark_overdue_invoices(&self.db_pool, today).await {
            Ok(marked) => result.invoices_marked_overdue = marked as i32,
            Err(e) => result.errors.push(format!("Overdue marking error: {}", e)),
        }

        if self.payment_reminder_enabled {
            if let Err(e) = self.send_payment_reminders(today, &mut result).await {
                result.errors.push(format!("Payment reminders error: {}", e));
            }
        }

        Ok(result)
    }

    /// Generate an invoice for each due ACTIVE order, emailing the client
    /// when SMTP is configured. Each order is independent: a failure lands in
    /// the error list and the sweep keeps going.
    async fn generate_due_invoices(
        &self,
        today: NaiveDate,
        result: &mut BillingSweepResult,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let due_orders = sqlx::query_as::<_, DueOrder>(
            "SELECT o.id, c.name AS client_name, c.email AS client_email
             FROM orders o
             JOIN clients c ON c.id = o.client_id
             WHERE o.status = 'active' AND o.next_invoice_date <= $1
             ORDER BY o.next_invoice_date ASC",
        )
        .bind(today)
        .fetch_all(&self.db_pool)
        .await?;

        for order in due_orders {
            match invoicing::generate_invoice_from_order(
                &self.db_pool,
                order.id,
                today,
                self.default_lead_time_days,
            )
            .await
            {
                Ok(invoice) => {
                    result.invoices_generated += 1;
                    result.total_amount_invoiced += invoice.amount;

                    if let Some(email) = &self.email_service {
                        let data = InvoiceEmailData {
                            invoice_number: invoice.invoice_number.clone(),
                            client_name: order.client_name.clone(),
                            amount: invoice.amount,
                            currency: invoice.currency.clone(),
                            issue_date: invoice.issue_date,
                            due_date: invoice.due_date,
                            description: invoice.notes.clone(),
                        };
                        let template = email.invoice_generated_template(&data);
                        if let Err(e) = email
                            .send_template(&order.client_email, Some(&order.client_name), &template)
                            .await
                        {
                            result.errors.push(format!(
                                "Failed to email invoice {}: {}",
                                invoice.invoice_number, e
                            ));
                        }
                    }

                    info!(
                        "Generated invoice {} for {}",
                        invoice.invoice_number, order.client_name
                    );
                }
                Err(e) => {
                    result
                        .errors
                        .push(format!("Order {}: {}", order.id, e));
                }
            }
        }

        Ok(())
    }

    async fn send_payment_reminders(
        &self,
        today: NaiveDate,
        result: &mut BillingSweepResult,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let Some(email) = &self.email_service else {
            warn!("Payment reminders enabled but SMTP is not configured, skipping");
            return Ok(());
        };

        let unpaid = sqlx::query_as::<_, UnpaidInvoice>(
            "SELECT i.id, i.invoice_number, i.amount, i.currency,
                    i.issue_date, i.due_date,
                    ($1::date - i.due_date)::integer AS days_overdue,
                    i.last_reminder_date,
                    c.name AS client_name, c.email AS client_email
             FROM invoices i
             JOIN clients c ON c.id = i.client_id
             WHERE i.status IN ('sent', 'overdue')
               AND i.due_date <= $1 + INTERVAL '8 days'
             ORDER BY i.due_date ASC",
        )
        .bind(today)
        .fetch_all(&self.db_pool)
        .await?;

        for invoice in unpaid {
            if !should_send_reminder(invoice.days_overdue, invoice.last_reminder_date, today) {
                continue;
            }

            let data = InvoiceEmailData {
                invoice_number: invoice.invoice_number.clone(),
                client_name: invoice.client_name.clone(),
                amount: invoice.amount,
                currency: invoice.currency.clone(),
                issue_date: invoice.issue_date,
                due_date: invoice.due_date,
                description: None,
            };
            let template = email.payment_reminder_template(&data, invoice.days_overdue as i64);

            match email
                .send_template(&invoice.client_email, Some(&invoice.client_name), &template)
                .await
            {
                Ok(_) => {
                    result.reminders_sent += 1;

                    sqlx::query(
                        "UPDATE invoices
                         SET reminder_count = reminder_count + 1,
                             last_reminder_date = $2,
                             updated_at = NOW()
                         WHERE id = $1",
                    )
                    .bind(invoice.id)
                    .bind(today)
                    .execute(&self.db_pool)
                    .await?;

                    info!("Sent payment reminder for invoice {}", invoice.invoice_number);
                }
                Err(e) => {
                    result.errors.push(format!(
                        "Failed to send reminder for {}: {}",
                        invoice.invoice_number, e
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn reminders_fire_on_thresholds_with_tolerance() {
        let today = date(2025, 4, 10);
        for days in [-8, -7, -6, -1, 0, 1, 6, 7, 8, 13, 14, 15, 29, 30, 31] {
            assert!(
                should_send_reminder(days, None, today),
                "expected reminder at {} days",
                days
            );
        }
        for days in [-12, -4, 3, 10, 20, 40] {
            assert!(
                !should_send_reminder(days, None, today),
                "expected no reminder at {} days",
                days
            );
        }
    }

    #[test]
    fn recent_reminder_suppresses_resend() {
        let today = date(2025, 4, 10);
        assert!(!should_send_reminder(7, Some(today), today));
        assert!(!should_send_reminder(7, Some(date(2025, 4, 9)), today));
        assert!(should_send_reminder(7, Some(date(2025, 4, 8)), today));
    }
}
