use crate::config::SmtpConfig;
use crate::error::{ApiResult, AppError};
use chrono::NaiveDate;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{PoolConfig, authentication::Credentials},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

/// Everything the invoice and reminder templates need to render.
#[derive(Debug, Serialize, Deserialize)]
pub struct InvoiceEmailData {
    pub invoice_number: String,
    pub client_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub description: Option<String>,
}

fn smtp_error(err: impl std::fmt::Display) -> AppError {
    AppError::ExternalServiceError {
        service: "smtp".to_string(),
        message: err.to_string(),
    }
}

impl EmailService {
    pub async fn new(smtp_config: &SmtpConfig) -> ApiResult<Self> {
        let creds = Credentials::new(
            smtp_config.username.clone(),
            smtp_config.password.clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        Ok(EmailService {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }

    pub async fn send_email(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> ApiResult<()> {
        let from = format!("{} <{}>", self.from_name, self.from_email)
            .parse::<Mailbox>()
            .map_err(smtp_error)?;

        let to = if let Some(name) = to_name {
            format!("{} <{}>", name, to_email)
                .parse::<Mailbox>()
                .map_err(smtp_error)?
        } else {
            to_email.parse::<Mailbox>().map_err(smtp_error)?
        };

        let message_builder = Message::builder().from(from).to(to).subject(subject);

        let message = if let Some(text) = text_body {
            message_builder.multipart(
                lettre::message::MultiPart::alternative()
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        lettre::message::SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )
            .map_err(smtp_error)?
        } else {
            message_builder
                .body(html_body.to_string())
                .map_err(smtp_error)?
        };

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", to_email);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to_email, e);
                Err(smtp_error(e))
            }
        }
    }

    /// Convenience wrapper to send a rendered template.
    pub async fn send_template(
        &self,
        to_email: &str,
        to_name: Option<&str>,
        template: &EmailTemplate,
    ) -> ApiResult<()> {
        self.send_email(
            to_email,
            to_name,
            &template.subject,
            &template.html_body,
            template.text_body.as_deref(),
        )
        .await
    }

    // Template for freshly generated invoices
    pub fn invoice_generated_template(&self, data: &InvoiceEmailData) -> EmailTemplate {
        let subject = format!("Invoice {} from {}", data.invoice_number, self.from_name);
        let description = data.description.as_deref().unwrap_or("Services rendered");

        let html_body = format!(
            r#"
            <html>
            <head>
                <style>
                    body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; }}
                    .container {{ max-width: 600px; margin: 0 auto; background: white; border-radius: 8px; overflow: hidden; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }}
                    .header {{ background: #2563eb; color: white; padding: 20px; text-align: center; }}
                    .content {{ padding: 30px; }}
                    .invoice-info {{ background: #f8fafc; border-left: 4px solid #2563eb; padding: 15px; margin: 20px 0; }}
                    .footer {{ background: #f8fafc; padding: 20px; text-align: center; color: #666; }}
                </style>
            </head>
            <body>
                <div class="container">
                    <div class="header">
                        <h1>New Invoice</h1>
                    </div>
                    <div class="content">
                        <p>Hello {},</p>
                        <p>A new invoice has been issued for your account.</p>

                        <div class="invoice-info">
                            <h3>Invoice Details</h3>
                            <p><strong>Invoice #:</strong> {}</p>
                            <p><strong>Description:</strong> {}</p>
                            <p><strong>Amount:</strong> {} {}</p>
                            <p><strong>Issued:</strong> {}</p>
                            <p><strong>Due:</strong> {}</p>
                        </div>

                        <p>Please arrange payment by the due date.</p>

                        <p>Best regards,<br>{}</p>
                    </div>
                    <div class="footer">
                        <p>This is an automated message. Please do not reply directly to this email.</p>
                    </div>
                </div>
            </body>
            </html>
            "#,
            data.client_name,
            data.invoice_number,
            description,
            data.amount,
            data.currency,
            data.issue_date,
            data.due_date,
            self.from_name
        );

        let text_body = format!(
            "New Invoice\n\n\
            Hello {},\n\n\
            A new invoice has been issued for your account.\n\n\
            Invoice Details:\n\
            - Invoice #: {}\n\
            - Description: {}\n\
            - Amount: {} {}\n\
            - Issued: {}\n\
            - Due: {}\n\n\
            Please arrange payment by the due date.\n\n\
            Best regards,\n\
            {}",
            data.client_name,
            data.invoice_number,
            description,
            data.amount,
            data.currency,
            data.issue_date,
            data.due_date,
            self.from_name
        );

        EmailTemplate {
            subject,
            html_body,
            text_body: Some(text_body),
        }
    }

    /// Template for payment reminders. Negative `days_overdue` means the
    /// invoice is not yet due.
    pub fn payment_reminder_template(
        &self,
        data: &InvoiceEmailData,
        days_overdue: i64,
    ) -> EmailTemplate {
        let (subject, urgency) = if days_overdue < 0 {
            (
                format!(
                    "Reminder: Invoice {} is due {}",
                    data.invoice_number, data.due_date
                ),
                "is due soon".to_string(),
            )
        } else if days_overdue == 0 {
            (
                format!("Invoice {} is due today", data.invoice_number),
                "is due today".to_string(),
            )
        } else {
            (
                format!(
                    "Overdue: Invoice {} ({} days past due)",
                    data.invoice_number, days_overdue
                ),
                format!("is {} days past due", days_overdue),
            )
        };

        let html_body = format!(
            r#"
            <html>
            <head>
                <style>
                    body {{ font-family: Arial, sans-serif; margin: 0; padding: 20px; background-color: #f5f5f5; }}
                    .container {{ max-width: 600px; margin: 0 auto; background: white; border-radius: 8px; overflow: hidden; box-shadow: 0 2px 10px rgba(0,0,0,0.1); }}
                    .header {{ background: #d97706; color: white; padding: 20px; text-align: center; }}
                    .content {{ padding: 30px; }}
                    .invoice-info {{ background: #fffbeb; border-left: 4px solid #d97706; padding: 15px; margin: 20px 0; }}
                    .footer {{ background: #f8fafc; padding: 20px; text-align: center; color: #666; }}
                </style>
            </head>
            <body>
                <div class="container">
                    <div class="header">
                        <h1>Payment Reminder</h1>
                    </div>
                    <div class="content">
                        <p>Hello {},</p>
                        <p>Invoice {} {}.</p>

                        <div class="invoice-info">
                            <p><strong>Amount due:</strong> {} {}</p>
                            <p><strong>Due date:</strong> {}</p>
                        </div>

                        <p>If you have already sent payment, please disregard this notice.</p>

                        <p>Best regards,<br>{}</p>
                    </div>
                    <div class="footer">
                        <p>This is an automated message. Please do not reply directly to this email.</p>
                    </div>
                </div>
            </body>
            </html>
            "#,
            data.client_name,
            data.invoice_number,
            urgency,
            data.amount,
            data.currency,
            data.due_date,
            self.from_name
        );

        let text_body = format!(
            "Payment Reminder\n\n\
            Hello {},\n\n\
            Invoice {} {}.\n\n\
            Amount due: {} {}\n\
            Due date: {}\n\n\
            If you have already sent payment, please disregard this notice.\n\n\
            Best regards,\n\
            {}",
            data.client_name,
            data.invoice_number,
            urgency,
            data.amount,
            data.currency,
            data.due_date,
            self.from_name
        );

        EmailTemplate {
            subject,
            html_body,
            text_body: Some(text_body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> InvoiceEmailData {
        InvoiceEmailData {
            invoice_number: "INV-2025-000042".into(),
            client_name: "Acme Corp".into(),
            amount: Decimal::new(15000, 2),
            currency: "USD".into(),
            issue_date: NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2025, 3, 31).unwrap(),
            description: Some("Managed hosting".into()),
        }
    }

    fn service() -> EmailService {
        EmailService {
            transport: AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous("localhost")
                .build(),
            from_email: "billing@example.com".into(),
            from_name: "Billcycle Billing".into(),
        }
    }

    #[tokio::test]
    async fn reminder_wording_tracks_days_overdue() {
        let svc = service();
        let data = sample_data();

        let upcoming = svc.payment_reminder_template(&data, -7);
        assert!(upcoming.subject.contains("due 2025-03-31"));

        let today = svc.payment_reminder_template(&data, 0);
        assert!(today.subject.contains("due today"));

        let overdue = svc.payment_reminder_template(&data, 14);
        assert!(overdue.subject.contains("14 days past due"));
    }

    #[tokio::test]
    async fn invalid_recipient_is_reported_as_smtp_failure() {
        let svc = service();
        let err = svc
            .send_email("not-an-address", None, "subject", "<p>body</p>", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalServiceError { .. }));
    }

    #[tokio::test]
    async fn invoice_template_includes_number_and_amount() {
        let svc = service();
        let template = svc.invoice_generated_template(&sample_data());

        assert!(template.subject.contains("INV-2025-000042"));
        assert!(template.html_body.contains("150.00 USD"));
        assert!(template.text_body.unwrap().contains("INV-2025-000042"));
    }
}
