use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How often a recurring order bills.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "order_frequency", rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Annually,
    Custom,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Weekly => "WEEKLY",
            Frequency::Biweekly => "BIWEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Quarterly => "QUARTERLY",
            Frequency::Annually => "ANNUALLY",
            Frequency::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Active,
    Paused,
    Cancelled,
}

impl OrderStatus {
    /// Cancelled is terminal; Active and Paused flip freely.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        match (self, to) {
            (a, b) if a == b => true,
            (OrderStatus::Cancelled, _) => false,
            (_, _) => true,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Active => "ACTIVE",
            OrderStatus::Paused => "PAUSED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "invoice_status", rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Paid,
    Overdue,
    Cancelled,
}

impl InvoiceStatus {
    /// Legal status moves:
    ///
    /// - Draft -> Sent | Cancelled
    /// - Sent -> Paid | Overdue | Cancelled
    /// - Overdue -> Paid | Sent | Cancelled
    /// - Paid -> Sent (a payment was deleted or reduced below the total)
    /// - Cancelled -> nothing
    pub fn can_transition(self, to: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        match (self, to) {
            (a, b) if a == b => true,
            (Draft, Sent) | (Draft, Cancelled) => true,
            (Sent, Paid) | (Sent, Overdue) | (Sent, Cancelled) => true,
            (Overdue, Paid) | (Overdue, Sent) | (Overdue, Cancelled) => true,
            (Paid, Sent) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvoiceStatus::Draft => "DRAFT",
            InvoiceStatus::Sent => "SENT",
            InvoiceStatus::Paid => "PAID",
            InvoiceStatus::Overdue => "OVERDUE",
            InvoiceStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "payment_method", rename_all = "snake_case")
)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    BankTransfer,
    CreditCard,
    Check,
    Cash,
    Other,
}

/// A billable party. Owns zero or more recurring orders.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A recurring billing agreement. `next_invoice_date` is always derived from
/// the frequency rule, never set directly by callers.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub client_id: Uuid,
    pub description: String,
    pub amount: Decimal,
    pub frequency: Frequency,
    /// Days between invoices; present iff `frequency` is Custom, in 1..=365.
    pub custom_days: Option<i32>,
    pub start_date: NaiveDate,
    pub next_invoice_date: NaiveDate,
    /// Days between an invoice's issue date and its due date.
    pub lead_time_days: Option<i32>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single billing instance, generated from an order or created manually.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub client_id: Uuid,
    /// Issuing business entity, when the installation bills from several.
    pub company_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    /// Unique, `INV-<year>-<6-digit sequence>`.
    pub invoice_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub status: InvoiceStatus,
    pub paid_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A monetary settlement against one invoice. The sum of a given invoice's
/// payments never exceeds the invoice amount.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_transitions_follow_the_lifecycle() {
        use InvoiceStatus::*;
        assert!(Draft.can_transition(Sent));
        assert!(Draft.can_transition(Cancelled));
        assert!(!Draft.can_transition(Paid));
        assert!(!Draft.can_transition(Overdue));

        assert!(Sent.can_transition(Paid));
        assert!(Sent.can_transition(Overdue));
        assert!(Sent.can_transition(Cancelled));
        assert!(!Sent.can_transition(Draft));

        assert!(Overdue.can_transition(Paid));
        assert!(Paid.can_transition(Sent));
        assert!(!Paid.can_transition(Draft));

        assert!(!Cancelled.can_transition(Sent));
        assert!(!Cancelled.can_transition(Paid));
    }

    #[test]
    fn cancelled_orders_stay_cancelled() {
        assert!(OrderStatus::Active.can_transition(OrderStatus::Paused));
        assert!(OrderStatus::Paused.can_transition(OrderStatus::Active));
        assert!(OrderStatus::Active.can_transition(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition(OrderStatus::Active));
    }

    #[test]
    fn enums_serialize_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&Frequency::Biweekly).unwrap(),
            "\"BIWEEKLY\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::BankTransfer).unwrap(),
            "\"BANK_TRANSFER\""
        );
        assert_eq!(
            serde_json::to_string(&InvoiceStatus::Overdue).unwrap(),
            "\"OVERDUE\""
        );
    }
}
