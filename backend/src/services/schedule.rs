//! Billing-date arithmetic for recurring orders.
//!
//! Everything here is pure: the reference date is always a parameter, so the
//! handlers and sweep jobs decide what "now" means and the rules stay
//! deterministic under test.

use billcycle_shared::Frequency;
use chrono::{Duration, Months, NaiveDate};
use rust_decimal::Decimal;

use crate::error::{ApiError, ApiResult, validation_error};

/// Lower/upper bound for `custom_days` on CUSTOM-frequency orders.
pub const CUSTOM_DAYS_MIN: i32 = 1;
pub const CUSTOM_DAYS_MAX: i32 = 365;

/// Compute the next invoice date from `from`.
///
/// Calendar-based frequencies advance by whole months/years with the
/// day-of-month clamped to the target month's length (Jan 31 + 1 month is
/// Feb 28, or Feb 29 in a leap year). CUSTOM advances by an explicit day
/// count, which must be present and within [1, 365].
pub fn next_invoice_date(
    from: NaiveDate,
    frequency: Frequency,
    custom_days: Option<i32>,
) -> ApiResult<NaiveDate> {
    let next = match frequency {
        Frequency::Weekly => Some(from + Duration::days(7)),
        Frequency::Biweekly => Some(from + Duration::days(14)),
        Frequency::Monthly => from.checked_add_months(Months::new(1)),
        Frequency::Quarterly => from.checked_add_months(Months::new(3)),
        Frequency::Annually => from.checked_add_months(Months::new(12)),
        Frequency::Custom => {
            let days = required_custom_days(custom_days)?;
            Some(from + Duration::days(days as i64))
        }
    };

    next.ok_or_else(|| ApiError::internal(format!("Date arithmetic overflow from {}", from)))
}

/// Project the next `count` invoice dates, seeded at `start_from`.
///
/// The first element equals `next_invoice_date(start_from, ...)` and the
/// sequence is strictly increasing.
pub fn invoice_schedule(
    start_from: NaiveDate,
    frequency: Frequency,
    count: usize,
    custom_days: Option<i32>,
) -> ApiResult<Vec<NaiveDate>> {
    let mut schedule = Vec::with_capacity(count);
    let mut current = start_from;

    for _ in 0..count {
        current = next_invoice_date(current, frequency, custom_days)?;
        schedule.push(current);
    }

    Ok(schedule)
}

/// Validate a frequency / custom_days combination for order create/update.
///
/// CUSTOM requires `custom_days` in [1, 365]. A stray `custom_days` supplied
/// with any other frequency is rejected rather than silently ignored, so the
/// stored order never carries a misleading value.
pub fn validate_frequency(frequency: Frequency, custom_days: Option<i32>) -> ApiResult<()> {
    match (frequency, custom_days) {
        (Frequency::Custom, days) => required_custom_days(days).map(|_| ()),
        (_, Some(_)) => Err(validation_error(
            "custom_days",
            "custom_days is only valid when frequency is CUSTOM",
        )),
        (_, None) => Ok(()),
    }
}

/// Estimated annualized revenue for one order: amount x occurrences per year.
pub fn estimated_annual_revenue(
    amount: Decimal,
    frequency: Frequency,
    custom_days: Option<i32>,
) -> ApiResult<Decimal> {
    let year = Decimal::from(365);
    let occurrences_per_year = match frequency {
        Frequency::Weekly => year / Decimal::from(7),
        Frequency::Biweekly => year / Decimal::from(14),
        Frequency::Monthly => Decimal::from(12),
        Frequency::Quarterly => Decimal::from(4),
        Frequency::Annually => Decimal::ONE,
        Frequency::Custom => {
            let days = required_custom_days(custom_days)?;
            year / Decimal::from(days)
        }
    };

    Ok((amount * occurrences_per_year).round_dp(2))
}

fn required_custom_days(custom_days: Option<i32>) -> ApiResult<i32> {
    match custom_days {
        Some(days) if (CUSTOM_DAYS_MIN..=CUSTOM_DAYS_MAX).contains(&days) => Ok(days),
        Some(_) => Err(validation_error(
            "custom_days",
            "custom_days must be between 1 and 365",
        )),
        None => Err(validation_error(
            "custom_days",
            "custom_days is required when frequency is CUSTOM",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fixed_offsets() {
        let from = date(2025, 1, 1);
        assert_eq!(
            next_invoice_date(from, Frequency::Weekly, None).unwrap(),
            date(2025, 1, 8)
        );
        assert_eq!(
            next_invoice_date(from, Frequency::Biweekly, None).unwrap(),
            date(2025, 1, 15)
        );
        assert_eq!(
            next_invoice_date(from, Frequency::Monthly, None).unwrap(),
            date(2025, 2, 1)
        );
        assert_eq!(
            next_invoice_date(from, Frequency::Quarterly, None).unwrap(),
            date(2025, 4, 1)
        );
        assert_eq!(
            next_invoice_date(from, Frequency::Annually, None).unwrap(),
            date(2026, 1, 1)
        );
        assert_eq!(
            next_invoice_date(from, Frequency::Custom, Some(45)).unwrap(),
            date(2025, 2, 15)
        );
    }

    #[test]
    fn monthly_clamps_to_month_length() {
        assert_eq!(
            next_invoice_date(date(2025, 1, 31), Frequency::Monthly, None).unwrap(),
            date(2025, 2, 28)
        );
        assert_eq!(
            next_invoice_date(date(2024, 1, 31), Frequency::Monthly, None).unwrap(),
            date(2024, 2, 29)
        );
        assert_eq!(
            next_invoice_date(date(2025, 11, 30), Frequency::Quarterly, None).unwrap(),
            date(2026, 2, 28)
        );
        assert_eq!(
            next_invoice_date(date(2024, 2, 29), Frequency::Annually, None).unwrap(),
            date(2025, 2, 28)
        );
    }

    #[test]
    fn next_date_is_strictly_after_from() {
        let from = date(2025, 6, 15);
        for frequency in [
            Frequency::Weekly,
            Frequency::Biweekly,
            Frequency::Monthly,
            Frequency::Quarterly,
            Frequency::Annually,
        ] {
            let mut current = from;
            for _ in 0..24 {
                let next = next_invoice_date(current, frequency, None).unwrap();
                assert!(next > current, "{frequency}: {next} <= {current}");
                current = next;
            }
        }
    }

    #[test]
    fn custom_requires_days_in_range() {
        let from = date(2025, 1, 1);
        assert!(next_invoice_date(from, Frequency::Custom, None).is_err());
        assert!(next_invoice_date(from, Frequency::Custom, Some(0)).is_err());
        assert!(next_invoice_date(from, Frequency::Custom, Some(-3)).is_err());
        assert!(next_invoice_date(from, Frequency::Custom, Some(366)).is_err());
        assert!(next_invoice_date(from, Frequency::Custom, Some(1)).is_ok());
        assert!(next_invoice_date(from, Frequency::Custom, Some(365)).is_ok());
    }

    #[test]
    fn schedule_has_exact_count_and_is_increasing() {
        let start = date(2025, 1, 1);
        let schedule = invoice_schedule(start, Frequency::Monthly, 12, None).unwrap();

        assert_eq!(schedule.len(), 12);
        assert_eq!(
            schedule[0],
            next_invoice_date(start, Frequency::Monthly, None).unwrap()
        );
        for pair in schedule.windows(2) {
            assert!(pair[1] > pair[0]);
        }
        assert_eq!(schedule[11], date(2026, 1, 1));
    }

    #[test]
    fn stray_custom_days_is_a_validation_error() {
        assert!(validate_frequency(Frequency::Monthly, Some(30)).is_err());
        assert!(validate_frequency(Frequency::Weekly, Some(7)).is_err());
        assert!(validate_frequency(Frequency::Monthly, None).is_ok());
        assert!(validate_frequency(Frequency::Custom, Some(45)).is_ok());
        assert!(validate_frequency(Frequency::Custom, None).is_err());
    }

    #[test]
    fn annual_revenue_per_frequency() {
        let amount = Decimal::from(100);
        assert_eq!(
            estimated_annual_revenue(amount, Frequency::Monthly, None).unwrap(),
            Decimal::from(1200)
        );
        assert_eq!(
            estimated_annual_revenue(amount, Frequency::Quarterly, None).unwrap(),
            Decimal::from(400)
        );
        assert_eq!(
            estimated_annual_revenue(amount, Frequency::Annually, None).unwrap(),
            Decimal::from(100)
        );
        // 100 * 365/7 = 5214.285... -> 5214.29
        assert_eq!(
            estimated_annual_revenue(amount, Frequency::Weekly, None)
                .unwrap()
                .to_string(),
            "5214.29"
        );
    }

    #[test]
    fn annual_revenue_custom_45_days() {
        // 200 * (365/45) = 1622.22...
        let revenue =
            estimated_annual_revenue(Decimal::from(200), Frequency::Custom, Some(45)).unwrap();
        assert_eq!(revenue.to_string(), "1622.22");
    }
}
