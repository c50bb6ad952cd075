//! Validation utilities for the Salon POS inventory
//!
//! Input checks run before anything is written: quantities, product fields and
//! the business date of a transaction.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use thiserror::Error;

use crate::models::TransactionType;

/// Largest quantity accepted for a single transaction or opening balance
pub const MAX_QUANTITY: i64 = 1_000_000;

pub const MAX_PRODUCT_NAME_LEN: usize = 200;

pub const MAX_REFERENCE_LEN: usize = 100;

// ============================================================================
// Quantity Validations
// ============================================================================

/// Turn a user-entered quantity into the signed ledger delta for `transaction_type`.
///
/// Purchases, sales and consumption take a positive magnitude and derive the
/// sign from the type. Adjustments are already signed and may be zero, which
/// records a recount without moving stock.
pub fn quantity_delta(transaction_type: TransactionType, quantity: i64) -> Result<i64, &'static str> {
    if quantity.unsigned_abs() > MAX_QUANTITY as u64 {
        return Err("Quantity exceeds the maximum allowed");
    }

    match transaction_type {
        TransactionType::Adjustment => Ok(quantity),
        _ if quantity == 0 => Err("Quantity must be non-zero"),
        _ if quantity < 0 => Err("Quantity must be positive"),
        TransactionType::Purchase => Ok(quantity),
        TransactionType::Sale | TransactionType::Consumption => Ok(-quantity),
    }
}

/// Check that a stored delta is consistent with its transaction type
pub fn validate_delta(transaction_type: TransactionType, delta: i64) -> Result<(), &'static str> {
    if delta.unsigned_abs() > MAX_QUANTITY as u64 {
        return Err("Quantity exceeds the maximum allowed");
    }

    match transaction_type {
        TransactionType::Adjustment => Ok(()),
        _ if delta == 0 => Err("Quantity must be non-zero"),
        TransactionType::Purchase if delta < 0 => Err("Purchase must increase stock"),
        TransactionType::Sale | TransactionType::Consumption if delta > 0 => {
            Err("Sale and consumption must decrease stock")
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Product Validations
// ============================================================================

pub fn validate_product_name(name: &str) -> Result<(), &'static str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Product name is required");
    }
    if trimmed.chars().count() > MAX_PRODUCT_NAME_LEN {
        return Err("Product name must be at most 200 characters");
    }
    Ok(())
}

pub fn validate_opening_stock(opening_stock: i64) -> Result<(), &'static str> {
    if opening_stock < 0 {
        return Err("Opening stock cannot be negative");
    }
    if opening_stock > MAX_QUANTITY {
        return Err("Opening stock exceeds the maximum allowed");
    }
    Ok(())
}

pub fn validate_low_stock_threshold(threshold: i64) -> Result<(), &'static str> {
    if threshold < 0 {
        return Err("Low stock threshold cannot be negative");
    }
    if threshold > MAX_QUANTITY {
        return Err("Low stock threshold exceeds the maximum allowed");
    }
    Ok(())
}

/// Validate a POS order reference
pub fn validate_reference(reference: &str) -> Result<(), &'static str> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return Err("Reference cannot be empty");
    }
    if trimmed.chars().count() > MAX_REFERENCE_LEN {
        return Err("Reference must be at most 100 characters");
    }
    Ok(())
}

// ============================================================================
// Date Validations
// ============================================================================

/// Errors raised while reading a transaction date
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("unparsable transaction date: {0:?}")]
    Unparsable(String),

    #[error("transaction date {date} is more than {max_days} days from now")]
    OutOfRange { date: DateTime<Utc>, max_days: i64 },
}

/// Parse a transaction date.
///
/// Accepts RFC 3339 timestamps, `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS`
/// (read as UTC) and the date-only forms `YYYY-MM-DD` and `DD/MM/YYYY`, which
/// resolve to midnight UTC.
pub fn parse_transaction_date(input: &str) -> Result<DateTime<Utc>, DateError> {
    let trimmed = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
        }
    }

    Err(DateError::Unparsable(trimmed.to_string()))
}

/// Reject dates further than `max_days` from `now` in either direction
pub fn validate_date_distance(
    date: DateTime<Utc>,
    now: DateTime<Utc>,
    max_days: i64,
) -> Result<(), DateError> {
    if (date - now).num_days().abs() > max_days {
        return Err(DateError::OutOfRange { date, max_days });
    }
    Ok(())
}

/// Resolve an optional user-supplied date; a missing date means "now"
pub fn resolve_transaction_date(
    input: Option<&str>,
    now: DateTime<Utc>,
    max_days: i64,
) -> Result<DateTime<Utc>, DateError> {
    let date = match input {
        Some(raw) => parse_transaction_date(raw)?,
        None => now,
    };
    validate_date_distance(date, now, max_days)?;
    Ok(date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    // ========================================================================
    // Quantity Validation Tests
    // ========================================================================

    #[test]
    fn test_quantity_delta_signs() {
        assert_eq!(quantity_delta(TransactionType::Purchase, 10), Ok(10));
        assert_eq!(quantity_delta(TransactionType::Sale, 5), Ok(-5));
        assert_eq!(quantity_delta(TransactionType::Consumption, 2), Ok(-2));
        assert_eq!(quantity_delta(TransactionType::Adjustment, -4), Ok(-4));
    }

    #[test]
    fn test_quantity_delta_rejects_zero_except_adjustment() {
        assert!(quantity_delta(TransactionType::Purchase, 0).is_err());
        assert!(quantity_delta(TransactionType::Sale, 0).is_err());
        assert!(quantity_delta(TransactionType::Consumption, 0).is_err());
        assert_eq!(quantity_delta(TransactionType::Adjustment, 0), Ok(0));
    }

    #[test]
    fn test_quantity_delta_rejects_negative_magnitude() {
        assert!(quantity_delta(TransactionType::Purchase, -1).is_err());
        assert!(quantity_delta(TransactionType::Sale, -1).is_err());
    }

    #[test]
    fn test_quantity_delta_rejects_huge_values() {
        assert!(quantity_delta(TransactionType::Purchase, MAX_QUANTITY + 1).is_err());
        assert!(quantity_delta(TransactionType::Adjustment, -MAX_QUANTITY - 1).is_err());
        assert!(quantity_delta(TransactionType::Purchase, MAX_QUANTITY).is_ok());
    }

    #[test]
    fn test_validate_delta() {
        assert!(validate_delta(TransactionType::Purchase, 3).is_ok());
        assert!(validate_delta(TransactionType::Purchase, -3).is_err());
        assert!(validate_delta(TransactionType::Sale, 3).is_err());
        assert!(validate_delta(TransactionType::Consumption, 0).is_err());
        assert!(validate_delta(TransactionType::Adjustment, 0).is_ok());
    }

    // ========================================================================
    // Product Validation Tests
    // ========================================================================

    #[test]
    fn test_validate_product_name() {
        assert!(validate_product_name("Keratin Shampoo 500ml").is_ok());
        assert!(validate_product_name("   ").is_err());
        assert!(validate_product_name(&"x".repeat(201)).is_err());
        assert!(validate_product_name(&"x".repeat(200)).is_ok());
    }

    #[test]
    fn test_validate_opening_stock_and_threshold() {
        assert!(validate_opening_stock(0).is_ok());
        assert!(validate_opening_stock(-1).is_err());
        assert!(validate_low_stock_threshold(3).is_ok());
        assert!(validate_low_stock_threshold(-3).is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("ORD-2025-0042").is_ok());
        assert!(validate_reference("").is_err());
        assert!(validate_reference(&"9".repeat(101)).is_err());
    }

    // ========================================================================
    // Date Validation Tests
    // ========================================================================

    #[test]
    fn test_parse_rfc3339() {
        let parsed = parse_transaction_date("2025-09-02T06:09:41.364Z").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 9, 2, 6, 9, 41).unwrap() + Duration::milliseconds(364));

        let offset = parse_transaction_date("2025-09-02T11:30:00+05:30").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2025, 9, 2, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_date_only_forms_resolve_to_midnight() {
        let midnight = Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 0).unwrap();
        assert_eq!(parse_transaction_date("2025-09-02").unwrap(), midnight);
        assert_eq!(parse_transaction_date("02/09/2025").unwrap(), midnight);
        assert_eq!(parse_transaction_date(" 2025-09-02 ").unwrap(), midnight);
    }

    #[test]
    fn test_parse_naive_datetime() {
        let expected = Utc.with_ymd_and_hms(2025, 9, 2, 14, 15, 0).unwrap();
        assert_eq!(parse_transaction_date("2025-09-02 14:15:00").unwrap(), expected);
        assert_eq!(parse_transaction_date("2025-09-02T14:15:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_transaction_date("yesterday"), Err(DateError::Unparsable(_))));
        assert!(matches!(parse_transaction_date(""), Err(DateError::Unparsable(_))));
        assert!(matches!(parse_transaction_date("2025-02-30"), Err(DateError::Unparsable(_))));
    }

    #[test]
    fn test_date_distance() {
        let now = Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap();
        assert!(validate_date_distance(now - Duration::days(3650), now, 3650).is_ok());
        assert!(matches!(
            validate_date_distance(now - Duration::days(3651), now, 3650),
            Err(DateError::OutOfRange { .. })
        ));
        assert!(validate_date_distance(now + Duration::days(3651), now, 3650).is_err());
    }

    #[test]
    fn test_resolve_defaults_to_now() {
        let now = Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap();
        assert_eq!(resolve_transaction_date(None, now, 10).unwrap(), now);
        assert!(resolve_transaction_date(Some("1999-01-01"), now, 10).is_err());
    }
}
