//! Stock ledger models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{DateRange, LedgerPosition};

/// Types of stock-affecting transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Sale,
    /// Product used up during a salon service
    Consumption,
    /// Manual correction, signed
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Sale => "sale",
            TransactionType::Consumption => "consumption",
            TransactionType::Adjustment => "adjustment",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(TransactionType::Purchase),
            "sale" => Ok(TransactionType::Sale),
            "consumption" => Ok(TransactionType::Consumption),
            "adjustment" => Ok(TransactionType::Adjustment),
            other => Err(UnknownVariant {
                kind: "transaction type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entry's business date sits relative to the wall clock at write time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Dated today or yesterday; allowed to drive the live counter
    Current,
    /// Backfilled audit data older than the current window
    Historical,
    /// Dated ahead of the wall clock
    Future,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Current => "current",
            Classification::Historical => "historical",
            Classification::Future => "future",
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(Classification::Current),
            "historical" => Ok(Classification::Historical),
            "future" => Ok(Classification::Future),
            other => Err(UnknownVariant {
                kind: "classification",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored enum value that does not match any known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// One stock-affecting event for a product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub transaction_type: TransactionType,
    /// Business date of the event, may differ from `created_at`
    pub transaction_date: DateTime<Utc>,
    /// Signed change: positive for purchases, negative for sales and consumption
    pub quantity_delta: i64,
    /// Stock immediately after this entry when the ledger is replayed in order
    pub stock_at_transaction: i64,
    pub created_at: DateTime<Utc>,
    /// Store-assigned insertion sequence
    pub seq: i64,
    pub classification: Classification,
    /// POS order the entry belongs to, if any
    pub reference: Option<String>,
    pub notes: Option<String>,
}

impl LedgerEntry {
    pub fn position(&self) -> LedgerPosition {
        LedgerPosition::new(self.transaction_date, self.created_at, self.seq)
    }
}

/// Stock movement totals for a product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockFlow {
    pub product_id: Uuid,
    pub opening_stock: i64,
    pub total_purchases: i64,
    pub total_sales: i64,
    pub total_consumption: i64,
    pub net_adjustments: i64,
    pub net_change: i64,
    /// Stock after the last entry of the whole ledger, future entries included
    pub ledger_closing_stock: i64,
    /// Live counter at the time of the report
    pub current_stock: i64,
    pub entry_count: usize,
    pub current_count: usize,
    pub historical_count: usize,
    pub future_count: usize,
}

impl StockFlow {
    /// Summarise `entries` (already in replay order). When `range` is given only
    /// entries dated inside it count towards the totals.
    pub fn from_entries(
        product_id: Uuid,
        opening_stock: i64,
        current_stock: i64,
        entries: &[LedgerEntry],
        range: Option<&DateRange>,
    ) -> Self {
        let mut flow = StockFlow {
            product_id,
            opening_stock,
            total_purchases: 0,
            total_sales: 0,
            total_consumption: 0,
            net_adjustments: 0,
            net_change: 0,
            ledger_closing_stock: entries
                .last()
                .map(|e| e.stock_at_transaction)
                .unwrap_or(opening_stock),
            current_stock,
            entry_count: 0,
            current_count: 0,
            historical_count: 0,
            future_count: 0,
        };

        let in_range = entries
            .iter()
            .filter(|e| range.map_or(true, |r| r.contains(e.transaction_date)));

        for entry in in_range {
            match entry.transaction_type {
                TransactionType::Purchase => flow.total_purchases += entry.quantity_delta,
                TransactionType::Sale => flow.total_sales += -entry.quantity_delta,
                TransactionType::Consumption => flow.total_consumption += -entry.quantity_delta,
                TransactionType::Adjustment => flow.net_adjustments += entry.quantity_delta,
            }
            match entry.classification {
                Classification::Current => flow.current_count += 1,
                Classification::Historical => flow.historical_count += 1,
                Classification::Future => flow.future_count += 1,
            }
            flow.net_change += entry.quantity_delta;
            flow.entry_count += 1;
        }

        flow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn entry(tx: TransactionType, delta: i64, stock: i64, day: u32, class: Classification) -> LedgerEntry {
        let date = Utc.with_ymd_and_hms(2025, 9, day, 10, 0, 0).unwrap();
        LedgerEntry {
            id: Uuid::new_v4(),
            product_id: Uuid::nil(),
            transaction_type: tx,
            transaction_date: date,
            quantity_delta: delta,
            stock_at_transaction: stock,
            created_at: date,
            seq: day as i64,
            classification: class,
            reference: None,
            notes: None,
        }
    }

    #[test]
    fn test_transaction_type_round_trips_through_str() {
        for tx in [
            TransactionType::Purchase,
            TransactionType::Sale,
            TransactionType::Consumption,
            TransactionType::Adjustment,
        ] {
            assert_eq!(tx.as_str().parse::<TransactionType>().unwrap(), tx);
        }
        assert!("refund".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_classification_serializes_snake_case() {
        let json = serde_json::to_string(&Classification::Historical).unwrap();
        assert_eq!(json, "\"historical\"");
        assert!("stale".parse::<Classification>().is_err());
    }

    #[test]
    fn test_stock_flow_totals() {
        let entries = vec![
            entry(TransactionType::Purchase, 10, 10, 1, Classification::Historical),
            entry(TransactionType::Sale, -3, 7, 2, Classification::Historical),
            entry(TransactionType::Consumption, -2, 5, 3, Classification::Current),
            entry(TransactionType::Adjustment, 1, 6, 4, Classification::Future),
        ];

        let flow = StockFlow::from_entries(Uuid::nil(), 0, 5, &entries, None);

        assert_eq!(flow.total_purchases, 10);
        assert_eq!(flow.total_sales, 3);
        assert_eq!(flow.total_consumption, 2);
        assert_eq!(flow.net_adjustments, 1);
        assert_eq!(flow.net_change, 6);
        assert_eq!(flow.ledger_closing_stock, 6);
        assert_eq!(flow.current_stock, 5);
        assert_eq!(flow.entry_count, 4);
        assert_eq!((flow.current_count, flow.historical_count, flow.future_count), (1, 2, 1));
    }

    #[test]
    fn test_stock_flow_range_filters_totals_only() {
        let entries = vec![
            entry(TransactionType::Purchase, 10, 10, 1, Classification::Historical),
            entry(TransactionType::Sale, -3, 7, 5, Classification::Historical),
        ];
        let start = Utc.with_ymd_and_hms(2025, 9, 4, 0, 0, 0).unwrap();
        let range = DateRange {
            start,
            end: start + Duration::days(2),
        };

        let flow = StockFlow::from_entries(Uuid::nil(), 0, 7, &entries, Some(&range));

        assert_eq!(flow.total_purchases, 0);
        assert_eq!(flow.total_sales, 3);
        assert_eq!(flow.entry_count, 1);
        assert_eq!(flow.ledger_closing_stock, 7);
    }

    #[test]
    fn test_empty_ledger_closes_at_opening_stock() {
        let flow = StockFlow::from_entries(Uuid::nil(), 4, 4, &[], None);
        assert_eq!(flow.ledger_closing_stock, 4);
        assert_eq!(flow.entry_count, 0);
    }
}
