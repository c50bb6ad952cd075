//! Common types used across the platform

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a ledger entry in replay order.
///
/// Entries are replayed by business date first, then by insertion time, and
/// finally by the store-assigned insertion sequence so that two rows written
/// in the same instant still have a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerPosition {
    pub transaction_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

impl LedgerPosition {
    pub fn new(transaction_date: DateTime<Utc>, created_at: DateTime<Utc>, seq: i64) -> Self {
        Self {
            transaction_date,
            created_at,
            seq,
        }
    }
}

/// Date range for queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_position_orders_by_date_then_created_then_seq() {
        let day = Utc.with_ymd_and_hms(2025, 9, 2, 0, 0, 0).unwrap();
        let later = day + Duration::hours(1);

        let a = LedgerPosition::new(day, later, 7);
        let b = LedgerPosition::new(later, day, 1);
        assert!(a < b);

        let c = LedgerPosition::new(day, day, 2);
        let d = LedgerPosition::new(day, later, 1);
        assert!(c < d);

        let e = LedgerPosition::new(day, day, 1);
        assert!(e < c);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let range = DateRange { start, end };

        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + Duration::seconds(1)));
    }
}
