//! Reconciler property tests
//!
//! Random sequences of inserts, edits and deletes with arbitrary business
//! dates, driven through the reconciler against the in-memory store:
//! - The stored ledger always replays cleanly from the opening balance
//! - Historical and future inserts never move the live counter
//! - Recovery anchors the counter on the latest non-future entry, idempotently
//! - Rejected input leaves the ledger untouched
//! - With the clock moving between writes, the counter stays anchored as long
//!   as no historical entry is written

mod common;

use chrono::{DateTime, Duration, Utc};
use common::*;
use proptest::prelude::*;
use salon_stock_backend::services::reconciler::EditTransactionInput;
use salon_stock_backend::services::Clock;
use shared::{classify, Classification, TransactionType};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Op {
    Record {
        transaction_type: TransactionType,
        quantity: i64,
        offset_hours: i64,
    },
    Edit {
        pick: usize,
        quantity: Option<i64>,
        offset_hours: Option<i64>,
    },
    Delete {
        pick: usize,
    },
}

fn transaction_type_strategy() -> impl Strategy<Value = TransactionType> {
    prop_oneof![
        Just(TransactionType::Purchase),
        Just(TransactionType::Sale),
        Just(TransactionType::Consumption),
        Just(TransactionType::Adjustment),
    ]
}

/// Business dates from forty days back to three days ahead, in hours
fn offset_strategy() -> impl Strategy<Value = i64> {
    -24 * 40..24 * 3i64
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (transaction_type_strategy(), 1..50i64, offset_strategy()).prop_map(
            |(transaction_type, quantity, offset_hours)| Op::Record {
                transaction_type,
                quantity,
                offset_hours,
            }
        ),
        1 => (any::<usize>(), proptest::option::of(1..50i64), proptest::option::of(offset_strategy()))
            .prop_map(|(pick, quantity, offset_hours)| Op::Edit {
                pick,
                quantity,
                offset_hours,
            }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

async fn apply(h: &Harness, product_id: Uuid, ids: &mut Vec<Uuid>, op: &Op) {
    match op {
        Op::Record {
            transaction_type,
            quantity,
            offset_hours,
        } => {
            let outcome = h
                .reconciler
                .record_transaction(
                    record(
                        product_id,
                        *transaction_type,
                        *quantity,
                        start() + Duration::hours(*offset_hours),
                    ),
                    None,
                )
                .await
                .unwrap();
            ids.push(outcome.entry.id);
        }
        Op::Edit {
            pick,
            quantity,
            offset_hours,
        } => {
            if ids.is_empty() {
                return;
            }
            let entry_id = ids[pick % ids.len()];
            h.reconciler
                .edit_transaction(
                    entry_id,
                    EditTransactionInput {
                        quantity: *quantity,
                        transaction_date: offset_hours
                            .map(|hours| (start() + Duration::hours(hours)).to_rfc3339()),
                    },
                    None,
                )
                .await
                .unwrap();
        }
        Op::Delete { pick } => {
            if ids.is_empty() {
                return;
            }
            let entry_id = ids.remove(pick % ids.len());
            h.reconciler.delete_transaction(entry_id, None).await.unwrap();
        }
    }
}

/// Writes interleaved with the clock moving forward. Dates are hours relative
/// to the clock at the time of the write and never reach the historical window.
#[derive(Debug, Clone)]
enum TimedOp {
    Advance { hours: i64 },
    Record { transaction_type: TransactionType, quantity: i64, offset_hours: i64 },
    Edit { pick: usize, quantity: Option<i64>, offset_hours: Option<i64> },
    Delete { pick: usize },
}

fn recent_offset_strategy() -> impl Strategy<Value = i64> {
    -47..24 * 4i64
}

fn timed_op_strategy() -> impl Strategy<Value = TimedOp> {
    prop_oneof![
        2 => (1..30i64).prop_map(|hours| TimedOp::Advance { hours }),
        3 => (transaction_type_strategy(), 1..50i64, recent_offset_strategy()).prop_map(
            |(transaction_type, quantity, offset_hours)| TimedOp::Record {
                transaction_type,
                quantity,
                offset_hours,
            }
        ),
        1 => (any::<usize>(), proptest::option::of(1..50i64), proptest::option::of(recent_offset_strategy()))
            .prop_map(|(pick, quantity, offset_hours)| TimedOp::Edit {
                pick,
                quantity,
                offset_hours,
            }),
        1 => any::<usize>().prop_map(|pick| TimedOp::Delete { pick }),
    ]
}

/// Apply one timed op. Returns true when it wrote to an entry that is
/// historical at the current clock.
async fn apply_timed(
    h: &Harness,
    product_id: Uuid,
    dates: &mut Vec<(Uuid, DateTime<Utc>)>,
    op: &TimedOp,
) -> bool {
    let now = h.clock.now();
    let is_historical = |date: DateTime<Utc>| classify(date, now) == Classification::Historical;

    match op {
        TimedOp::Advance { hours } => {
            h.clock.advance(Duration::hours(*hours));
            false
        }
        TimedOp::Record {
            transaction_type,
            quantity,
            offset_hours,
        } => {
            let date = now + Duration::hours(*offset_hours);
            let outcome = h
                .reconciler
                .record_transaction(record(product_id, *transaction_type, *quantity, date), None)
                .await
                .unwrap();
            dates.push((outcome.entry.id, date));
            false
        }
        TimedOp::Edit {
            pick,
            quantity,
            offset_hours,
        } => {
            if dates.is_empty() {
                return false;
            }
            let index = pick % dates.len();
            let (entry_id, old_date) = dates[index];
            let new_date = offset_hours.map(|hours| now + Duration::hours(hours));
            h.reconciler
                .edit_transaction(
                    entry_id,
                    EditTransactionInput {
                        quantity: *quantity,
                        transaction_date: new_date.map(|d| d.to_rfc3339()),
                    },
                    None,
                )
                .await
                .unwrap();
            if let Some(date) = new_date {
                dates[index].1 = date;
            }
            is_historical(old_date)
        }
        TimedOp::Delete { pick } => {
            if dates.is_empty() {
                return false;
            }
            let (entry_id, date) = dates.remove(pick % dates.len());
            h.reconciler.delete_transaction(entry_id, None).await.unwrap();
            is_historical(date)
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Entries promoted out of the future by the passing of time are picked up
    /// by the next write, whatever that write touches
    #[test]
    fn prop_counter_follows_clock_without_backfills(
        opening_stock in 0..100i64,
        ops in proptest::collection::vec(timed_op_strategy(), 1..25),
    ) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let product = h.product("Clocked Product", opening_stock).await;
            let mut dates = Vec::new();
            let mut backfilled = false;

            for op in &ops {
                backfilled |= apply_timed(&h, product.id, &mut dates, op).await;
                if matches!(op, TimedOp::Advance { .. }) {
                    continue;
                }

                let report = h.reconciler.verify_product(product.id).await.unwrap();
                prop_assert!(report.mismatches.is_empty(), "{:?} after {:?}", report.mismatches, op);
                prop_assert!(report.stale_classifications.is_empty());
                if !backfilled {
                    prop_assert!(
                        !report.counter_deferred,
                        "counter {} expected {} after {:?}",
                        report.current_stock,
                        report.expected_stock,
                        op
                    );
                }
            }
            Ok(())
        })?;
    }

    /// Every stored stock value equals the replay from the opening balance
    /// after any sequence of mutations, and recovery re-anchors idempotently
    #[test]
    fn prop_ledger_replays_cleanly_after_any_sequence(
        opening_stock in 0..100i64,
        ops in proptest::collection::vec(op_strategy(), 1..20),
    ) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let product = h.product("Property Product", opening_stock).await;
            let mut ids = Vec::new();

            for op in &ops {
                apply(&h, product.id, &mut ids, op).await;
                let report = h.reconciler.verify_product(product.id).await.unwrap();
                prop_assert!(report.mismatches.is_empty(), "{:?} after {:?}", report.mismatches, op);
                prop_assert!(report.stale_classifications.is_empty());
            }

            let first = h.reconciler.recover_product(product.id).await.unwrap();
            prop_assert_eq!(first.mismatches_repaired, 0);

            let ledger = h.reporting.ledger_for_product(product.id).await.unwrap();
            prop_assert_eq!(ledger.len(), ids.len());
            let expected = ledger
                .iter()
                .rev()
                .find(|e| e.classification != Classification::Future)
                .map(|e| e.stock_at_transaction)
                .unwrap_or(opening_stock);
            prop_assert_eq!(first.current_stock, expected);

            let second = h.reconciler.recover_product(product.id).await.unwrap();
            prop_assert!(!second.counter_updated);
            prop_assert_eq!(second.entries_rewritten, 0);
            prop_assert!(h.reconciler.verify_product(product.id).await.unwrap().healthy);
            Ok(())
        })?;
    }

    /// Backdated inserts older than the current window never move the counter
    #[test]
    fn prop_historical_insert_never_moves_counter(
        opening_stock in 0..100i64,
        quantity in 1..50i64,
        days_back in 2..300i64,
        transaction_type in transaction_type_strategy(),
    ) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let product = h.product("Backfill Product", opening_stock).await;
            h.reconciler
                .record_transaction(record(product.id, TransactionType::Purchase, 5, start()), None)
                .await
                .unwrap();
            let before = h.current_stock(product.id).await;

            let outcome = h
                .reconciler
                .record_transaction(record(product.id, transaction_type, quantity, days_ago(days_back)), None)
                .await
                .unwrap();

            prop_assert_eq!(outcome.entry.classification, Classification::Historical);
            prop_assert!(!outcome.counter_updated);
            prop_assert_eq!(h.current_stock(product.id).await, before);
            Ok(())
        })?;
    }

    /// Entries dated after now never move the counter
    #[test]
    fn prop_future_insert_never_moves_counter(
        opening_stock in 0..100i64,
        quantity in 1..50i64,
        hours_ahead in 9..24 * 30i64,
        transaction_type in transaction_type_strategy(),
    ) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let product = h.product("Preorder Product", opening_stock).await;

            let outcome = h
                .reconciler
                .record_transaction(
                    record(product.id, transaction_type, quantity, start() + Duration::hours(hours_ahead)),
                    None,
                )
                .await
                .unwrap();

            prop_assert_eq!(outcome.entry.classification, Classification::Future);
            prop_assert!(!outcome.counter_updated);
            prop_assert_eq!(h.current_stock(product.id).await, opening_stock);
            Ok(())
        })?;
    }

    /// Rejected input leaves the ledger and counter exactly as they were
    #[test]
    fn prop_rejected_input_changes_nothing(
        opening_stock in 0..100i64,
        quantity in -50..=0i64,
        transaction_type in prop_oneof![
            Just(TransactionType::Purchase),
            Just(TransactionType::Sale),
            Just(TransactionType::Consumption),
        ],
    ) {
        tokio_test::block_on(async {
            let h = Harness::new();
            let product = h.product("Guarded Product", opening_stock).await;
            h.reconciler
                .record_transaction(record(product.id, TransactionType::Purchase, 3, start()), None)
                .await
                .unwrap();
            let ledger_before = h.reporting.ledger_for_product(product.id).await.unwrap();

            let result = h
                .reconciler
                .record_transaction(record(product.id, transaction_type, quantity, start()), None)
                .await;

            prop_assert!(result.is_err());
            prop_assert_eq!(h.reporting.ledger_for_product(product.id).await.unwrap(), ledger_before);
            prop_assert_eq!(h.current_stock(product.id).await, opening_stock + 3);
            Ok(())
        })?;
    }
}
