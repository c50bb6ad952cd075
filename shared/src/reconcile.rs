//! Stock reconciliation core
//!
//! A [`ProductLedger`] holds every ledger entry of one product in replay order
//! and keeps two things consistent after each insert, edit or delete:
//!
//! - every entry's `stock_at_transaction` equals the opening balance plus the
//!   deltas of itself and all earlier entries;
//! - the decision of whether the live stock counter moves, returned as a
//!   [`CounterUpdate`] for the caller to persist.
//!
//! Entries are classified against the wall clock passed in as `now`. Only
//! current entries (dated today or yesterday) re-anchor the counter; historical
//! backfills and future-dated entries are recorded with a correct
//! `stock_at_transaction` but leave the counter alone. The exception is time
//! itself: when a stored future entry has since become current (or the other
//! way round), the next mutation re-anchors whatever its own classification.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Classification, LedgerEntry};
use crate::types::LedgerPosition;

/// Entries up to this many whole days old still count as current
pub const CURRENT_WINDOW_DAYS: i64 = 1;

const SECONDS_PER_DAY: i64 = 86_400;
const NANOS_PER_DAY: i64 = SECONDS_PER_DAY * 1_000_000_000;
const MILLIS_PER_DAY: i64 = SECONDS_PER_DAY * 1_000;

/// Whole days between `transaction_date` and `now`, rounded toward negative
/// infinity at full precision: half a second ahead of `now` is already -1.
pub fn days_difference(transaction_date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let elapsed = now - transaction_date;
    match elapsed.num_nanoseconds() {
        Some(nanos) => nanos.div_euclid(NANOS_PER_DAY),
        // Beyond ~292 years nanoseconds overflow; milliseconds are exact enough there
        None => elapsed.num_milliseconds().div_euclid(MILLIS_PER_DAY),
    }
}

/// Classify a business date against the wall clock
pub fn classify(transaction_date: DateTime<Utc>, now: DateTime<Utc>) -> Classification {
    let days = days_difference(transaction_date, now);
    if days < 0 {
        Classification::Future
    } else if days > CURRENT_WINDOW_DAYS {
        Classification::Historical
    } else {
        Classification::Current
    }
}

/// What the caller must do with the live stock counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "value", rename_all = "snake_case")]
pub enum CounterUpdate {
    Unchanged,
    Set(i64),
}

/// Result of one ledger mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerChange {
    /// Entries other than the mutated one whose stock or classification changed,
    /// in replay order
    pub affected: Vec<Uuid>,
    pub counter: CounterUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("ledger entry {0} not found")]
    EntryNotFound(Uuid),

    #[error("ledger entry {0} already exists")]
    DuplicateEntry(Uuid),

    #[error("ledger entry {entry_id} belongs to product {actual}, not {expected}")]
    ForeignEntry {
        entry_id: Uuid,
        expected: Uuid,
        actual: Uuid,
    },

    #[error("stock overflow while replaying entry {0}")]
    Overflow(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error("entry {entry_id} stores stock {stored} but replay gives {expected}")]
    StockMismatch {
        entry_id: Uuid,
        stored: i64,
        expected: i64,
    },

    #[error("live counter {counter} does not match latest non-future stock {expected}")]
    CounterMismatch { counter: i64, expected: i64 },
}

/// A stored `stock_at_transaction` that disagrees with a full replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockMismatch {
    pub entry_id: Uuid,
    pub stored: i64,
    pub expected: i64,
}

/// The ordered ledger of a single product
#[derive(Debug, Clone)]
pub struct ProductLedger {
    product_id: Uuid,
    opening_stock: i64,
    entries: Vec<LedgerEntry>,
}

impl ProductLedger {
    /// Build a ledger from entries in any order
    pub fn new(product_id: Uuid, opening_stock: i64, mut entries: Vec<LedgerEntry>) -> Self {
        entries.sort_by_key(LedgerEntry::position);
        Self {
            product_id,
            opening_stock,
            entries,
        }
    }

    pub fn product_id(&self) -> Uuid {
        self.product_id
    }

    pub fn opening_stock(&self) -> i64 {
        self.opening_stock
    }

    /// Entries in replay order
    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LedgerEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, entry_id: Uuid) -> Option<&LedgerEntry> {
        self.entries.iter().find(|e| e.id == entry_id)
    }

    fn index_of(&self, entry_id: Uuid) -> Option<usize> {
        self.entries.iter().position(|e| e.id == entry_id)
    }

    fn insertion_index(&self, position: LedgerPosition) -> usize {
        self.entries.partition_point(|e| e.position() < position)
    }

    /// The chronologically last entry that is not dated in the future
    pub fn latest_non_future(&self) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.classification != Classification::Future)
    }

    /// Value the live counter should hold: the stock after the latest
    /// non-future entry, or the opening balance when there is none
    pub fn live_stock(&self) -> i64 {
        self.latest_non_future()
            .map(|e| e.stock_at_transaction)
            .unwrap_or(self.opening_stock)
    }

    fn anchor_id(&self) -> Option<Uuid> {
        self.latest_non_future().map(|e| e.id)
    }

    /// Whether re-evaluating at `now` would move any entry into or out of
    /// `Future`, which changes the set the counter is anchored on
    fn crosses_future_line(&self, now: DateTime<Utc>) -> bool {
        self.entries.iter().any(|e| {
            let fresh = classify(e.transaction_date, now);
            fresh != e.classification
                && (fresh == Classification::Future || e.classification == Classification::Future)
        })
    }

    /// Re-evaluate every classification against `now`.
    /// Returns the ids whose classification changed.
    pub fn reclassify(&mut self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut changed = Vec::new();
        for entry in &mut self.entries {
            let classification = classify(entry.transaction_date, now);
            if entry.classification != classification {
                entry.classification = classification;
                changed.push(entry.id);
            }
        }
        changed
    }

    /// Ids whose stored classification is stale at `now`, without changing anything
    pub fn stale_classifications(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.entries
            .iter()
            .filter(|e| classify(e.transaction_date, now) != e.classification)
            .map(|e| e.id)
            .collect()
    }

    /// Recompute `stock_at_transaction` from `start` onward, continuing from the
    /// entry just before it. Returns the ids whose stored value changed.
    fn replay_from(&mut self, start: usize) -> Result<Vec<Uuid>, LedgerError> {
        let mut running = match start.checked_sub(1) {
            Some(prev) => self.entries[prev].stock_at_transaction,
            None => self.opening_stock,
        };

        let mut changed = Vec::new();
        for entry in self.entries.iter_mut().skip(start) {
            running = running
                .checked_add(entry.quantity_delta)
                .ok_or(LedgerError::Overflow(entry.id))?;
            if entry.stock_at_transaction != running {
                entry.stock_at_transaction = running;
                changed.push(entry.id);
            }
        }
        Ok(changed)
    }

    /// Insert a new entry. Its classification and stock are computed here; the
    /// values it arrives with are ignored.
    pub fn insert(
        &mut self,
        mut entry: LedgerEntry,
        now: DateTime<Utc>,
    ) -> Result<LedgerChange, LedgerError> {
        if entry.product_id != self.product_id {
            return Err(LedgerError::ForeignEntry {
                entry_id: entry.id,
                expected: self.product_id,
                actual: entry.product_id,
            });
        }
        if self.index_of(entry.id).is_some() {
            return Err(LedgerError::DuplicateEntry(entry.id));
        }

        let crossed = self.crosses_future_line(now);
        let reclassified = self.reclassify(now);

        entry.classification = classify(entry.transaction_date, now);
        let entry_id = entry.id;
        let is_current = entry.classification == Classification::Current;

        let index = self.insertion_index(entry.position());
        self.entries.insert(index, entry);
        let replayed = self.replay_from(index)?;

        let counter = if is_current || crossed {
            CounterUpdate::Set(self.live_stock())
        } else {
            CounterUpdate::Unchanged
        };

        Ok(LedgerChange {
            affected: self.merge_affected(entry_id, reclassified, replayed),
            counter,
        })
    }

    /// Replace an entry's delta and business date and cascade the change
    pub fn edit(
        &mut self,
        entry_id: Uuid,
        quantity_delta: i64,
        transaction_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<LedgerChange, LedgerError> {
        let old_index = self
            .index_of(entry_id)
            .ok_or(LedgerError::EntryNotFound(entry_id))?;

        let anchor_before = self.anchor_id();
        let crossed = self.crosses_future_line(now);
        let reclassified = self.reclassify(now);

        let mut entry = self.entries.remove(old_index);
        let was_current = entry.classification == Classification::Current;

        entry.quantity_delta = quantity_delta;
        entry.transaction_date = transaction_date;
        entry.classification = classify(transaction_date, now);
        let is_current = entry.classification == Classification::Current;

        let new_index = self.insertion_index(entry.position());
        self.entries.insert(new_index, entry);
        let replayed = self.replay_from(old_index.min(new_index))?;

        let counter = if was_current || is_current || crossed || anchor_before != self.anchor_id() {
            CounterUpdate::Set(self.live_stock())
        } else {
            CounterUpdate::Unchanged
        };

        Ok(LedgerChange {
            affected: self.merge_affected(entry_id, reclassified, replayed),
            counter,
        })
    }

    /// Remove an entry and cascade. Returns the removed entry as it was stored,
    /// with its classification re-evaluated at `now`.
    pub fn remove(
        &mut self,
        entry_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(LedgerEntry, LedgerChange), LedgerError> {
        let index = self
            .index_of(entry_id)
            .ok_or(LedgerError::EntryNotFound(entry_id))?;

        let anchor_before = self.anchor_id();
        let crossed = self.crosses_future_line(now);
        let reclassified = self.reclassify(now);

        let removed = self.entries.remove(index);
        let was_current = removed.classification == Classification::Current;
        let replayed = self.replay_from(index)?;

        let counter = if was_current || crossed || anchor_before != self.anchor_id() {
            CounterUpdate::Set(self.live_stock())
        } else {
            CounterUpdate::Unchanged
        };

        let change = LedgerChange {
            affected: self.merge_affected(entry_id, reclassified, replayed),
            counter,
        };
        Ok((removed, change))
    }

    /// Discard every derived value and replay the whole ledger from the opening
    /// balance. Always re-anchors the counter. Running it twice yields the same
    /// ledger and an empty `affected` list the second time.
    pub fn rebuild(&mut self, now: DateTime<Utc>) -> Result<LedgerChange, LedgerError> {
        let reclassified = self.reclassify(now);
        let replayed = self.replay_from(0)?;

        Ok(LedgerChange {
            affected: self.merge_affected(Uuid::nil(), reclassified, replayed),
            counter: CounterUpdate::Set(self.live_stock()),
        })
    }

    /// Union of the changed id lists, excluding `subject`, in replay order
    fn merge_affected(&self, subject: Uuid, reclassified: Vec<Uuid>, replayed: Vec<Uuid>) -> Vec<Uuid> {
        self.entries
            .iter()
            .map(|e| e.id)
            .filter(|id| *id != subject && (reclassified.contains(id) || replayed.contains(id)))
            .collect()
    }

    /// Every stored stock value that disagrees with a full replay from the opening balance
    pub fn replay_mismatches(&self) -> Vec<StockMismatch> {
        let mut running = self.opening_stock;
        let mut mismatches = Vec::new();
        for entry in &self.entries {
            running = running.saturating_add(entry.quantity_delta);
            if entry.stock_at_transaction != running {
                mismatches.push(StockMismatch {
                    entry_id: entry.id,
                    stored: entry.stock_at_transaction,
                    expected: running,
                });
            }
        }
        mismatches
    }

    /// Check that every stored stock value matches a full replay
    pub fn verify_replay(&self) -> Result<(), IntegrityViolation> {
        match self.replay_mismatches().into_iter().next() {
            Some(m) => Err(IntegrityViolation::StockMismatch {
                entry_id: m.entry_id,
                stored: m.stored,
                expected: m.expected,
            }),
            None => Ok(()),
        }
    }

    /// Check a counter value against the latest non-future entry
    pub fn verify_counter(&self, counter: i64) -> Result<(), IntegrityViolation> {
        let expected = self.live_stock();
        if counter != expected {
            return Err(IntegrityViolation::CounterMismatch { counter, expected });
        }
        Ok(())
    }
}
