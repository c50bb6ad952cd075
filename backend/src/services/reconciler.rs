//! Reconciler: the single entry point for every stock mutation
//!
//! Each operation locks one product, rebuilds its ledger in memory, applies the
//! change with [`ProductLedger`], persists every derived value that moved,
//! re-verifies the whole ledger and commits. Any failure drops the open
//! transaction, which rolls it back.
//!
//! The live stock counter can only be written with a [`CounterWrite`] token,
//! and only this module can create one.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use shared::{
    crossed_low_stock, quantity_delta, resolve_transaction_date, validate_reference, Classification,
    CounterUpdate, LedgerEntry, Product, ProductLedger, StockLevel, StockMismatch, TransactionType,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::ReconcilerConfig;
use crate::error::{AppError, AppResult};
use crate::services::clock::Clock;
use crate::services::retry::{timed_out, with_retry, RetryPolicy};
use crate::services::store::{LedgerStore, LedgerTransaction};

/// Permission to write `Product.current_stock`
#[derive(Debug)]
pub struct CounterWrite {
    _sealed: (),
}

impl CounterWrite {
    fn new() -> Self {
        Self { _sealed: () }
    }
}

/// Input for recording a stock transaction
#[derive(Debug, Clone, Deserialize)]
pub struct RecordTransactionInput {
    pub product_id: Uuid,
    pub transaction_type: TransactionType,
    /// Magnitude for purchase, sale and consumption; signed for adjustment
    pub quantity: i64,
    /// Business date; defaults to now
    pub transaction_date: Option<String>,
    /// POS order the transaction belongs to
    pub reference: Option<String>,
    pub notes: Option<String>,
}

/// Input for editing a transaction. Omitted fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EditTransactionInput {
    pub quantity: Option<i64>,
    pub transaction_date: Option<String>,
}

/// Result of a single insert, edit or delete
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub product_id: Uuid,
    pub previous_stock: i64,
    pub current_stock: i64,
    pub counter_updated: bool,
    pub stock_level: StockLevel,
    /// The counter moved from above the low-stock threshold to at or below it
    pub low_stock_crossed: bool,
    /// The inserted, edited or removed entry
    pub entry: LedgerEntry,
    /// Other entries whose stock or classification changed
    pub affected: Vec<LedgerEntry>,
}

/// Result of removing an order's entries from one product
#[derive(Debug, Clone, Serialize)]
pub struct OrderDeletionOutcome {
    pub reference: String,
    pub product_id: Uuid,
    pub previous_stock: i64,
    pub current_stock: i64,
    pub counter_updated: bool,
    pub stock_level: StockLevel,
    pub low_stock_crossed: bool,
    pub removed: Vec<LedgerEntry>,
    pub affected: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReport {
    pub product_id: Uuid,
    pub previous_stock: i64,
    pub current_stock: i64,
    pub counter_updated: bool,
    /// Stored stock values that disagreed with a full replay
    pub mismatches_repaired: usize,
    pub reclassified: usize,
    pub entries_rewritten: usize,
}

/// Per-product result of a bulk recovery
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Recovered(RecoveryReport),
    Failed { product_id: Uuid, error: String },
}

/// Read-only drift diagnosis for one product
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub product_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub entry_count: usize,
    pub current_stock: i64,
    /// Counter value a recovery would set
    pub expected_stock: i64,
    pub mismatches: Vec<StockMismatch>,
    pub stale_classifications: Vec<Uuid>,
    /// Ledger replays cleanly but the counter lags behind it, typically after
    /// a historical entry was backfilled below the latest entry
    pub counter_deferred: bool,
    pub healthy: bool,
}

struct ValidatedRecord {
    product_id: Uuid,
    transaction_type: TransactionType,
    delta: i64,
    transaction_date: DateTime<Utc>,
    reference: Option<String>,
    notes: Option<String>,
}

/// One locked product ledger being mutated
struct Session {
    tx: Box<dyn LedgerTransaction>,
    product: Product,
    ledger: ProductLedger,
    now: DateTime<Utc>,
}

impl Session {
    /// Write the derived fields of `ids` and return the rows as persisted
    async fn persist_derived(&mut self, ids: &[Uuid]) -> AppResult<Vec<LedgerEntry>> {
        let mut rows = Vec::with_capacity(ids.len());
        for entry in ids.iter().filter_map(|id| self.ledger.entry(*id)) {
            self.tx
                .update_stock_at_transaction(entry.id, entry.stock_at_transaction, entry.classification)
                .await?;
            rows.push(entry.clone());
        }
        Ok(rows)
    }

    /// Re-verify the ledger, write the counter if it moves and commit.
    /// Returns the counter before and after.
    async fn commit(mut self, counter: CounterUpdate) -> AppResult<(i64, i64)> {
        self.ledger.verify_replay()?;

        let previous = self.product.current_stock;
        let current = match counter {
            CounterUpdate::Set(value) => {
                self.ledger.verify_counter(value)?;
                value
            }
            CounterUpdate::Unchanged => previous,
        };

        if current != previous {
            self.tx
                .write_current_stock(current, self.now, CounterWrite::new())
                .await?;
        }
        self.tx.commit().await?;
        Ok((previous, current))
    }
}

fn mutation_outcome(
    product: &Product,
    (previous, current): (i64, i64),
    threshold: Option<i64>,
    entry: LedgerEntry,
    affected: Vec<LedgerEntry>,
) -> MutationOutcome {
    let threshold = threshold.unwrap_or(product.low_stock_threshold);
    MutationOutcome {
        product_id: product.id,
        previous_stock: previous,
        current_stock: current,
        counter_updated: previous != current,
        stock_level: StockLevel::from_stock(current, threshold),
        low_stock_crossed: crossed_low_stock(previous, current, threshold),
        entry,
        affected,
    }
}

fn validate_quantity(transaction_type: TransactionType, quantity: i64) -> AppResult<i64> {
    quantity_delta(transaction_type, quantity).map_err(|msg| AppError::validation("quantity", msg))
}

fn missing_entry(entry_id: Uuid) -> AppError {
    AppError::NotFound(format!("Ledger entry {}", entry_id))
}

/// Reconciler service: the only component allowed to move the live counter
#[derive(Clone)]
pub struct ReconcilerService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    settings: ReconcilerConfig,
    retry: RetryPolicy,
}

impl ReconcilerService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, settings: &ReconcilerConfig) -> Self {
        Self {
            store,
            clock,
            retry: RetryPolicy::from_config(settings),
            settings: settings.clone(),
        }
    }

    /// Run `attempt` under the operation deadline, retrying on conflicts
    async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let limit = self.settings.operation_timeout();
        with_retry(&self.retry, operation, || {
            let fut = attempt();
            async move {
                match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(timed_out(operation, limit)),
                }
            }
        })
        .await
    }

    async fn open(&self, product_id: Uuid) -> AppResult<Session> {
        let mut tx = self.store.begin(product_id, self.settings.lock_timeout()).await?;
        let now = self.clock.now();
        let product = tx.product().clone();
        let entries = tx.list_entries().await?;
        let ledger = ProductLedger::new(product.id, product.opening_stock, entries);

        Ok(Session {
            tx,
            product,
            ledger,
            now,
        })
    }

    // ========================================================================
    // Record
    // ========================================================================

    /// Record a purchase, sale, consumption or adjustment
    #[instrument(skip(self, input), fields(product_id = %input.product_id, transaction_type = %input.transaction_type))]
    pub async fn record_transaction(
        &self,
        input: RecordTransactionInput,
        low_stock_threshold: Option<i64>,
    ) -> AppResult<MutationOutcome> {
        let record = self.validate_record(input)?;
        let entry_id = Uuid::new_v4();

        self.run("record_transaction", || {
            self.record_once(entry_id, &record, low_stock_threshold)
        })
        .await
    }

    fn validate_record(&self, input: RecordTransactionInput) -> AppResult<ValidatedRecord> {
        let delta = validate_quantity(input.transaction_type, input.quantity)?;
        let transaction_date = resolve_transaction_date(
            input.transaction_date.as_deref(),
            self.clock.now(),
            self.settings.max_date_distance_days,
        )?;

        let reference = match input.reference {
            Some(raw) => {
                let trimmed = raw.trim().to_string();
                validate_reference(&trimmed).map_err(|msg| AppError::validation("reference", msg))?;
                Some(trimmed)
            }
            None => None,
        };

        Ok(ValidatedRecord {
            product_id: input.product_id,
            transaction_type: input.transaction_type,
            delta,
            transaction_date,
            reference,
            notes: input.notes,
        })
    }

    async fn record_once(
        &self,
        entry_id: Uuid,
        record: &ValidatedRecord,
        threshold: Option<i64>,
    ) -> AppResult<MutationOutcome> {
        let mut session = self.open(record.product_id).await?;
        let seq = session.tx.next_sequence().await?;

        let entry = LedgerEntry {
            id: entry_id,
            product_id: record.product_id,
            transaction_type: record.transaction_type,
            transaction_date: record.transaction_date,
            quantity_delta: record.delta,
            stock_at_transaction: 0,
            created_at: session.now,
            seq,
            classification: Classification::Current,
            reference: record.reference.clone(),
            notes: record.notes.clone(),
        };

        let change = session.ledger.insert(entry, session.now)?;
        let stored = session
            .ledger
            .entry(entry_id)
            .cloned()
            .ok_or_else(|| missing_entry(entry_id))?;
        session.tx.append(&stored).await?;
        let affected = session.persist_derived(&change.affected).await?;

        let product = session.product.clone();
        let counter = session.commit(change.counter).await?;

        info!(
            entry_id = %stored.id,
            classification = %stored.classification,
            stock_at_transaction = stored.stock_at_transaction,
            current_stock = counter.1,
            affected = affected.len(),
            "Transaction recorded"
        );
        Ok(mutation_outcome(&product, counter, threshold, stored, affected))
    }

    // ========================================================================
    // Edit
    // ========================================================================

    /// Change an entry's quantity and/or business date
    #[instrument(skip(self, input))]
    pub async fn edit_transaction(
        &self,
        entry_id: Uuid,
        input: EditTransactionInput,
        low_stock_threshold: Option<i64>,
    ) -> AppResult<MutationOutcome> {
        let transaction_date = match input.transaction_date.as_deref() {
            Some(raw) => Some(resolve_transaction_date(
                Some(raw),
                self.clock.now(),
                self.settings.max_date_distance_days,
            )?),
            None => None,
        };

        let existing = self
            .store
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| missing_entry(entry_id))?;
        if let Some(quantity) = input.quantity {
            validate_quantity(existing.transaction_type, quantity)?;
        }

        self.run("edit_transaction", || {
            self.edit_once(
                existing.product_id,
                entry_id,
                input.quantity,
                transaction_date,
                low_stock_threshold,
            )
        })
        .await
    }

    async fn edit_once(
        &self,
        product_id: Uuid,
        entry_id: Uuid,
        quantity: Option<i64>,
        transaction_date: Option<DateTime<Utc>>,
        threshold: Option<i64>,
    ) -> AppResult<MutationOutcome> {
        let mut session = self.open(product_id).await?;
        let before = session
            .ledger
            .entry(entry_id)
            .cloned()
            .ok_or_else(|| missing_entry(entry_id))?;

        let delta = match quantity {
            Some(quantity) => validate_quantity(before.transaction_type, quantity)?,
            None => before.quantity_delta,
        };
        let date = transaction_date.unwrap_or(before.transaction_date);

        let change = session.ledger.edit(entry_id, delta, date, session.now)?;
        let stored = session
            .ledger
            .entry(entry_id)
            .cloned()
            .ok_or_else(|| missing_entry(entry_id))?;
        session.tx.update_entry(&stored).await?;
        let affected = session.persist_derived(&change.affected).await?;

        let product = session.product.clone();
        let counter = session.commit(change.counter).await?;

        info!(
            %entry_id,
            from = %before.classification,
            to = %stored.classification,
            current_stock = counter.1,
            affected = affected.len(),
            "Transaction edited"
        );
        Ok(mutation_outcome(&product, counter, threshold, stored, affected))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn delete_transaction(
        &self,
        entry_id: Uuid,
        low_stock_threshold: Option<i64>,
    ) -> AppResult<MutationOutcome> {
        let existing = self
            .store
            .find_entry(entry_id)
            .await?
            .ok_or_else(|| missing_entry(entry_id))?;

        self.run("delete_transaction", || {
            self.delete_once(existing.product_id, entry_id, low_stock_threshold)
        })
        .await
    }

    async fn delete_once(
        &self,
        product_id: Uuid,
        entry_id: Uuid,
        threshold: Option<i64>,
    ) -> AppResult<MutationOutcome> {
        let mut session = self.open(product_id).await?;
        if session.ledger.entry(entry_id).is_none() {
            return Err(missing_entry(entry_id));
        }

        let (removed, change) = session.ledger.remove(entry_id, session.now)?;
        session.tx.remove(entry_id).await?;
        let affected = session.persist_derived(&change.affected).await?;

        let product = session.product.clone();
        let counter = session.commit(change.counter).await?;

        info!(
            %entry_id,
            classification = %removed.classification,
            current_stock = counter.1,
            affected = affected.len(),
            "Transaction deleted"
        );
        Ok(mutation_outcome(&product, counter, threshold, removed, affected))
    }

    /// Remove every entry of a deleted POS order, restoring stock.
    /// Each product is one atomic operation; products are processed in id order.
    #[instrument(skip(self))]
    pub async fn delete_by_reference(
        &self,
        reference: &str,
        low_stock_threshold: Option<i64>,
    ) -> AppResult<Vec<OrderDeletionOutcome>> {
        let reference = reference.trim();
        validate_reference(reference).map_err(|msg| AppError::validation("reference", msg))?;

        let products: BTreeSet<Uuid> = self
            .store
            .entries_by_reference(reference)
            .await?
            .iter()
            .map(|e| e.product_id)
            .collect();
        if products.is_empty() {
            return Err(AppError::NotFound(format!("Ledger entries for order {}", reference)));
        }

        let mut outcomes = Vec::with_capacity(products.len());
        for product_id in products {
            let outcome = self
                .run("delete_by_reference", || {
                    self.delete_reference_once(product_id, reference, low_stock_threshold)
                })
                .await?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn delete_reference_once(
        &self,
        product_id: Uuid,
        reference: &str,
        threshold: Option<i64>,
    ) -> AppResult<OrderDeletionOutcome> {
        let mut session = self.open(product_id).await?;
        let ids: Vec<Uuid> = session
            .ledger
            .entries()
            .iter()
            .filter(|e| e.reference.as_deref() == Some(reference))
            .map(|e| e.id)
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        let mut touched = BTreeSet::new();
        let mut re_anchor = false;
        for id in &ids {
            let (entry, change) = session.ledger.remove(*id, session.now)?;
            session.tx.remove(*id).await?;
            re_anchor |= matches!(change.counter, CounterUpdate::Set(_));
            touched.extend(change.affected);
            removed.push(entry);
        }

        let touched: Vec<Uuid> = touched.into_iter().collect();
        let affected = session.persist_derived(&touched).await?;
        let counter = if re_anchor {
            CounterUpdate::Set(session.ledger.live_stock())
        } else {
            CounterUpdate::Unchanged
        };

        let product = session.product.clone();
        let (previous, current) = session.commit(counter).await?;
        let threshold = threshold.unwrap_or(product.low_stock_threshold);

        info!(
            %product_id,
            reference,
            removed = removed.len(),
            current_stock = current,
            "Order entries deleted"
        );
        Ok(OrderDeletionOutcome {
            reference: reference.to_string(),
            product_id,
            previous_stock: previous,
            current_stock: current,
            counter_updated: previous != current,
            stock_level: StockLevel::from_stock(current, threshold),
            low_stock_crossed: crossed_low_stock(previous, current, threshold),
            removed,
            affected,
        })
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    /// Rebuild one product's ledger from its opening balance and re-anchor the
    /// counter. Idempotent.
    #[instrument(skip(self))]
    pub async fn recover_product(&self, product_id: Uuid) -> AppResult<RecoveryReport> {
        self.run("recover_product", || self.recover_once(product_id)).await
    }

    async fn recover_once(&self, product_id: Uuid) -> AppResult<RecoveryReport> {
        let mut session = self.open(product_id).await?;
        let mismatches = session.ledger.replay_mismatches().len();
        let reclassified = session.ledger.stale_classifications(session.now).len();

        let change = session.ledger.rebuild(session.now)?;
        let rewritten = session.persist_derived(&change.affected).await?;
        let (previous, current) = session.commit(change.counter).await?;

        if mismatches > 0 || previous != current {
            warn!(
                %product_id,
                mismatches,
                previous_stock = previous,
                current_stock = current,
                "Repaired stock drift"
            );
        } else {
            info!(%product_id, reclassified, "Product ledger already consistent");
        }

        Ok(RecoveryReport {
            product_id,
            previous_stock: previous,
            current_stock: current,
            counter_updated: previous != current,
            mismatches_repaired: mismatches,
            reclassified,
            entries_rewritten: rewritten.len(),
        })
    }

    /// Recover every active product; a failure is reported and does not stop the rest
    #[instrument(skip(self))]
    pub async fn recover_all(&self) -> AppResult<Vec<RecoveryOutcome>> {
        let products = self.store.list_products().await?;
        let mut outcomes = Vec::with_capacity(products.len());

        for product in products.into_iter().filter(|p| p.is_active) {
            match self.recover_product(product.id).await {
                Ok(report) => outcomes.push(RecoveryOutcome::Recovered(report)),
                Err(err) => {
                    warn!(product_id = %product.id, "Recovery failed: {}", err);
                    outcomes.push(RecoveryOutcome::Failed {
                        product_id: product.id,
                        error: err.to_string(),
                    });
                }
            }
        }
        Ok(outcomes)
    }

    // ========================================================================
    // Verification
    // ========================================================================

    /// Diagnose drift without writing anything or taking the product lock
    #[instrument(skip(self))]
    pub async fn verify_product(&self, product_id: Uuid) -> AppResult<IntegrityReport> {
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or(AppError::ProductNotFound(product_id))?;
        let entries: Vec<LedgerEntry> = self.store.list_for_product(product_id).try_collect().await?;

        let now = self.clock.now();
        let ledger = ProductLedger::new(product.id, product.opening_stock, entries);
        let mismatches = ledger.replay_mismatches();
        let stale_classifications = ledger.stale_classifications(now);

        let mut rebuilt = ledger.clone();
        rebuilt.rebuild(now)?;
        let expected_stock = rebuilt.live_stock();

        let counter_deferred = mismatches.is_empty() && product.current_stock != expected_stock;
        let healthy = mismatches.is_empty()
            && stale_classifications.is_empty()
            && product.current_stock == expected_stock;

        Ok(IntegrityReport {
            product_id,
            checked_at: now,
            entry_count: ledger.len(),
            current_stock: product.current_stock,
            expected_stock,
            mismatches,
            stale_classifications,
            counter_deferred,
            healthy,
        })
    }
}
