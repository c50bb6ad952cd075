//! In-process Ledger Store
//!
//! Used by `storage.backend = "memory"` and by the integration tests. It keeps
//! the same contract as the PostgreSQL store: one writer per product, staged
//! writes that only become visible on commit, and rollback on drop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};
use shared::{validate_delta, Classification, LedgerEntry, Product};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{LedgerStore, LedgerTransaction};
use crate::error::{AppError, AppResult};
use crate::services::reconciler::CounterWrite;

#[derive(Default)]
struct MemoryState {
    products: HashMap<Uuid, Product>,
    entries: HashMap<Uuid, LedgerEntry>,
    last_seq: i64,
}

fn lock_state(state: &Mutex<MemoryState>) -> AppResult<MutexGuard<'_, MemoryState>> {
    state
        .lock()
        .map_err(|_| AppError::Internal("memory store state poisoned".to_string()))
}

fn sorted(mut entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    entries.sort_by_key(LedgerEntry::position);
    entries
}

#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
    locks: Arc<DashMap<Uuid, Arc<AsyncMutex<()>>>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a stored `stock_at_transaction` without going through the
    /// reconciler. Simulates drift left behind by an out-of-band writer.
    pub fn simulate_drift(&self, entry_id: Uuid, stock_at_transaction: i64) -> AppResult<()> {
        let mut state = lock_state(&self.state)?;
        let entry = state
            .entries
            .get_mut(&entry_id)
            .ok_or_else(|| AppError::NotFound(format!("Ledger entry {}", entry_id)))?;
        entry.stock_at_transaction = stock_at_transaction;
        Ok(())
    }

    fn product_lock(&self, product_id: Uuid) -> Arc<AsyncMutex<()>> {
        self.locks.entry(product_id).or_default().clone()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self, product_id: Uuid, lock_timeout: Duration) -> AppResult<Box<dyn LedgerTransaction>> {
        let guard = tokio::time::timeout(lock_timeout, self.product_lock(product_id).lock_owned())
            .await
            .map_err(|_| {
                AppError::ConcurrencyConflict(format!(
                    "product {} is locked by another writer",
                    product_id
                ))
            })?;

        let (product, entries) = {
            let state = lock_state(&self.state)?;
            let product = state
                .products
                .get(&product_id)
                .cloned()
                .ok_or(AppError::ProductNotFound(product_id))?;
            let entries: HashMap<Uuid, LedgerEntry> = state
                .entries
                .values()
                .filter(|e| e.product_id == product_id)
                .map(|e| (e.id, e.clone()))
                .collect();
            (product, entries)
        };

        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            _guard: guard,
            product,
            entries,
            counter: None,
        }))
    }

    async fn create_product(&self, product: &Product) -> AppResult<()> {
        let mut state = lock_state(&self.state)?;
        if state.products.contains_key(&product.id) {
            return Err(AppError::DuplicateEntry("product id".to_string()));
        }
        state.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn get_product(&self, product_id: Uuid) -> AppResult<Option<Product>> {
        Ok(lock_state(&self.state)?.products.get(&product_id).cloned())
    }

    async fn list_products(&self) -> AppResult<Vec<Product>> {
        let mut products: Vec<Product> = lock_state(&self.state)?.products.values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(products)
    }

    async fn find_entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        Ok(lock_state(&self.state)?.entries.get(&entry_id).cloned())
    }

    fn list_for_product(&self, product_id: Uuid) -> BoxStream<'_, AppResult<LedgerEntry>> {
        let snapshot = lock_state(&self.state).map(|state| {
            sorted(
                state
                    .entries
                    .values()
                    .filter(|e| e.product_id == product_id)
                    .cloned()
                    .collect(),
            )
        });

        match snapshot {
            Ok(entries) => stream::iter(entries.into_iter().map(Ok)).boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }

    async fn entries_by_reference(&self, reference: &str) -> AppResult<Vec<LedgerEntry>> {
        let state = lock_state(&self.state)?;
        Ok(sorted(
            state
                .entries
                .values()
                .filter(|e| e.reference.as_deref() == Some(reference))
                .cloned()
                .collect(),
        ))
    }

    async fn ping(&self) -> AppResult<()> {
        lock_state(&self.state).map(|_| ())
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    _guard: OwnedMutexGuard<()>,
    product: Product,
    /// Working copy of the product's entries, published on commit
    entries: HashMap<Uuid, LedgerEntry>,
    counter: Option<(i64, DateTime<Utc>)>,
}

impl MemoryTransaction {
    fn entry_mut(&mut self, entry_id: Uuid) -> AppResult<&mut LedgerEntry> {
        self.entries
            .get_mut(&entry_id)
            .ok_or_else(|| AppError::NotFound(format!("Ledger entry {}", entry_id)))
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    fn product(&self) -> &Product {
        &self.product
    }

    async fn list_entries(&mut self) -> AppResult<Vec<LedgerEntry>> {
        Ok(sorted(self.entries.values().cloned().collect()))
    }

    async fn next_sequence(&mut self) -> AppResult<i64> {
        let mut state = lock_state(&self.state)?;
        state.last_seq += 1;
        Ok(state.last_seq)
    }

    async fn append(&mut self, entry: &LedgerEntry) -> AppResult<Uuid> {
        if entry.product_id != self.product.id {
            return Err(AppError::validation(
                "product_id",
                "Entry does not belong to the locked product",
            ));
        }
        validate_delta(entry.transaction_type, entry.quantity_delta)
            .map_err(|msg| AppError::validation("quantity", msg))?;
        if self.entries.contains_key(&entry.id) {
            return Err(AppError::DuplicateEntry("ledger entry id".to_string()));
        }

        self.entries.insert(entry.id, entry.clone());
        Ok(entry.id)
    }

    async fn update_entry(&mut self, entry: &LedgerEntry) -> AppResult<()> {
        validate_delta(entry.transaction_type, entry.quantity_delta)
            .map_err(|msg| AppError::validation("quantity", msg))?;
        let stored = self.entry_mut(entry.id)?;
        *stored = entry.clone();
        Ok(())
    }

    async fn update_stock_at_transaction(
        &mut self,
        entry_id: Uuid,
        value: i64,
        classification: Classification,
    ) -> AppResult<()> {
        let stored = self.entry_mut(entry_id)?;
        stored.stock_at_transaction = value;
        stored.classification = classification;
        Ok(())
    }

    async fn remove(&mut self, entry_id: Uuid) -> AppResult<()> {
        self.entries
            .remove(&entry_id)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Ledger entry {}", entry_id)))
    }

    async fn write_current_stock(
        &mut self,
        value: i64,
        updated_at: DateTime<Utc>,
        _token: CounterWrite,
    ) -> AppResult<()> {
        self.counter = Some((value, updated_at));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryTransaction {
            state,
            _guard,
            product,
            entries,
            counter,
        } = *self;

        let mut state = lock_state(&state)?;
        state.entries.retain(|_, e| e.product_id != product.id);
        state.entries.extend(entries);

        if let Some((value, updated_at)) = counter {
            let stored = state
                .products
                .get_mut(&product.id)
                .ok_or(AppError::ProductNotFound(product.id))?;
            stored.current_stock = value;
            stored.updated_at = updated_at;
        }
        Ok(())
    }
}
