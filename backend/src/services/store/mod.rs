//! Ledger Store: durable storage of products and their ledger entries
//!
//! Reads go straight to the store and never take the per-product lock.
//! Every mutation goes through a [`LedgerTransaction`] obtained from
//! [`LedgerStore::begin`], which holds the product's exclusive lock until it is
//! committed or dropped. Dropping an uncommitted transaction rolls it back.

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use shared::{Classification, LedgerEntry, Product};
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::reconciler::CounterWrite;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open an atomic unit of work on one product, waiting at most
    /// `lock_timeout` for its exclusive lock.
    ///
    /// Fails with `ProductNotFound` for an unknown product and with
    /// `ConcurrencyConflict` when the lock cannot be taken in time.
    async fn begin(&self, product_id: Uuid, lock_timeout: Duration) -> AppResult<Box<dyn LedgerTransaction>>;

    /// Insert a new product. Its `current_stock` is taken as given.
    async fn create_product(&self, product: &Product) -> AppResult<()>;

    async fn get_product(&self, product_id: Uuid) -> AppResult<Option<Product>>;

    async fn list_products(&self) -> AppResult<Vec<Product>>;

    async fn find_entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>>;

    /// All entries of a product in replay order. Restartable: every call starts a fresh read.
    fn list_for_product(&self, product_id: Uuid) -> BoxStream<'_, AppResult<LedgerEntry>>;

    /// Entries tagged with a POS order reference, across products
    async fn entries_by_reference(&self, reference: &str) -> AppResult<Vec<LedgerEntry>>;

    /// Connectivity check for the health endpoint
    async fn ping(&self) -> AppResult<()>;
}

/// Writes staged against one locked product
#[async_trait]
pub trait LedgerTransaction: Send {
    /// The product row as read when the lock was taken
    fn product(&self) -> &Product;

    /// Entries of the locked product, as seen by this transaction
    async fn list_entries(&mut self) -> AppResult<Vec<LedgerEntry>>;

    /// Reserve the next insertion sequence number. Sequence numbers are never
    /// reused, even when the transaction rolls back.
    async fn next_sequence(&mut self) -> AppResult<i64>;

    /// Insert a new entry. Rejects deltas inconsistent with the transaction
    /// type and entries of other products with `Validation`.
    async fn append(&mut self, entry: &LedgerEntry) -> AppResult<Uuid>;

    /// Rewrite an entry's delta, business date and derived fields after an edit
    async fn update_entry(&mut self, entry: &LedgerEntry) -> AppResult<()>;

    /// Rewrite only the derived fields during a recomputation cascade
    async fn update_stock_at_transaction(
        &mut self,
        entry_id: Uuid,
        value: i64,
        classification: Classification,
    ) -> AppResult<()>;

    async fn remove(&mut self, entry_id: Uuid) -> AppResult<()>;

    /// Set the live stock counter. Only the reconciler can produce a [`CounterWrite`].
    async fn write_current_stock(
        &mut self,
        value: i64,
        updated_at: DateTime<Utc>,
        token: CounterWrite,
    ) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;
}
