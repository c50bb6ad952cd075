//! PostgreSQL Ledger Store
//!
//! Per-product serialization uses a row lock on the product
//! (`SELECT ... FOR UPDATE`) bounded by `SET LOCAL lock_timeout`, inside a
//! READ COMMITTED transaction. Readers never take the lock.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use shared::{validate_delta, Classification, LedgerEntry, Product};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerStore, LedgerTransaction};
use crate::error::{AppError, AppResult};
use crate::services::reconciler::CounterWrite;

const PRODUCT_COLUMNS: &str = "id, name, opening_stock, current_stock, low_stock_threshold, \
     is_active, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, product_id, transaction_type, transaction_date, quantity_delta, \
     stock_at_transaction, created_at, seq, classification, reference, notes";

/// Row for product queries
#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    opening_stock: i64,
    current_stock: i64,
    low_stock_threshold: i64,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        Product {
            id: row.id,
            name: row.name,
            opening_stock: row.opening_stock,
            current_stock: row.current_stock,
            low_stock_threshold: row.low_stock_threshold,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Row for ledger queries; enum columns are stored as text
#[derive(Debug, FromRow)]
struct LedgerRow {
    id: Uuid,
    product_id: Uuid,
    transaction_type: String,
    transaction_date: DateTime<Utc>,
    quantity_delta: i64,
    stock_at_transaction: i64,
    created_at: DateTime<Utc>,
    seq: i64,
    classification: String,
    reference: Option<String>,
    notes: Option<String>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let transaction_type = row
            .transaction_type
            .parse()
            .map_err(|e| AppError::Internal(format!("ledger entry {}: {}", row.id, e)))?;
        let classification = row
            .classification
            .parse()
            .map_err(|e| AppError::Internal(format!("ledger entry {}: {}", row.id, e)))?;

        Ok(LedgerEntry {
            id: row.id,
            product_id: row.product_id,
            transaction_type,
            transaction_date: row.transaction_date,
            quantity_delta: row.quantity_delta,
            stock_at_transaction: row.stock_at_transaction,
            created_at: row.created_at,
            seq: row.seq,
            classification,
            reference: row.reference,
            notes: row.notes,
        })
    }
}

fn into_entries(rows: Vec<LedgerRow>) -> AppResult<Vec<LedgerEntry>> {
    rows.into_iter().map(LedgerEntry::try_from).collect()
}

#[derive(Clone)]
pub struct PgLedgerStore {
    db: PgPool,
}

impl PgLedgerStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self, product_id: Uuid, lock_timeout: Duration) -> AppResult<Box<dyn LedgerTransaction>> {
        let mut tx = self.db.begin().await?;

        // SET does not take bind parameters
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        let product = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE id = $1 FOR UPDATE",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::ProductNotFound(product_id))?;

        Ok(Box::new(PgLedgerTransaction {
            tx,
            product: product.into(),
        }))
    }

    async fn create_product(&self, product: &Product) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, opening_stock, current_stock, low_stock_threshold,
                is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(product.id)
        .bind(&product.name)
        .bind(product.opening_stock)
        .bind(product.current_stock)
        .bind(product.low_stock_threshold)
        .bind(product.is_active)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn get_product(&self, product_id: Uuid) -> AppResult<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products WHERE id = $1",
            PRODUCT_COLUMNS
        ))
        .bind(product_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Product::from))
    }

    async fn list_products(&self) -> AppResult<Vec<Product>> {
        let rows = sqlx::query_as::<_, ProductRow>(&format!(
            "SELECT {} FROM products ORDER BY name, id",
            PRODUCT_COLUMNS
        ))
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Product::from).collect())
    }

    async fn find_entry(&self, entry_id: Uuid) -> AppResult<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE id = $1",
            ENTRY_COLUMNS
        ))
        .bind(entry_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(LedgerEntry::try_from).transpose()
    }

    fn list_for_product(&self, product_id: Uuid) -> BoxStream<'_, AppResult<LedgerEntry>> {
        sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, product_id, transaction_type, transaction_date, quantity_delta,
                   stock_at_transaction, created_at, seq, classification, reference, notes
            FROM ledger_entries
            WHERE product_id = $1
            ORDER BY transaction_date, created_at, seq
            "#,
        )
        .bind(product_id)
        .fetch(&self.db)
        .map(|row| row.map_err(AppError::from).and_then(LedgerEntry::try_from))
        .boxed()
    }

    async fn entries_by_reference(&self, reference: &str) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE reference = $1 \
             ORDER BY product_id, transaction_date, created_at, seq",
            ENTRY_COLUMNS
        ))
        .bind(reference)
        .fetch_all(&self.db)
        .await?;

        into_entries(rows)
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }
}

struct PgLedgerTransaction {
    tx: Transaction<'static, Postgres>,
    product: Product,
}

fn expect_one_row(rows_affected: u64, entry_id: Uuid) -> AppResult<()> {
    if rows_affected == 0 {
        return Err(AppError::NotFound(format!("Ledger entry {}", entry_id)));
    }
    Ok(())
}

#[async_trait]
impl LedgerTransaction for PgLedgerTransaction {
    fn product(&self) -> &Product {
        &self.product
    }

    async fn list_entries(&mut self) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE product_id = $1 \
             ORDER BY transaction_date, created_at, seq",
            ENTRY_COLUMNS
        ))
        .bind(self.product.id)
        .fetch_all(&mut *self.tx)
        .await?;

        into_entries(rows)
    }

    async fn next_sequence(&mut self) -> AppResult<i64> {
        let seq = sqlx::query_scalar::<_, i64>(
            "SELECT nextval(pg_get_serial_sequence('ledger_entries', 'seq'))",
        )
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(seq)
    }

    async fn append(&mut self, entry: &LedgerEntry) -> AppResult<Uuid> {
        validate_delta(entry.transaction_type, entry.quantity_delta)
            .map_err(|msg| AppError::validation("quantity", msg))?;

        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO ledger_entries (
                id, product_id, transaction_type, transaction_date, quantity_delta,
                stock_at_transaction, created_at, seq, classification, reference, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(entry.id)
        .bind(entry.product_id)
        .bind(entry.transaction_type.as_str())
        .bind(entry.transaction_date)
        .bind(entry.quantity_delta)
        .bind(entry.stock_at_transaction)
        .bind(entry.created_at)
        .bind(entry.seq)
        .bind(entry.classification.as_str())
        .bind(&entry.reference)
        .bind(&entry.notes)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(id)
    }

    async fn update_entry(&mut self, entry: &LedgerEntry) -> AppResult<()> {
        validate_delta(entry.transaction_type, entry.quantity_delta)
            .map_err(|msg| AppError::validation("quantity", msg))?;

        let result = sqlx::query(
            r#"
            UPDATE ledger_entries
            SET quantity_delta = $2, transaction_date = $3, stock_at_transaction = $4,
                classification = $5, notes = $6
            WHERE id = $1 AND product_id = $7
            "#,
        )
        .bind(entry.id)
        .bind(entry.quantity_delta)
        .bind(entry.transaction_date)
        .bind(entry.stock_at_transaction)
        .bind(entry.classification.as_str())
        .bind(&entry.notes)
        .bind(self.product.id)
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(result.rows_affected(), entry.id)
    }

    async fn update_stock_at_transaction(
        &mut self,
        entry_id: Uuid,
        value: i64,
        classification: Classification,
    ) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE ledger_entries SET stock_at_transaction = $2, classification = $3 \
             WHERE id = $1 AND product_id = $4",
        )
        .bind(entry_id)
        .bind(value)
        .bind(classification.as_str())
        .bind(self.product.id)
        .execute(&mut *self.tx)
        .await?;

        expect_one_row(result.rows_affected(), entry_id)
    }

    async fn remove(&mut self, entry_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM ledger_entries WHERE id = $1 AND product_id = $2")
            .bind(entry_id)
            .bind(self.product.id)
            .execute(&mut *self.tx)
            .await?;

        expect_one_row(result.rows_affected(), entry_id)
    }

    async fn write_current_stock(
        &mut self,
        value: i64,
        updated_at: DateTime<Utc>,
        _token: CounterWrite,
    ) -> AppResult<()> {
        sqlx::query("UPDATE products SET current_stock = $2, updated_at = $3 WHERE id = $1")
            .bind(self.product.id)
            .bind(value)
            .bind(updated_at)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }
}
