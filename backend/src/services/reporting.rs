//! Read-only reporting over the ledger
//!
//! Nothing here writes to the store.

use std::sync::Arc;

use futures::TryStreamExt;
use serde::Serialize;
use shared::{DateRange, LedgerEntry, Product, StockFlow, StockLevel};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::store::LedgerStore;

/// Stock status of one product for the low-stock view
#[derive(Debug, Clone, Serialize)]
pub struct StockStatus {
    pub product_id: Uuid,
    pub name: String,
    pub current_stock: i64,
    pub threshold: i64,
    pub stock_level: StockLevel,
}

#[derive(Clone)]
pub struct ReportingService {
    store: Arc<dyn LedgerStore>,
}

impl ReportingService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    async fn product(&self, product_id: Uuid) -> AppResult<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or(AppError::ProductNotFound(product_id))
    }

    /// A product's ledger in replay order
    pub async fn ledger_for_product(&self, product_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        self.product(product_id).await?;
        self.store.list_for_product(product_id).try_collect().await
    }

    /// Movement totals, optionally restricted to entries dated inside `range`
    pub async fn stock_flow(&self, product_id: Uuid, range: Option<DateRange>) -> AppResult<StockFlow> {
        let product = self.product(product_id).await?;
        let entries: Vec<LedgerEntry> = self.store.list_for_product(product_id).try_collect().await?;

        Ok(StockFlow::from_entries(
            product.id,
            product.opening_stock,
            product.current_stock,
            &entries,
            range.as_ref(),
        ))
    }

    /// Active products at or below `threshold`, or their own threshold when none is given
    pub async fn low_stock_products(&self, threshold: Option<i64>) -> AppResult<Vec<StockStatus>> {
        if let Some(t) = threshold {
            if t < 0 {
                return Err(AppError::validation("threshold", "Threshold cannot be negative"));
            }
        }

        let mut low: Vec<StockStatus> = self
            .store
            .list_products()
            .await?
            .into_iter()
            .filter(|p| p.is_active)
            .filter_map(|p| {
                let threshold = threshold.unwrap_or(p.low_stock_threshold);
                (p.current_stock <= threshold).then(|| StockStatus {
                    product_id: p.id,
                    stock_level: StockLevel::from_stock(p.current_stock, threshold),
                    name: p.name,
                    current_stock: p.current_stock,
                    threshold,
                })
            })
            .collect();

        low.sort_by(|a, b| a.current_stock.cmp(&b.current_stock).then(a.name.cmp(&b.name)));
        Ok(low)
    }
}
