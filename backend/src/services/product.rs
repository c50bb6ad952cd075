//! Product registry

use std::sync::Arc;

use serde::Deserialize;
use shared::{
    validate_low_stock_threshold, validate_opening_stock, validate_product_name, Product,
    DEFAULT_LOW_STOCK_THRESHOLD,
};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::clock::Clock;
use crate::services::store::LedgerStore;

/// Input for registering a product
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductInput {
    pub name: String,
    pub opening_stock: Option<i64>,
    pub low_stock_threshold: Option<i64>,
}

#[derive(Clone)]
pub struct ProductService {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl ProductService {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Register a product. The live counter starts at the opening balance,
    /// which is what an empty ledger replays to.
    pub async fn register_product(&self, input: CreateProductInput) -> AppResult<Product> {
        validate_product_name(&input.name).map_err(|msg| AppError::validation("name", msg))?;

        let opening_stock = input.opening_stock.unwrap_or(0);
        validate_opening_stock(opening_stock)
            .map_err(|msg| AppError::validation("opening_stock", msg))?;

        let low_stock_threshold = input.low_stock_threshold.unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD);
        validate_low_stock_threshold(low_stock_threshold)
            .map_err(|msg| AppError::validation("low_stock_threshold", msg))?;

        let now = self.clock.now();
        let product = Product {
            id: Uuid::new_v4(),
            name: input.name.trim().to_string(),
            opening_stock,
            current_stock: opening_stock,
            low_stock_threshold,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.store.create_product(&product).await?;
        info!(product_id = %product.id, name = %product.name, opening_stock, "Product registered");

        Ok(product)
    }

    pub async fn get_product(&self, product_id: Uuid) -> AppResult<Product> {
        self.store
            .get_product(product_id)
            .await?
            .ok_or(AppError::ProductNotFound(product_id))
    }

    pub async fn list_products(&self) -> AppResult<Vec<Product>> {
        self.store.list_products().await
    }
}
