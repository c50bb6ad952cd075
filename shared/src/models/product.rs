//! Product and live stock models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Threshold the POS uses for the low-stock badge when none is configured
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 3;

/// A sellable or consumable salon product
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Balance the ledger replay starts from
    pub opening_stock: i64,
    /// Live stock counter. Written only by the reconciler.
    pub current_stock: i64,
    pub low_stock_threshold: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn stock_level(&self) -> StockLevel {
        StockLevel::from_stock(self.current_stock, self.low_stock_threshold)
    }
}

/// Stock level bucket shown next to a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    OutOfStock,
    Low,
    InStock,
}

impl StockLevel {
    pub fn from_stock(stock: i64, threshold: i64) -> Self {
        if stock <= 0 {
            StockLevel::OutOfStock
        } else if stock <= threshold {
            StockLevel::Low
        } else {
            StockLevel::InStock
        }
    }
}

impl std::fmt::Display for StockLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockLevel::OutOfStock => write!(f, "Out of Stock"),
            StockLevel::Low => write!(f, "Low Stock"),
            StockLevel::InStock => write!(f, "In Stock"),
        }
    }
}

/// Whether a counter move took stock from above the threshold to at or below it
pub fn crossed_low_stock(previous: i64, current: i64, threshold: i64) -> bool {
    previous > threshold && current <= threshold
}
