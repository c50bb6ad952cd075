//! Shared fixtures: an in-memory store, a pinned clock and the services on top

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use salon_stock_backend::config::ReconcilerConfig;
use salon_stock_backend::services::product::CreateProductInput;
use salon_stock_backend::services::reconciler::RecordTransactionInput;
use salon_stock_backend::services::{
    Clock, FixedClock, LedgerStore, MemoryLedgerStore, ProductService, ReconcilerService,
    ReportingService,
};
use shared::{Product, TransactionType};
use uuid::Uuid;

/// 2025-10-01 15:30 UTC, mid-afternoon so "tomorrow at midnight" is in the future
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 15, 30, 0).unwrap()
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    start() - Duration::days(days)
}

pub fn settings() -> ReconcilerConfig {
    ReconcilerConfig {
        max_retries: 2,
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 5,
        lock_timeout_ms: 1_000,
        operation_timeout_ms: 5_000,
        max_date_distance_days: 3_650,
    }
}

pub struct Harness {
    pub store: MemoryLedgerStore,
    pub clock: FixedClock,
    pub reconciler: ReconcilerService,
    pub products: ProductService,
    pub reporting: ReportingService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(settings())
    }

    pub fn with_settings(settings: ReconcilerConfig) -> Self {
        let store = MemoryLedgerStore::new();
        let clock = FixedClock::new(start());
        let shared_store: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());

        Self {
            reconciler: ReconcilerService::new(shared_store.clone(), shared_clock.clone(), &settings),
            products: ProductService::new(shared_store.clone(), shared_clock),
            reporting: ReportingService::new(shared_store),
            store,
            clock,
        }
    }

    pub async fn product(&self, name: &str, opening_stock: i64) -> Product {
        self.products
            .register_product(CreateProductInput {
                name: name.to_string(),
                opening_stock: Some(opening_stock),
                low_stock_threshold: None,
            })
            .await
            .unwrap()
    }

    pub async fn current_stock(&self, product_id: Uuid) -> i64 {
        self.products.get_product(product_id).await.unwrap().current_stock
    }
}

pub fn record(
    product_id: Uuid,
    transaction_type: TransactionType,
    quantity: i64,
    date: DateTime<Utc>,
) -> RecordTransactionInput {
    RecordTransactionInput {
        product_id,
        transaction_type,
        quantity,
        transaction_date: Some(date.to_rfc3339()),
        reference: None,
        notes: None,
    }
}

pub fn order_line(
    product_id: Uuid,
    transaction_type: TransactionType,
    quantity: i64,
    reference: &str,
) -> RecordTransactionInput {
    RecordTransactionInput {
        reference: Some(reference.to_string()),
        ..record(product_id, transaction_type, quantity, start())
    }
}
