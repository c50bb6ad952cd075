//! HTTP handlers for products, their ledgers and recovery

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{parse_transaction_date, DateRange, LedgerEntry, Product, StockFlow};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::product::CreateProductInput;
use crate::services::reconciler::{IntegrityReport, RecoveryOutcome, RecoveryReport};
use crate::services::reporting::StockStatus;
use crate::services::{ProductService, ReportingService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    pub threshold: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct StockFlowQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

impl StockFlowQuery {
    fn range(&self) -> AppResult<Option<DateRange>> {
        if self.from.is_none() && self.to.is_none() {
            return Ok(None);
        }

        let start = match self.from.as_deref() {
            Some(raw) => parse_transaction_date(raw)?,
            None => DateTime::<Utc>::MIN_UTC,
        };
        let end = match self.to.as_deref() {
            Some(raw) => parse_transaction_date(raw)?,
            None => DateTime::<Utc>::MAX_UTC,
        };
        if start > end {
            return Err(AppError::validation("from", "Range start is after range end"));
        }
        Ok(Some(DateRange { start, end }))
    }
}

/// Register a product
pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProductInput>,
) -> AppResult<(StatusCode, Json<Product>)> {
    let service = ProductService::new(state.store, state.clock);
    let product = service.register_product(input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

/// List all products
pub async fn list_products(State(state): State<AppState>) -> AppResult<Json<Vec<Product>>> {
    let service = ProductService::new(state.store, state.clock);
    let products = service.list_products().await?;
    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Product>> {
    let service = ProductService::new(state.store, state.clock);
    let product = service.get_product(product_id).await?;
    Ok(Json(product))
}

/// Products at or below their low-stock threshold
pub async fn low_stock_products(
    State(state): State<AppState>,
    Query(query): Query<LowStockQuery>,
) -> AppResult<Json<Vec<StockStatus>>> {
    let service = ReportingService::new(state.store);
    let products = service.low_stock_products(query.threshold).await?;
    Ok(Json(products))
}

/// A product's ledger in replay order
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<Vec<LedgerEntry>>> {
    let service = ReportingService::new(state.store);
    let entries = service.ledger_for_product(product_id).await?;
    Ok(Json(entries))
}

pub async fn get_stock_flow(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
    Query(query): Query<StockFlowQuery>,
) -> AppResult<Json<StockFlow>> {
    let range = query.range()?;
    let service = ReportingService::new(state.store);
    let flow = service.stock_flow(product_id, range).await?;
    Ok(Json(flow))
}

/// Read-only drift check
pub async fn verify_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<IntegrityReport>> {
    let report = state.reconciler().verify_product(product_id).await?;
    Ok(Json(report))
}

/// Rebuild one product's ledger and counter
pub async fn recover_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> AppResult<Json<RecoveryReport>> {
    let report = state.reconciler().recover_product(product_id).await?;
    Ok(Json(report))
}

/// Rebuild every active product
pub async fn recover_all(State(state): State<AppState>) -> AppResult<Json<Vec<RecoveryOutcome>>> {
    let outcomes = state.reconciler().recover_all().await?;
    Ok(Json(outcomes))
}
