//! HTTP handlers for stock transactions
//!
//! Every handler here goes through the reconciler; none touches the counter.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::services::reconciler::{
    EditTransactionInput, MutationOutcome, OrderDeletionOutcome, RecordTransactionInput,
};
use crate::AppState;

/// Caller-supplied threshold for the `low_stock_crossed` flag
#[derive(Debug, Default, Deserialize)]
pub struct ThresholdQuery {
    pub low_stock_threshold: Option<i64>,
}

/// Record a stock transaction
pub async fn record_transaction(
    State(state): State<AppState>,
    Query(query): Query<ThresholdQuery>,
    Json(input): Json<RecordTransactionInput>,
) -> AppResult<(StatusCode, Json<MutationOutcome>)> {
    let outcome = state
        .reconciler()
        .record_transaction(input, query.low_stock_threshold)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Edit a transaction's quantity or date
pub async fn edit_transaction(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Query(query): Query<ThresholdQuery>,
    Json(input): Json<EditTransactionInput>,
) -> AppResult<Json<MutationOutcome>> {
    let outcome = state
        .reconciler()
        .edit_transaction(entry_id, input, query.low_stock_threshold)
        .await?;
    Ok(Json(outcome))
}

pub async fn delete_transaction(
    State(state): State<AppState>,
    Path(entry_id): Path<Uuid>,
    Query(query): Query<ThresholdQuery>,
) -> AppResult<Json<MutationOutcome>> {
    let outcome = state
        .reconciler()
        .delete_transaction(entry_id, query.low_stock_threshold)
        .await?;
    Ok(Json(outcome))
}

/// Remove every transaction of a deleted POS order
pub async fn delete_order_transactions(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Query(query): Query<ThresholdQuery>,
) -> AppResult<Json<Vec<OrderDeletionOutcome>>> {
    let outcomes = state
        .reconciler()
        .delete_by_reference(&reference, query.low_stock_threshold)
        .await?;
    Ok(Json(outcomes))
}
