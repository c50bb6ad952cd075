//! WebAssembly module for the salon POS stock screens
//!
//! Provides client-side computation for:
//! - Transaction date classification
//! - Stock level labels
//! - Replay previews of draft transactions before they are submitted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::reconcile::*;
pub use shared::types::*;
pub use shared::validation::*;

/// Initialize the WASM module
#[wasm_bindgen(start)]
pub fn init() {
    // Set up panic hook for better error messages in browser console
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

fn parse_date(raw: &str) -> Result<DateTime<Utc>, JsValue> {
    parse_transaction_date(raw).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Classify a transaction date relative to `now` as "current", "historical" or "future"
#[wasm_bindgen]
pub fn classify_transaction_date(transaction_date: &str, now: &str) -> Result<String, JsValue> {
    let classification = classify(parse_date(transaction_date)?, parse_date(now)?);
    Ok(classification.to_string())
}

/// Label shown next to a product's stock figure
#[wasm_bindgen]
pub fn stock_level_label(current_stock: i64, threshold: i64) -> String {
    match StockLevel::from_stock(current_stock, threshold) {
        StockLevel::Low => format!("Low Stock ({})", current_stock),
        level => level.to_string(),
    }
}

/// A transaction typed into the POS but not yet submitted
#[derive(Debug, Deserialize)]
struct DraftLine {
    transaction_type: TransactionType,
    quantity: i64,
    transaction_date: String,
}

#[derive(Debug, Serialize)]
struct PreviewLine {
    /// Position of the line in the submitted array
    line: usize,
    classification: Classification,
    stock_at_transaction: i64,
}

/// Replay draft lines from `opening_stock` and return each line's resulting
/// stock, in ledger order, as JSON
#[wasm_bindgen]
pub fn preview_replay(lines_json: &str, opening_stock: i64, now: &str) -> Result<String, JsValue> {
    let lines: Vec<DraftLine> = serde_json::from_str(lines_json)
        .map_err(|e| JsValue::from_str(&format!("Invalid lines JSON: {}", e)))?;
    let now = parse_date(now)?;

    let mut entries = Vec::with_capacity(lines.len());
    for (line, draft) in lines.into_iter().enumerate() {
        let delta = quantity_delta(draft.transaction_type, draft.quantity)
            .map_err(|e| JsValue::from_str(&format!("Line {}: {}", line, e)))?;
        entries.push(LedgerEntry {
            id: Uuid::from_u128(line as u128 + 1),
            product_id: Uuid::nil(),
            transaction_type: draft.transaction_type,
            transaction_date: parse_date(&draft.transaction_date)?,
            quantity_delta: delta,
            stock_at_transaction: 0,
            created_at: now,
            seq: line as i64,
            classification: Classification::Current,
            reference: None,
            notes: None,
        });
    }

    let mut ledger = ProductLedger::new(Uuid::nil(), opening_stock, entries);
    ledger
        .rebuild(now)
        .map_err(|e| JsValue::from_str(&e.to_string()))?;

    let preview: Vec<PreviewLine> = ledger
        .entries()
        .iter()
        .map(|e| PreviewLine {
            line: e.seq as usize,
            classification: e.classification,
            stock_at_transaction: e.stock_at_transaction,
        })
        .collect();

    serde_json::to_string(&preview).map_err(|e| JsValue::from_str(&e.to_string()))
}
