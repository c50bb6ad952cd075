//! Route definitions for the salon stock server

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::{handlers, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/products", product_routes())
        .nest("/transactions", transaction_routes())
        .route(
            "/orders/:reference/transactions",
            delete(handlers::delete_order_transactions),
        )
        .route("/recover", post(handlers::recover_all))
}

/// Product registry, reporting and recovery routes
fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_products).post(handlers::create_product))
        .route("/low-stock", get(handlers::low_stock_products))
        .route("/:product_id", get(handlers::get_product))
        .route("/:product_id/ledger", get(handlers::get_ledger))
        .route("/:product_id/stock-flow", get(handlers::get_stock_flow))
        .route("/:product_id/verify", get(handlers::verify_product))
        .route("/:product_id/recover", post(handlers::recover_product))
}

/// Stock transaction routes
fn transaction_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::record_transaction))
        .route(
            "/:entry_id",
            put(handlers::edit_transaction).delete(handlers::delete_transaction),
        )
}
