//! Shared types and stock reconciliation core for the Salon POS inventory
//!
//! This crate contains the domain model, input validation and the pure
//! ledger replay logic shared between the backend and the browser (via WASM).
//! Nothing in here performs I/O.

pub mod models;
pub mod reconcile;
pub mod types;
pub mod validation;

pub use models::*;
pub use reconcile::*;
pub use types::*;
pub use validation::*;
