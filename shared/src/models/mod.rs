//! Domain models for the Salon POS inventory

mod ledger;
mod product;

pub use ledger::*;
pub use product::*;
