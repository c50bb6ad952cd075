//! HTTP handlers

pub mod health;
pub mod products;
pub mod transactions;

pub use health::*;
pub use products::*;
pub use transactions::*;
