//! Business logic services for the salon stock server

pub mod clock;
pub mod product;
pub mod reconciler;
pub mod reporting;
pub mod retry;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use product::ProductService;
pub use reconciler::ReconcilerService;
pub use reporting::ReportingService;
pub use store::{LedgerStore, LedgerTransaction, MemoryLedgerStore, PgLedgerStore};
