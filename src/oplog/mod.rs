//! Durable operation log.
//!
//! Every applied operation is persisted as one row, total-ordered per
//! document by rowid. The log is the source of truth: an operation is
//! never applied in memory unless its row committed first.

mod log;

pub use log::OperationLog;
