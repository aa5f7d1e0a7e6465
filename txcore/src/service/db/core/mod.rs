//! Core transaction service modules
//!
//! Modular components for transactional execution with clear separation of concerns

pub mod advisory_lock;
pub mod classifier;
pub mod config;
pub mod postgres;
pub mod provider;
pub mod retry;
pub mod transaction;
pub mod types;

pub use advisory_lock::AdvisoryLockManager;
pub use config::TxServiceConfig;
pub use postgres::PgProvider;
pub use retry::RetryPolicy;
pub use transaction::TransactionManager;
pub use types::*;
