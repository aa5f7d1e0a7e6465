//! txcore
//!
//! Transactional execution and advisory-lock core.
//!
//! - [`TransactionManager`] runs a unit of work inside one transaction with
//!   isolation control and transaction-local statement/lock timeouts, and
//!   runs batches of units concurrently in one transaction.
//! - [`execute_with_savepoint`] scopes a rollback to part of an open
//!   transaction.
//! - [`RetryPolicy`] retries transient failures with capped exponential
//!   backoff and jitter; [`classifier`](service::db::core::classifier)
//!   decides what is transient.
//! - [`AdvisoryLockManager`] provides engine-enforced mutual exclusion that
//!   holds across processes.
//!
//! All of them are generic over a [`TransactionProvider`]: [`PgProvider`]
//! for PostgreSQL, or [`MemoryProvider`] for tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use txcore::{DbConfig, DbError, PgProvider, RetryPolicy, TransactionManager, TransactionOptions};
//!
//! # async fn example() -> Result<(), DbError> {
//! let pool = DbConfig::from_env()?.connect().await?;
//! let manager = TransactionManager::new(Arc::new(PgProvider::new(pool)));
//!
//! let moved: u64 = manager
//!     .execute_in_transaction_with_retry(&RetryPolicy::default(), TransactionOptions::default(), |tx| {
//!         Box::pin(async move {
//!             let done = sqlx::query("UPDATE accounts SET balance = balance - 10 WHERE id = 1")
//!                 .execute(tx.as_executor())
//!                 .await?;
//!             Ok::<_, DbError>(done.rows_affected())
//!         })
//!     })
//!     .await?;
//! # let _ = moved;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod logging;
pub mod service;
pub mod tool;

pub use config::DbConfig;
pub use service::db::{
    classify, execute_with_savepoint, is_retryable, is_retryable_code, lock_id_for,
    AdvisoryLockManager, ErrorClass, IsolationLevel, LockConfig, LockSession, LockStats,
    LockToken, MemoryProvider, MemorySession, MemoryTransaction, PgProvider, PgSession,
    PgTransaction, RetryPolicy, SharedTransaction, SqlState, TransactionHandle,
    TransactionManager, TransactionOptions, TransactionProvider, TransactionStats,
    TxServiceConfig, RETRYABLE_SQLSTATES,
};
pub use tool::error::DbError;
