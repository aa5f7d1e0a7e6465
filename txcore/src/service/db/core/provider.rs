//! Connection/transaction provider seam
//!
//! The core never talks to a pool directly. It asks a [`TransactionProvider`]
//! for transactions and for dedicated lock sessions, so the same managers run
//! against PostgreSQL ([`PgProvider`](super::postgres::PgProvider)) or the
//! in-process [`MemoryProvider`](crate::service::db::memory::MemoryProvider).

use crate::service::db::core::types::TransactionOptions;
use crate::tool::error::DbError;
use async_trait::async_trait;
use std::time::Duration;

/// Source of transactions and advisory-lock sessions.
#[async_trait]
pub trait TransactionProvider: Send + Sync {
    type Transaction: TransactionHandle;
    type Session: LockSession;

    /// Open a transaction with isolation, read-only and deferrable modes applied.
    async fn begin(&self, options: &TransactionOptions) -> Result<Self::Transaction, DbError>;

    /// Check out one connection to be used exclusively for advisory locks.
    async fn session(&self) -> Result<Self::Session, DbError>;
}

/// A live transaction bound to one connection.
#[async_trait]
pub trait TransactionHandle: Send + Sized + 'static {
    /// Set statement and lock-wait timeouts for this transaction only.
    async fn set_local_timeouts(
        &mut self,
        statement_timeout: Duration,
        lock_timeout: Duration,
    ) -> Result<(), DbError>;

    async fn create_savepoint(&mut self, name: &str) -> Result<(), DbError>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DbError>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DbError>;

    async fn commit(self) -> Result<(), DbError>;

    async fn rollback(self) -> Result<(), DbError>;
}

/// A connection holding session-scoped advisory locks.
///
/// Locks belong to the session, so acquire and release must go through the
/// same value.
#[async_trait]
pub trait LockSession: Send + 'static {
    /// Non-blocking acquire. `Ok(false)` means another session holds it.
    async fn try_advisory_lock(&mut self, lock_id: i64) -> Result<bool, DbError>;

    /// `Ok(false)` when this session did not hold the lock.
    async fn advisory_unlock(&mut self, lock_id: i64) -> Result<bool, DbError>;

    /// Make sure the session is closed instead of reused, so the engine drops
    /// any locks it still holds.
    fn invalidate(&mut self) {}
}
