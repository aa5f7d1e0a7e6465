//! Transaction management module
//!
//! Runs units of work inside a single transaction with isolation control,
//! transaction-local timeouts, nested savepoints and concurrent batches.

use crate::service::db::core::classifier::SqlState;
use crate::service::db::core::provider::{TransactionHandle, TransactionProvider};
use crate::service::db::core::retry::RetryPolicy;
use crate::service::db::core::types::{TransactionOptions, TransactionStats};
use crate::tool::error::DbError;
use futures::future::{try_join_all, BoxFuture};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Longest savepoint name accepted (PostgreSQL identifier limit).
pub const MAX_SAVEPOINT_NAME_LEN: usize = 63;

/// Transaction manager for database operations
pub struct TransactionManager<P: TransactionProvider> {
    provider: Arc<P>,
    stats: Arc<TransactionStatistics>,
}

#[derive(Default)]
struct TransactionStatistics {
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
    batches: AtomicU64,
}

/// Transaction handle shared by the units of work of one batch.
///
/// Each unit locks the handle for as long as it needs the connection; the
/// engine only ever sees one statement at a time.
pub struct SharedTransaction<'a, Tx> {
    inner: &'a Mutex<Tx>,
}

impl<'a, Tx> SharedTransaction<'a, Tx> {
    pub async fn lock(&self) -> MutexGuard<'a, Tx> {
        self.inner.lock().await
    }
}

impl<Tx> Clone for SharedTransaction<'_, Tx> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tx> Copy for SharedTransaction<'_, Tx> {}

impl<P: TransactionProvider> Clone for TransactionManager<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<P: TransactionProvider> TransactionManager<P> {
    /// Create new transaction manager
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            stats: Arc::new(TransactionStatistics::default()),
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Execute a unit of work within one transaction.
    ///
    /// Commits on `Ok`. On `Err` the transaction is rolled back and the
    /// error is returned exactly as the unit of work produced it.
    pub async fn execute_in_transaction<T, E, F>(
        &self,
        options: TransactionOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut P::Transaction) -> BoxFuture<'c, Result<T, E>> + Send,
        E: From<DbError> + Display + Send,
        T: Send,
    {
        let mut tx = self.begin(&options).await?;
        let result = work(&mut tx).await;
        self.finish(tx, result, "Transaction").await
    }

    /// Execute a transaction, retrying the whole of it on transient failures.
    ///
    /// Each attempt opens a fresh transaction and calls `work` again.
    pub async fn execute_in_transaction_with_retry<T, E, F>(
        &self,
        policy: &RetryPolicy,
        options: TransactionOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'c> Fn(&'c mut P::Transaction) -> BoxFuture<'c, Result<T, E>> + Send + Sync,
        E: From<DbError> + SqlState + Display + Send,
        T: Send,
    {
        policy
            .execute(|| self.execute_in_transaction(options.clone(), &work))
            .await
    }

    /// Execute multiple independent units of work concurrently in one transaction.
    ///
    /// Results come back in input order. The first failure aborts the
    /// remaining units, rolls back everything, and is returned.
    pub async fn execute_batch<T, E, F>(
        &self,
        options: TransactionOptions,
        works: Vec<F>,
    ) -> Result<Vec<T>, E>
    where
        F: for<'c> FnOnce(SharedTransaction<'c, P::Transaction>) -> BoxFuture<'c, Result<T, E>>
            + Send,
        E: From<DbError> + Display + Send,
        T: Send,
    {
        let count = works.len();
        let tx = self.begin(&options).await?;
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        debug!("Executing batch of {} operations", count);

        let shared = Mutex::new(tx);
        let result = {
            let handle = SharedTransaction { inner: &shared };
            try_join_all(works.into_iter().map(|work| work(handle))).await
        };

        self.finish(shared.into_inner(), result, "Batch transaction")
            .await
    }

    /// Snapshot of transaction counters.
    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            begun: self.stats.begun.load(Ordering::Relaxed),
            committed: self.stats.committed.load(Ordering::Relaxed),
            rolled_back: self.stats.rolled_back.load(Ordering::Relaxed),
            batches: self.stats.batches.load(Ordering::Relaxed),
        }
    }

    async fn begin(&self, options: &TransactionOptions) -> Result<P::Transaction, DbError> {
        let mut tx = self.provider.begin(options).await.map_err(|e| {
            error!("Failed to start transaction: {}", e);
            e
        })?;
        self.stats.begun.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = tx
            .set_local_timeouts(options.statement_timeout, options.lock_timeout)
            .await
        {
            error!("Failed to set transaction timeouts: {}", e);
            self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
            if let Err(rb) = tx.rollback().await {
                error!("Failed to rollback transaction: {}", rb);
            }
            return Err(e);
        }

        debug!(
            "Transaction started ({}, read_only={}, deferrable={})",
            options.isolation_level.as_str(),
            options.read_only,
            options.deferrable
        );
        Ok(tx)
    }

    async fn finish<T, E>(
        &self,
        tx: P::Transaction,
        result: Result<T, E>,
        label: &str,
    ) -> Result<T, E>
    where
        E: From<DbError> + Display,
    {
        match result {
            Ok(value) => {
                tx.commit().await.map_err(|e| {
                    error!("Failed to commit {}: {}", label.to_lowercase(), e);
                    self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
                    E::from(e)
                })?;
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
                info!("{} committed successfully", label);
                Ok(value)
            }
            Err(err) => {
                self.stats.rolled_back.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = tx.rollback().await {
                    error!("Failed to rollback {}: {}", label.to_lowercase(), e);
                }
                warn!("{} rolled back due to error: {}", label, err);
                Err(err)
            }
        }
    }
}

/// Execute a unit of work behind a savepoint inside an open transaction.
///
/// On success the savepoint is released and its effects stay pending in the
/// parent transaction. On failure only the work done since the savepoint is
/// undone, the parent stays usable, and the error is returned unchanged.
/// Names are not generated; nested savepoints must use distinct names.
pub async fn execute_with_savepoint<Tx, T, E, F>(
    tx: &mut Tx,
    name: &str,
    work: F,
) -> Result<T, E>
where
    Tx: TransactionHandle,
    F: for<'c> FnOnce(&'c mut Tx) -> BoxFuture<'c, Result<T, E>> + Send,
    E: From<DbError> + Display,
{
    validate_savepoint_name(name)?;

    tx.create_savepoint(name).await.map_err(|e| {
        error!("Failed to create savepoint '{}': {}", name, e);
        e
    })?;
    debug!("Savepoint '{}' created", name);

    match work(&mut *tx).await {
        Ok(value) => {
            tx.release_savepoint(name).await.map_err(|e| {
                error!("Failed to release savepoint '{}': {}", name, e);
                e
            })?;
            debug!("Savepoint '{}' released", name);
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = tx.rollback_to_savepoint(name).await {
                error!("Failed to rollback to savepoint '{}': {}", name, e);
                return Err(err);
            }
            warn!("Rolled back to savepoint '{}' due to error: {}", name, err);

            // ROLLBACK TO keeps the savepoint; drop it so failed sub-units don't stack up
            if let Err(e) = tx.release_savepoint(name).await {
                error!("Failed to release savepoint '{}' after rollback: {}", name, e);
            }
            Err(err)
        }
    }
}

pub fn validate_savepoint_name(name: &str) -> Result<(), DbError> {
    if name.is_empty() || name.len() > MAX_SAVEPOINT_NAME_LEN || name.contains('\0') {
        return Err(DbError::InvalidSavepointName(name.to_string()));
    }
    Ok(())
}
