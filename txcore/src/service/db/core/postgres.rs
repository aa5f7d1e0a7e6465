//! PostgreSQL provider
//!
//! Backs the transaction and lock managers with an sqlx `PgPool`.

use crate::service::db::core::provider::{LockSession, TransactionHandle, TransactionProvider};
use crate::service::db::core::types::TransactionOptions;
use crate::tool::error::DbError;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Connection, Postgres, Transaction};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// sqlx-backed provider
#[derive(Clone)]
pub struct PgProvider {
    pool: PgPool,
}

impl PgProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 연결 풀 참조 가져오기
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Perform health check
    pub async fn health_check(&self) -> Result<bool, DbError> {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(_) => {
                debug!("Database health check passed");
                Ok(true)
            }
            Err(e) => {
                error!("Database health check failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Gracefully close all connections
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }
}

#[async_trait]
impl TransactionProvider for PgProvider {
    type Transaction = PgTransaction;
    type Session = PgSession;

    async fn begin(&self, options: &TransactionOptions) -> Result<PgTransaction, DbError> {
        let mut tx = self.pool.begin().await?;

        // SET TRANSACTION must be the first statement after BEGIN
        sqlx::query(&options.set_transaction_sql())
            .execute(&mut *tx)
            .await?;

        Ok(PgTransaction { tx })
    }

    async fn session(&self) -> Result<PgSession, DbError> {
        let conn = self.pool.acquire().await?;
        Ok(PgSession { conn: Some(conn) })
    }
}

/// Open PostgreSQL transaction. Derefs to the connection for running queries.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgTransaction {
    pub fn as_executor(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

impl Deref for PgTransaction {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.tx
    }
}

impl DerefMut for PgTransaction {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl TransactionHandle for PgTransaction {
    async fn set_local_timeouts(
        &mut self,
        statement_timeout: Duration,
        lock_timeout: Duration,
    ) -> Result<(), DbError> {
        // set_config(.., true) is SET LOCAL: reverts at commit or rollback
        sqlx::query(
            "SELECT set_config('statement_timeout', $1, true), set_config('lock_timeout', $2, true)",
        )
        .bind(format!("{}ms", statement_timeout.as_millis()))
        .bind(format!("{}ms", lock_timeout.as_millis()))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        let sql = format!("SAVEPOINT {}", quote_ident(name));
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        let sql = format!("RELEASE SAVEPOINT {}", quote_ident(name));
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        let sql = format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name));
        sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), DbError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Pooled connection dedicated to advisory locks.
///
/// Once invalidated the connection is detached from the pool and closed, and
/// every later call on the session fails.
pub struct PgSession {
    conn: Option<PoolConnection<Postgres>>,
}

impl PgSession {
    pub fn as_executor(&mut self) -> Result<&mut PgConnection, DbError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DbError::Connection("advisory lock session was invalidated".to_string()))
    }

    pub fn is_invalidated(&self) -> bool {
        self.conn.is_none()
    }
}

#[async_trait]
impl LockSession for PgSession {
    async fn try_advisory_lock(&mut self, lock_id: i64) -> Result<bool, DbError> {
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(lock_id)
            .fetch_one(self.as_executor()?)
            .await?;
        Ok(acquired)
    }

    async fn advisory_unlock(&mut self, lock_id: i64) -> Result<bool, DbError> {
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .fetch_one(self.as_executor()?)
            .await?;
        Ok(released)
    }

    fn invalidate(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        // detached connections never return to the pool; closing the
        // backend frees every advisory lock it still holds
        let conn = conn.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        warn!("Closing invalidated lock session failed: {}", e);
                    }
                });
            }
            Err(_) => drop(conn),
        }
    }
}

/// Quote an identifier for direct interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
