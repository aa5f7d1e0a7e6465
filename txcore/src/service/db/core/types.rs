//! Common type definitions for the transaction core
//!
//! Shared types used across transaction, retry and lock modules

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-transaction statement timeout.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default per-transaction lock-wait timeout.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options applied to a single transaction.
///
/// The defaults are READ COMMITTED, read-write, not deferrable, with a 30s
/// statement timeout and a 10s lock-wait timeout. Both timeouts are scoped
/// to the transaction and never leak onto the pooled connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    pub isolation_level: IsolationLevel,
    pub deferrable: bool,
    pub read_only: bool,
    pub statement_timeout: Duration,
    pub lock_timeout: Duration,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            deferrable: false,
            read_only: false,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl TransactionOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn deferrable(mut self, deferrable: bool) -> Self {
        self.deferrable = deferrable;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// `SET TRANSACTION` clause for these options.
    pub fn set_transaction_sql(&self) -> String {
        format!(
            "SET TRANSACTION ISOLATION LEVEL {} {} {}",
            self.isolation_level.as_str(),
            if self.read_only { "READ ONLY" } else { "READ WRITE" },
            if self.deferrable {
                "DEFERRABLE"
            } else {
                "NOT DEFERRABLE"
            },
        )
    }
}

/// Transaction statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub batches: u64,
}

/// Advisory lock statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    pub acquired: u64,
    pub timed_out: u64,
    pub released: u64,
}
