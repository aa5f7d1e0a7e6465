//! In-process provider
//!
//! A small key/value "engine" with the transaction, savepoint and advisory
//! lock semantics of PostgreSQL:
//!
//! - writes stay in a per-transaction overlay until commit;
//! - `RELEASE` destroys the named savepoint and every later one;
//! - `ROLLBACK TO` restores the overlay and keeps the savepoint;
//! - advisory locks are re-entrant per session and freed when the session
//!   is dropped or invalidated (the connection closing).
//!
//! Used as the test double for the managers, and usable by downstream crates
//! for the same purpose.

use crate::service::db::core::provider::{LockSession, TransactionHandle, TransactionProvider};
use crate::service::db::core::types::TransactionOptions;
use crate::tool::error::DbError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// SQLSTATE for an unknown savepoint name.
const INVALID_SAVEPOINT: &str = "3B001";

#[derive(Default)]
struct EngineState {
    table: BTreeMap<String, String>,
    // lock id -> (session id, re-entrancy count)
    advisory: HashMap<i64, (u64, u32)>,
    fail_next_commit: Option<DbError>,
    fail_next_begin: Option<DbError>,
}

/// In-memory transaction provider
#[derive(Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<EngineState>>,
    next_session: Arc<AtomicU64>,
    live_sessions: Arc<AtomicUsize>,
    commits: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed contents of the table.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.state.lock().table.clone()
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Make the next commit fail with `err`; the transaction is discarded.
    pub fn fail_next_commit(&self, err: DbError) {
        self.state.lock().fail_next_commit = Some(err);
    }

    /// Make the next `begin` fail with `err`.
    pub fn fail_next_begin(&self, err: DbError) {
        self.state.lock().fail_next_begin = Some(err);
    }

    /// Lock sessions checked out and not yet dropped.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    /// Number of advisory locks currently held by any session.
    pub fn held_locks(&self) -> usize {
        self.state.lock().advisory.len()
    }
}

#[async_trait]
impl TransactionProvider for MemoryProvider {
    type Transaction = MemoryTransaction;
    type Session = MemorySession;

    async fn begin(&self, options: &TransactionOptions) -> Result<MemoryTransaction, DbError> {
        if let Some(err) = self.state.lock().fail_next_begin.take() {
            return Err(err);
        }
        Ok(MemoryTransaction {
            provider: self.clone(),
            options: options.clone(),
            local_timeouts: None,
            overlay: BTreeMap::new(),
            savepoints: Vec::new(),
        })
    }

    async fn session(&self) -> Result<MemorySession, DbError> {
        self.live_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            id: self.next_session.fetch_add(1, Ordering::SeqCst) + 1,
            state: self.state.clone(),
            live: self.live_sessions.clone(),
            closed: false,
        })
    }
}

// key -> Some(value) for writes, None for deletes
type Overlay = BTreeMap<String, Option<String>>;

/// Open in-memory transaction
pub struct MemoryTransaction {
    provider: MemoryProvider,
    options: TransactionOptions,
    local_timeouts: Option<(Duration, Duration)>,
    overlay: Overlay,
    savepoints: Vec<(String, Overlay)>,
}

impl MemoryTransaction {
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// `(statement_timeout, lock_timeout)` once set for this transaction.
    pub fn local_timeouts(&self) -> Option<(Duration, Duration)> {
        self.local_timeouts
    }

    /// Reads see this transaction's own writes first.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.overlay.get(key) {
            Some(pending) => pending.clone(),
            None => self.provider.state.lock().table.get(key).cloned(),
        }
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.overlay.insert(key.to_string(), Some(value.to_string()));
    }

    pub fn delete(&mut self, key: &str) {
        self.overlay.insert(key.to_string(), None);
    }

    /// Names of the savepoints currently established, outermost first.
    pub fn savepoints(&self) -> Vec<String> {
        self.savepoints.iter().map(|(name, _)| name.clone()).collect()
    }

    fn savepoint_index(&self, name: &str) -> Result<usize, DbError> {
        self.savepoints
            .iter()
            .rposition(|(existing, _)| existing == name)
            .ok_or_else(|| {
                DbError::with_code(INVALID_SAVEPOINT, format!("savepoint \"{name}\" does not exist"))
            })
    }
}

#[async_trait]
impl TransactionHandle for MemoryTransaction {
    async fn set_local_timeouts(
        &mut self,
        statement_timeout: Duration,
        lock_timeout: Duration,
    ) -> Result<(), DbError> {
        self.local_timeouts = Some((statement_timeout, lock_timeout));
        Ok(())
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        self.savepoints.push((name.to_string(), self.overlay.clone()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index + 1);
        self.overlay = self.savepoints[index].1.clone();
        Ok(())
    }

    async fn commit(self) -> Result<(), DbError> {
        let mut state = self.provider.state.lock();
        if let Some(err) = state.fail_next_commit.take() {
            self.provider.rollbacks.fetch_add(1, Ordering::SeqCst);
            return Err(err);
        }
        for (key, value) in self.overlay {
            match value {
                Some(value) => state.table.insert(key, value),
                None => state.table.remove(&key),
            };
        }
        self.provider.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<(), DbError> {
        self.provider.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory lock session
pub struct MemorySession {
    id: u64,
    state: Arc<Mutex<EngineState>>,
    live: Arc<AtomicUsize>,
    closed: bool,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<(), DbError> {
        if self.closed {
            return Err(DbError::Connection(format!("session {} is closed", self.id)));
        }
        Ok(())
    }

    fn free_locks(&self) {
        let id = self.id;
        self.state.lock().advisory.retain(|_, (owner, _)| *owner != id);
    }
}

#[async_trait]
impl LockSession for MemorySession {
    async fn try_advisory_lock(&mut self, lock_id: i64) -> Result<bool, DbError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        match state.advisory.get_mut(&lock_id) {
            Some((owner, count)) if *owner == self.id => {
                *count += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                state.advisory.insert(lock_id, (self.id, 1));
                Ok(true)
            }
        }
    }

    async fn advisory_unlock(&mut self, lock_id: i64) -> Result<bool, DbError> {
        self.ensure_open()?;
        let mut state = self.state.lock();
        match state.advisory.get_mut(&lock_id) {
            Some((owner, count)) if *owner == self.id => {
                *count -= 1;
                if *count == 0 {
                    state.advisory.remove(&lock_id);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn invalidate(&mut self) {
        self.closed = true;
        self.free_locks();
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.free_locks();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overlay_invisible_until_commit() {
        let provider = MemoryProvider::new();
        let mut tx = provider.begin(&TransactionOptions::default()).await.unwrap();
        tx.put("k", "v");
        assert_eq!(tx.get("k").as_deref(), Some("v"));
        assert!(provider.snapshot().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(provider.snapshot().get("k").map(String::as_str), Some("v"));
        assert_eq!(provider.commits(), 1);
    }

    #[tokio::test]
    async fn test_savepoint_release_and_rollback_rules() {
        let provider = MemoryProvider::new();
        let mut tx = provider.begin(&TransactionOptions::default()).await.unwrap();

        tx.put("a", "1");
        tx.create_savepoint("outer").await.unwrap();
        tx.put("b", "2");
        tx.create_savepoint("inner").await.unwrap();
        tx.put("c", "3");

        tx.rollback_to_savepoint("outer").await.unwrap();
        assert_eq!(tx.savepoints(), vec!["outer".to_string()]);
        assert_eq!(tx.get("a").as_deref(), Some("1"));
        assert_eq!(tx.get("b"), None);
        assert_eq!(tx.get("c"), None);

        tx.release_savepoint("outer").await.unwrap();
        assert!(tx.savepoints().is_empty());

        let err = tx.release_savepoint("outer").await.unwrap_err();
        assert_eq!(err.code(), Some(INVALID_SAVEPOINT));
    }

    #[test]
    fn test_injected_commit_failure_discards_writes() {
        let provider = MemoryProvider::new();
        provider.fail_next_commit(DbError::with_code("40001", "could not serialize access"));

        tokio_test::block_on(async {
            let mut tx = provider.begin(&TransactionOptions::default()).await.unwrap();
            tx.put("k", "v");
            let err = tokio_test::assert_err!(tx.commit().await);
            assert_eq!(err.code(), Some("40001"));

            let mut tx = provider.begin(&TransactionOptions::default()).await.unwrap();
            tx.delete("k");
            tokio_test::assert_ok!(tx.commit().await);
        });

        assert!(provider.snapshot().is_empty());
        assert_eq!((provider.commits(), provider.rollbacks()), (1, 1));
    }

    #[tokio::test]
    async fn test_advisory_locks_are_per_session_and_reentrant() {
        let provider = MemoryProvider::new();
        let mut first = provider.session().await.unwrap();
        let mut second = provider.session().await.unwrap();

        assert!(first.try_advisory_lock(1).await.unwrap());
        assert!(first.try_advisory_lock(1).await.unwrap());
        assert!(!second.try_advisory_lock(1).await.unwrap());
        assert!(!second.advisory_unlock(1).await.unwrap());

        assert!(first.advisory_unlock(1).await.unwrap());
        assert!(!second.try_advisory_lock(1).await.unwrap());
        assert!(first.advisory_unlock(1).await.unwrap());
        assert!(second.try_advisory_lock(1).await.unwrap());

        drop(second);
        assert_eq!(provider.held_locks(), 0);
        assert_eq!(provider.live_sessions(), 1);
    }

    #[tokio::test]
    async fn test_invalidated_session_is_closed_and_frees_locks() {
        let provider = MemoryProvider::new();
        let mut session = provider.session().await.unwrap();
        assert!(session.try_advisory_lock(7).await.unwrap());
        assert!(session.try_advisory_lock(7).await.unwrap());

        session.invalidate();
        assert!(session.is_closed());
        assert_eq!(provider.held_locks(), 0);
        assert!(matches!(
            session.try_advisory_lock(7).await,
            Err(DbError::Connection(_))
        ));

        let mut other = provider.session().await.unwrap();
        assert!(other.try_advisory_lock(7).await.unwrap());
    }
}
