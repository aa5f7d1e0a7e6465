//! Advisory lock management
//!
//! Cross-process mutual exclusion on top of the engine's session-scoped
//! advisory locks. A [`LockToken`] owns the session that acquired the lock,
//! so the unlock always runs on the same connection.
//!
//! Waiters check out a session per poll and hand it back when the lock is
//! busy, so a crowd of waiters does not drain the pool the holder needs.

use crate::service::db::core::config::LockConfig;
use crate::service::db::core::provider::{LockSession, TransactionProvider};
use crate::service::db::core::types::LockStats;
use crate::tool::error::DbError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Map a resource name to a lock id.
///
/// The id is the first 8 bytes of SHA-256(`name`) read as a big-endian
/// `i64`, so every process derives the same id for the same name. Distinct
/// names can collide; callers sharing a database should namespace their
/// names (for example `"billing:invoice:42"`).
pub fn lock_id_for(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Invalidates the session unless it is handed back with [`SessionGuard::disarm`].
///
/// A lock statement cancelled mid-flight leaves the session's lock state
/// unknown, so that session must never be reused.
struct SessionGuard<S: LockSession>(Option<S>);

impl<S: LockSession> SessionGuard<S> {
    fn new(session: S) -> Self {
        Self(Some(session))
    }

    async fn try_lock(&mut self, lock_id: i64) -> Result<bool, DbError> {
        match self.0.as_mut() {
            Some(session) => session.try_advisory_lock(lock_id).await,
            None => Ok(false),
        }
    }

    async fn unlock(&mut self, lock_id: i64) -> Result<bool, DbError> {
        match self.0.as_mut() {
            Some(session) => session.advisory_unlock(lock_id).await,
            None => Ok(false),
        }
    }

    fn disarm(mut self) -> Option<S> {
        self.0.take()
    }
}

impl<S: LockSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        if let Some(mut session) = self.0.take() {
            session.invalidate();
        }
    }
}

/// A held advisory lock together with the session that holds it.
pub struct LockToken<S: LockSession> {
    lock_id: i64,
    acquired_at: DateTime<Utc>,
    session: Option<S>,
    stats: Arc<LockStatistics>,
}

impl<S: LockSession> LockToken<S> {
    pub fn lock_id(&self) -> i64 {
        self.lock_id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Release the lock through the session that acquired it.
    ///
    /// Returns whether the engine reported the lock as held and released.
    /// Any other outcome, including cancellation, invalidates the session.
    pub async fn release(mut self) -> Result<bool, DbError> {
        let Some(session) = self.session.take() else {
            return Ok(false);
        };
        let mut guard = SessionGuard::new(session);
        let released = guard.unlock(self.lock_id).await;

        match released {
            Ok(true) => {
                // back to the pool
                drop(guard.disarm());
                self.stats.released.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Advisory lock {} released after {}ms",
                    self.lock_id,
                    (Utc::now() - self.acquired_at).num_milliseconds()
                );
                Ok(true)
            }
            Ok(false) => {
                warn!("Advisory lock {} was not held by its session", self.lock_id);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to release advisory lock {}: {}", self.lock_id, e);
                Err(e)
            }
        }
    }
}

impl<S: LockSession> Drop for LockToken<S> {
    fn drop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let mut guard = SessionGuard::new(session);
        let lock_id = self.lock_id;
        warn!("Advisory lock {} dropped without release", lock_id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let stats = self.stats.clone();
                handle.spawn(async move {
                    let released = guard.unlock(lock_id).await;
                    match released {
                        Ok(true) => {
                            drop(guard.disarm());
                            stats.released.fetch_add(1, Ordering::Relaxed);
                            debug!("Advisory lock {} released in background", lock_id);
                        }
                        // the guard invalidates the session on both failures
                        Ok(false) => {}
                        Err(e) => error!("Background release of lock {} failed: {}", lock_id, e),
                    }
                });
            }
            // no runtime to unlock on: the guard invalidates the session
            Err(_) => drop(guard),
        }
    }
}

#[derive(Default)]
struct LockStatistics {
    acquired: AtomicU64,
    timed_out: AtomicU64,
    released: AtomicU64,
}

/// Advisory lock manager
pub struct AdvisoryLockManager<P: TransactionProvider> {
    provider: Arc<P>,
    config: LockConfig,
    stats: Arc<LockStatistics>,
}

impl<P: TransactionProvider> Clone for AdvisoryLockManager<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<P: TransactionProvider> AdvisoryLockManager<P> {
    pub fn new(provider: Arc<P>, config: LockConfig) -> Self {
        Self {
            provider,
            config,
            stats: Arc::new(LockStatistics::default()),
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Try to take `lock_id`, polling until `timeout` elapses.
    ///
    /// Contention is not an error: `Ok(None)` means another holder kept the
    /// lock for the whole timeout. Waiting for a pooled session counts
    /// against the same timeout. Acquisition order under contention is not
    /// FIFO.
    ///
    /// Cancel-safe: dropping the future mid-statement invalidates the
    /// session instead of returning it to the pool.
    pub async fn acquire_advisory_lock(
        &self,
        lock_id: i64,
        timeout: Duration,
    ) -> Result<Option<LockToken<P::Session>>, DbError> {
        let deadline = Instant::now() + timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let session = match timeout_at(deadline, self.provider.session()).await {
                Ok(session) => session?,
                Err(_) => {
                    debug!("No lock session available before deadline (lock {})", lock_id);
                    self.record_timeout(lock_id, timeout, polls);
                    return Ok(None);
                }
            };

            let mut guard = SessionGuard::new(session);
            let acquired = guard.try_lock(lock_id).await?;
            let session = guard.disarm();

            if let (true, Some(session)) = (acquired, session) {
                self.stats.acquired.fetch_add(1, Ordering::Relaxed);
                info!("Advisory lock {} acquired (poll {})", lock_id, polls);
                return Ok(Some(LockToken {
                    lock_id,
                    acquired_at: Utc::now(),
                    session: Some(session),
                    stats: self.stats.clone(),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                self.record_timeout(lock_id, timeout, polls);
                return Ok(None);
            }

            sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    fn record_timeout(&self, lock_id: i64, timeout: Duration, polls: u32) {
        self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Advisory lock {} not acquired within {:?} ({} polls)",
            lock_id, timeout, polls
        );
    }

    /// Acquire with the configured default timeout.
    pub async fn try_acquire(&self, lock_id: i64) -> Result<Option<LockToken<P::Session>>, DbError> {
        self.acquire_advisory_lock(lock_id, self.config.default_timeout)
            .await
    }

    pub async fn release_advisory_lock(&self, token: LockToken<P::Session>) -> Result<bool, DbError> {
        token.release().await
    }

    /// Run `work` while holding `lock_id`.
    ///
    /// The lock is released whether `work` succeeds or fails. If the lock
    /// cannot be taken within `timeout`, `work` is never called and
    /// [`DbError::LockNotAcquired`] is returned.
    pub async fn execute_with_lock<T, E, F, Fut>(
        &self,
        lock_id: i64,
        timeout: Duration,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        let token = match self.acquire_advisory_lock(lock_id, timeout).await? {
            Some(token) => token,
            None => return Err(DbError::LockNotAcquired { lock_id, timeout }.into()),
        };

        let result = work().await;

        match token.release().await {
            Ok(_) => result,
            Err(e) if result.is_ok() => Err(e.into()),
            Err(_) => result,
        }
    }

    /// Snapshot of lock counters.
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.stats.acquired.load(Ordering::Relaxed),
            timed_out: self.stats.timed_out.load(Ordering::Relaxed),
            released: self.stats.released.load(Ordering::Relaxed),
        }
    }
}
