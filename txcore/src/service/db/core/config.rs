//! 트랜잭션 코어 설정 모듈
//!
//! 빌더 패턴으로 트랜잭션/재시도/락 기본값을 관리합니다.
//! 전역 상태는 없으며, 호출자가 값을 만들어 각 컴포넌트에 넘깁니다.

use crate::service::db::core::retry::RetryPolicy;
use crate::service::db::core::types::TransactionOptions;
use crate::tool::error::DbError;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

/// 어드바이저리 락 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// 락 획득 재시도 간격
    pub poll_interval: Duration,

    /// 기본 획득 타임아웃
    pub default_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            default_timeout: Duration::from_millis(5000),
        }
    }
}

/// 트랜잭션 코어 서비스 설정
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxServiceConfig {
    /// 트랜잭션 기본 옵션
    pub transaction: TransactionOptions,

    /// 재시도 정책
    pub retry: RetryPolicy,

    /// 락 설정
    pub lock: LockConfig,
}

impl TxServiceConfig {
    /// 환경변수에서 설정 로드
    ///
    /// 값이 없으면 기본값을 사용하고, 숫자가 아니면 에러를 반환합니다.
    pub fn from_env() -> Result<Self, DbError> {
        let mut config = Self::default();

        if let Some(ms) = env_millis("tx_statement_timeout_ms")? {
            config.transaction.statement_timeout = ms;
        }
        if let Some(ms) = env_millis("tx_lock_timeout_ms")? {
            config.transaction.lock_timeout = ms;
        }
        if let Some(attempts) = env_number("tx_max_attempts")? {
            let attempts = u32::try_from(attempts).map_err(|_| {
                DbError::Configuration(format!("tx_max_attempts out of range: {attempts}"))
            })?;
            config.retry = RetryPolicy::new(attempts, config.retry.base_delay)?
                .with_max_delay(config.retry.max_delay);
        }
        if let Some(ms) = env_millis("tx_backoff_ms")? {
            config.retry.base_delay = ms;
        }
        if let Some(ms) = env_millis("lock_poll_interval_ms")? {
            config.lock.poll_interval = ms;
        }
        if let Some(ms) = env_millis("lock_timeout_ms")? {
            config.lock.default_timeout = ms;
        }

        if config.lock.poll_interval.is_zero() {
            warn!("lock_poll_interval_ms가 0이라서 기본값 100ms를 사용합니다.");
            config.lock.poll_interval = LockConfig::default().poll_interval;
        }

        Ok(config)
    }

    /// Builder method for transaction options
    pub fn with_transaction(mut self, options: TransactionOptions) -> Self {
        self.transaction = options;
        self
    }

    /// Builder method for retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Builder method for lock configuration
    pub fn with_lock(mut self, config: LockConfig) -> Self {
        self.lock = config;
        self
    }
}

fn env_number(key: &str) -> Result<Option<u64>, DbError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| DbError::Configuration(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> Result<Option<Duration>, DbError> {
    Ok(env_number(key)?.map(Duration::from_millis))
}
