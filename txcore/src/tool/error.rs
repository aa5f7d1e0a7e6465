//! Database Error Management
//!
//! 트랜잭션 코어에서 발생하는 모든 에러를 정의합니다.
//! 엔진 SQLSTATE 코드를 보존하여 재시도 분류기가 판단할 수 있도록 합니다.

use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// 트랜잭션/락 코어 공통 에러
///
/// `Database` 변형은 엔진이 돌려준 SQLSTATE 코드를 그대로 보관합니다.
/// 재시도 가능 여부는 [`crate::service::db::core::classifier`]만 결정합니다.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    // 엔진 에러
    #[error("database error [{}]: {message}", .code.as_deref().unwrap_or("no code"))]
    Database {
        code: Option<String>,
        message: String,
    },

    // 연결 관련 에러
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("connection pool timed out: {0}")]
    PoolTimeout(String),

    // 트랜잭션 제어 에러
    #[error("transaction control failed: {0}")]
    Transaction(String),

    #[error("invalid savepoint name: {0:?}")]
    InvalidSavepointName(String),

    // 락 관련 에러
    #[error("could not acquire advisory lock {lock_id} within {timeout:?}")]
    LockNotAcquired { lock_id: i64, timeout: Duration },

    // 설정 에러
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl DbError {
    /// Engine error carrying a SQLSTATE code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        DbError::Database {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// SQLSTATE code reported by the engine, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            DbError::Database { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// 에러의 심각도를 반환합니다.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // Critical: 연결/풀 장애
            DbError::Connection(_) | DbError::PoolTimeout(_) => ErrorSeverity::Critical,

            // High: 트랜잭션 제어 실패, 엔진 에러
            DbError::Transaction(_) | DbError::Database { .. } => ErrorSeverity::High,

            // Medium: 호출자 입력/설정 오류
            DbError::InvalidSavepointName(_)
            | DbError::InvalidRetryPolicy(_)
            | DbError::Configuration(_) => ErrorSeverity::Medium,

            // Low: 예상 가능한 락 경합
            DbError::LockNotAcquired { .. } => ErrorSeverity::Low,
        }
    }

    /// 심각도에 따라 적절한 로깅 레벨로 기록합니다.
    pub fn log(&self, context: &str) {
        match self.severity() {
            ErrorSeverity::Critical => error!("[CRITICAL] {} - {}", context, self),
            ErrorSeverity::High => error!("[HIGH] {} - {}", context, self),
            ErrorSeverity::Medium => warn!("[MEDIUM] {} - {}", context, self),
            ErrorSeverity::Low => info!("[LOW] {} - {}", context, self),
        }
    }
}

/// 에러 심각도 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical, // 시스템 장애
    High,     // 트랜잭션 실패
    Medium,   // 입력/설정 오류
    Low,      // 일반적인 경합
}

// SqlxError conversion
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => DbError::Database {
                code: db_err.code().map(|c| c.into_owned()),
                message: db_err.message().to_string(),
            },
            sqlx::Error::Io(io_err) => DbError::Connection(io_err.to_string()),
            sqlx::Error::Tls(tls_err) => DbError::Connection(tls_err.to_string()),
            sqlx::Error::PoolTimedOut => {
                DbError::PoolTimeout("timed out acquiring a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => DbError::Connection("connection pool is closed".to_string()),
            sqlx::Error::Configuration(cfg_err) => DbError::Configuration(cfg_err.to_string()),
            other => DbError::Database {
                code: None,
                message: other.to_string(),
            },
        }
    }
}
