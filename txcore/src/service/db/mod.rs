//! 데이터베이스 서비스 모듈
//!
//! 트랜잭션 실행, 재시도, 세이브포인트, 배치, 어드바이저리 락을 제공합니다.

// 핵심 모듈들 - 관심사의 명확한 분리
pub mod core;
// 테스트 더블 겸 인프로세스 엔진
pub mod memory;

pub use memory::{MemoryProvider, MemorySession, MemoryTransaction};

// 핵심 컴포넌트들 내보내기
pub use self::core::{
    // 락 관리
    advisory_lock::{lock_id_for, AdvisoryLockManager, LockToken},
    // 에러 분류
    classifier::{classify, is_retryable, is_retryable_code, ErrorClass, SqlState, RETRYABLE_SQLSTATES},
    // 설정 관련
    config::{LockConfig, TxServiceConfig},
    // PostgreSQL 구현
    postgres::{PgProvider, PgSession, PgTransaction},
    // 프로바이더 경계
    provider::{LockSession, TransactionHandle, TransactionProvider},
    // 재시도
    retry::RetryPolicy,
    // 트랜잭션 관리
    transaction::{execute_with_savepoint, SharedTransaction, TransactionManager},
    // 데이터 타입들
    types::{IsolationLevel, LockStats, TransactionOptions, TransactionStats},
};
