//! Transient error classification
//!
//! [`RETRYABLE_SQLSTATES`] is the only place retry eligibility is decided.
//! Everything that retries asks [`is_retryable`].

use crate::tool::error::DbError;

/// SQLSTATE codes for failures that are transient and safe to retry.
pub const RETRYABLE_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57014", // query_canceled (statement timeout)
    "08006", // connection_failure
    "08001", // sqlclient_unable_to_establish_sqlconnection
    "08004", // sqlserver_rejected_establishment_of_sqlconnection
    "53000", // insufficient_resources
    "53100", // disk_full
    "53200", // out_of_memory
    "53300", // too_many_connections
];

/// Error class as seen by the retry executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

/// Errors that may carry an engine SQLSTATE code.
///
/// Implement this for an application error type to let
/// [`RetryPolicy`](super::retry::RetryPolicy) classify it.
pub trait SqlState {
    fn sql_state(&self) -> Option<&str>;
}

impl SqlState for DbError {
    fn sql_state(&self) -> Option<&str> {
        self.code()
    }
}

pub fn is_retryable_code(code: &str) -> bool {
    RETRYABLE_SQLSTATES.contains(&code)
}

/// True iff `err` carries a code from [`RETRYABLE_SQLSTATES`].
pub fn is_retryable<E: SqlState + ?Sized>(err: &E) -> bool {
    err.sql_state().is_some_and(is_retryable_code)
}

pub fn classify<E: SqlState + ?Sized>(err: &E) -> ErrorClass {
    if is_retryable(err) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_canonical_code_is_retryable() {
        for code in RETRYABLE_SQLSTATES {
            let err = DbError::with_code(*code, "transient");
            assert!(is_retryable(&err), "{code} should be retryable");
            assert_eq!(classify(&err), ErrorClass::Transient);
        }
        assert_eq!(RETRYABLE_SQLSTATES.len(), 11);
    }

    #[test]
    fn test_unknown_and_fatal_codes() {
        for code in ["23505", "42601", "42501", "XX999", ""] {
            let err = DbError::with_code(code, "fatal");
            assert!(!is_retryable(&err), "{code:?} should be fatal");
        }
    }

    #[test]
    fn test_missing_code_is_fatal() {
        let err = DbError::Database {
            code: None,
            message: "no sqlstate".into(),
        };
        assert_eq!(classify(&err), ErrorClass::Fatal);
        assert!(!is_retryable(&DbError::Connection("reset by peer".into())));
    }
}
