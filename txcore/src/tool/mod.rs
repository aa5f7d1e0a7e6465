pub mod error;

pub use error::{DbError, ErrorSeverity};
