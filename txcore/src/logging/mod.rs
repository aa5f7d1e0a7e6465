//! 로깅 초기화
//!
//! 모든 컴포넌트는 `tracing` 매크로로 이벤트를 남기고, 실행 파일은
//! [`init_tracing`]으로 한 번만 구독자를 설치합니다.
//!
//! # 사용 예시
//! ```no_run
//! use txcore::logging::{init_tracing, LoggingConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_tracing(&LoggingConfig::from_env())?;
//!     tracing::info!("lock probe started");
//!     Ok(())
//! }
//! ```

pub mod config;

pub use config::LoggingConfig;

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// tracing 구독자 설치
///
/// `RUST_LOG`가 설정되어 있으면 그 값을, 아니면 `default_directive`를 사용합니다.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.default_directive)
            .map_err(|e| anyhow!("로깅 설정 파싱 실패 '{}': {e}", config.default_directive))?,
    };

    fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_ansi(config.ansi)
        .try_init()
        .map_err(|e| anyhow!("로깅 초기화 실패: {e}"))
}
