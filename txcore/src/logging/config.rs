//! 로깅 설정 관리
//!
//! tracing 구독자 초기화에 필요한 설정을 담당합니다.

use serde::{Deserialize, Serialize};

/// 로깅 시스템 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 기본 필터 디렉티브 (RUST_LOG가 있으면 RUST_LOG 우선)
    pub default_directive: String,

    /// 이벤트 타깃(모듈 경로) 출력 여부
    pub with_target: bool,

    /// ANSI 색상 사용 여부
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            with_target: true,
            ansi: true,
        }
    }
}

impl LoggingConfig {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LOG_LEVEL") {
            if !val.trim().is_empty() {
                config.default_directive = val.trim().to_string();
            }
        }

        if let Ok(val) = std::env::var("LOG_WITH_TARGET") {
            if let Ok(flag) = val.parse() {
                config.with_target = flag;
            }
        }

        if let Ok(val) = std::env::var("LOG_ANSI") {
            if let Ok(flag) = val.parse() {
                config.ansi = flag;
            }
        }

        config
    }
}
