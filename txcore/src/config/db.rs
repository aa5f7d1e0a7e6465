//! PostgreSQL Database Configuration
//!
//! .env 파일에서 데이터베이스 연결 정보를 읽어와 연결 풀을 생성합니다.
//! 설정 로드와 연결을 분리하여, 연결 없이도 설정을 검증할 수 있습니다.

use crate::tool::error::DbError;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// PostgreSQL 데이터베이스 설정 구조체
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_millis(5000),
        }
    }
}

impl DbConfig {
    /// 환경변수에서 설정을 읽습니다.
    ///
    /// 현재 디렉토리, 그 다음 상위 디렉토리의 .env 파일을 먼저 로드합니다.
    /// 환경 변수가 없으면 기본값을 사용합니다.
    pub fn from_env() -> Result<Self, DbError> {
        let current_dir = env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
        load_env_file(&current_dir);
        Self::from_vars()
    }

    /// 이미 로드된 환경변수만으로 설정을 구성합니다.
    pub fn from_vars() -> Result<Self, DbError> {
        let defaults = Self::default();

        let host = env::var("db_host").unwrap_or_else(|_| {
            warn!("db_host 환경변수가 없어서 {}를 사용합니다.", defaults.host);
            defaults.host.clone()
        });

        let port = parse_var("db_port", defaults.port)?;

        let user = env::var("db_id").unwrap_or_else(|_| {
            warn!("db_id 환경변수가 없어서 {}를 사용합니다.", defaults.user);
            defaults.user.clone()
        });

        let password = env::var("db_password").unwrap_or_else(|_| {
            warn!("db_password 환경변수가 없어서 빈 비밀번호를 사용합니다.");
            String::new()
        });

        let database = env::var("db_name").unwrap_or_else(|_| {
            warn!("db_name 환경변수가 없어서 {}를 사용합니다.", defaults.database);
            defaults.database.clone()
        });

        let max_connections = parse_var("db_max_connections", defaults.max_connections)?;
        let acquire_timeout = Duration::from_millis(parse_var(
            "db_acquire_timeout_ms",
            defaults.acquire_timeout.as_millis() as u64,
        )?);

        Ok(Self {
            host,
            port,
            user,
            password,
            database,
            max_connections,
            acquire_timeout,
        })
    }

    /// 연결 URL (비밀번호 포함)
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }

    /// 새로운 연결 풀을 생성합니다.
    pub async fn connect(&self) -> Result<PgPool, DbError> {
        info!(
            "데이터베이스 연결 시도: {}:{}@{}/{}",
            self.user, "***", self.host, self.database
        );

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(&self.url())
            .await?;

        info!("PostgreSQL 연결 풀 생성 완료: {}:{}", self.host, self.port);
        Ok(pool)
    }
}

/// `dir/.env`, 없으면 `dir/../.env`를 로드합니다.
pub fn load_env_file(dir: &Path) -> bool {
    let workspace_env = dir.join(".env");
    if workspace_env.exists() && dotenv::from_path(&workspace_env).is_ok() {
        info!("환경 파일 로드: {:?}", workspace_env);
        return true;
    }

    // 상위 디렉토리의 .env 파일 시도 (서브패키지에서 실행되는 경우)
    if let Some(parent_env) = dir.parent().map(|p| p.join(".env")) {
        if parent_env.exists() && dotenv::from_path(&parent_env).is_ok() {
            info!("환경 파일 로드: {:?}", parent_env);
            return true;
        }
    }

    warn!(".env 파일을 찾을 수 없어서 환경 변수를 직접 사용합니다.");
    false
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, DbError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| DbError::Configuration(format!("{key} is not a valid number: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
