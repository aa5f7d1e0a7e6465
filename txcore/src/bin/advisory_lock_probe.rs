//! 어드바이저리 락 점검 도구
//!
//! 이름으로 락을 잡고 지정한 시간 동안 보유한 뒤 해제합니다.
//! 다른 인스턴스가 같은 이름을 잡고 있으면 타임아웃 후 실패 코드로 종료합니다.
//!
//! 사용법: `advisory_lock_probe <lock-name> [hold-seconds]`

use anyhow::{anyhow, Context, Result};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use txcore::logging::{init_tracing, LoggingConfig};
use txcore::{lock_id_for, AdvisoryLockManager, DbConfig, PgProvider, TxServiceConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let name = args
        .next()
        .ok_or_else(|| anyhow!("사용법: advisory_lock_probe <lock-name> [hold-seconds]"))?;
    let hold = match args.next() {
        Some(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("hold-seconds는 숫자여야 합니다: {raw:?}"))?,
        None => 5,
    };

    let db_config = DbConfig::from_env()?;
    init_tracing(&LoggingConfig::from_env())?;
    let service_config = TxServiceConfig::from_env()?;

    let provider = Arc::new(PgProvider::new(db_config.connect().await?));
    provider.health_check().await?;

    let locks = AdvisoryLockManager::new(provider.clone(), service_config.lock.clone());
    let lock_id = lock_id_for(&name);
    info!("▶ 락 획득 시도: {} (id {})", name, lock_id);

    let Some(token) = locks.try_acquire(lock_id).await? else {
        warn!(
            "락 획득 실패: {} ({:?} 내에 다른 보유자가 해제하지 않음)",
            name, service_config.lock.default_timeout
        );
        provider.close().await;
        std::process::exit(2);
    };

    info!("✅ 락 보유 중: {}초", hold);
    tokio::time::sleep(Duration::from_secs(hold)).await;

    let released = token.release().await?;
    info!("락 해제 완료: {} (released={})", name, released);

    provider.close().await;
    Ok(())
}
