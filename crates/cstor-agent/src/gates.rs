//! Startup and readiness checks against zrepl and the local pool

use crate::error::{AgentError, Result};
use cstor_zfs::{CommandRunner, PoolGetProperty, PoolStatus, ZfsCommand};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Names of all imported pools
pub async fn pool_names(runner: &dyn CommandRunner) -> Result<Vec<String>> {
    let output = PoolGetProperty::pool_names().execute(runner).await?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

pub async fn pool_exists(runner: &dyn CommandRunner, pool: &str) -> Result<bool> {
    Ok(pool_names(runner).await?.iter().any(|p| p == pool))
}

/// Poll `zpool status` until zrepl answers; false when cancelled first
pub async fn wait_for_zrepl(
    runner: &dyn CommandRunner,
    interval: Duration,
    token: &CancellationToken,
) -> bool {
    loop {
        match PoolStatus::new("").execute(runner).await {
            Ok(_) => {
                info!("zrepl is responding");
                return true;
            }
            Err(e) => debug!("zrepl not ready: {}", e),
        }
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Poll until `pool` is imported; false when cancelled first
pub async fn wait_for_pool_presence(
    runner: &dyn CommandRunner,
    pool: &str,
    interval: Duration,
    token: &CancellationToken,
) -> bool {
    loop {
        match pool_exists(runner, pool).await {
            Ok(true) => {
                info!("Pool {} is present", pool);
                return true;
            }
            Ok(false) => debug!("Waiting for pool {}", pool),
            Err(e) => debug!("Pool presence check failed: {}", e),
        }
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// Bounded wait used before replica work: `attempts` checks, `interval` apart
pub async fn wait_for_pool(
    runner: &dyn CommandRunner,
    pool: &str,
    attempts: u32,
    interval: Duration,
) -> Result<()> {
    for attempt in 1..=attempts {
        match pool_exists(runner, pool).await {
            Ok(true) => return Ok(()),
            Ok(false) => debug!("Pool {} absent (attempt {}/{})", pool, attempt, attempts),
            Err(e) => warn!("Pool {} presence check failed: {}", pool, e),
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }
    Err(AgentError::pool_not_ready(pool))
}
