//! Retry wrapper for backup and restore stream pipelines

use cstor_zfs::{CommandRunner, ZfsCommand, ZfsError};
use std::time::Duration;
use tracing::{info, warn};

/// Run `command` up to `attempts` times, sleeping `interval` between failures
///
/// Builder validation errors are returned without retrying.
pub async fn run_with_retries<C: ZfsCommand>(
    runner: &dyn CommandRunner,
    command: &C,
    attempts: u32,
    interval: Duration,
) -> Result<String, ZfsError> {
    let mut attempt = 1;
    loop {
        match command.execute(runner).await {
            Ok(output) => {
                info!("Transfer finished after {} attempt(s)", attempt);
                return Ok(output);
            }
            Err(e) if e.is_validation() || attempt >= attempts => return Err(e),
            Err(e) => {
                warn!("Transfer attempt {}/{} failed: {}", attempt, attempts, e);
                attempt += 1;
                tokio::time::sleep(interval).await;
            }
        }
    }
}
