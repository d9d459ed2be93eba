use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use pkg_constants::timing::{CONFLICT_RETRY_ATTEMPTS, CONFLICT_RETRY_STEP_MILLIS};

/// Run a read-modify-write closure, re-running it while the store reports a
/// version conflict. The closure must re-read the object on every attempt.
///
/// Any other error, or a conflict on the final attempt, is returned as-is.
pub async fn retry_on_conflict<T, F, Fut>(mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRY_ATTEMPTS => {
                debug!("retrying after conflict (attempt {}): {}", attempt, e);
                tokio::time::sleep(Duration::from_millis(
                    CONFLICT_RETRY_STEP_MILLIS * attempt as u64,
                ))
                .await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
