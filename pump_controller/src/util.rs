use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

/// Retry `op` up to `tries` times with a fixed pause between attempts,
/// returning the last error when every attempt fails.
pub async fn retry_async<T, E, F, Fut>(tries: u32, delay: Duration, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= tries => return Err(e),
            Err(e) => {
                debug!(attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

pub fn now_isoformat() -> String {
    Utc::now().to_rfc3339()
}
