//! Heartbeat pings to the external healthcheck URLs. Fire and forget: a
//! missing ping is exactly the signal the healthcheck service exists for.

use tracing::debug;

pub async fn ping(client: &reqwest::Client, url: &str) {
    if url.is_empty() {
        return;
    }
    match client.get(url).send().await {
        Ok(_) => debug!(url, "healthcheck ping"),
        Err(e) => debug!(url, error = %e, "healthcheck ping failed"),
    }
}
