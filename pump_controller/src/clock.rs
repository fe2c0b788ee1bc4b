use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Duration;
use tracing::{info, warn};

/// Boards without an RTC boot with the clock near the epoch; the wall clock
/// is trusted only once NTP has pushed it past this floor.
fn valid_time_floor() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
}

pub fn have_valid_time() -> bool {
    have_valid_time_at(Utc::now())
}

pub fn have_valid_time_at(now: DateTime<Utc>) -> bool {
    now >= valid_time_floor()
}

/// Block startup until the clock looks sane, at most `max_wait_secs`.
pub async fn wait_for_valid_time(max_wait_secs: u64) {
    let mut waited = 0u64;
    while !have_valid_time() {
        if waited >= max_wait_secs {
            warn!("no valid time after {max_wait_secs}s, continuing without it");
            return;
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        waited += 10;
    }
    info!("wall clock is valid");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_is_not_valid_time() {
        assert!(!have_valid_time_at(Utc.timestamp_opt(0, 0).unwrap()));
        assert!(have_valid_time_at(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()));
    }
}
