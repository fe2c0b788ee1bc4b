//! Fusing several noisy sources into one sample: drop whatever is stale,
//! take the median of the survivors.

use chrono::Duration;
use pump_protocol::{Forecast, TempTs, Timestamp, median, median_series};
use tracing::debug;

pub const MAX_SAMPLE_AGE_MINUTES: i64 = 60;
pub const MAX_FORECAST_AGE_MINUTES: i64 = 48 * 60;

fn is_fresh(now: Timestamp, max_age_minutes: i64, ts: Timestamp) -> bool {
    (now - ts).abs() < Duration::minutes(max_age_minutes)
}

/// Median over the named samples that are at most `max_age_minutes` old.
pub fn fuse_temps(
    now: Timestamp,
    max_age_minutes: i64,
    samples: &[(&str, Option<TempTs>)],
) -> Option<TempTs> {
    let mut fresh = Vec::with_capacity(samples.len());
    for (name, sample) in samples {
        match sample {
            Some(s) if is_fresh(now, max_age_minutes, s.ts) => fresh.push(*s),
            Some(s) => {
                debug!(source = name, temp = %s.temp, ts = %s.ts, "discarding stale sample")
            }
            None => {}
        }
    }
    median(&fresh)
}

/// Elementwise median of the fresh forecasts; the fused fetch instant is the
/// freshest one so staleness checks keep a forecast that any live source
/// justifies.
pub fn fuse_forecasts(
    now: Timestamp,
    max_age_minutes: i64,
    forecasts: &[(&str, Option<Forecast>)],
) -> Option<Forecast> {
    let mut fresh: Vec<&Forecast> = Vec::with_capacity(forecasts.len());
    for (name, forecast) in forecasts {
        match forecast {
            Some(f) if is_fresh(now, max_age_minutes, f.ts) => fresh.push(f),
            Some(f) => debug!(source = name, ts = %f.ts, "discarding stale forecast"),
            None => {}
        }
    }
    let series: Vec<Vec<TempTs>> = fresh.iter().map(|f| f.temps.clone()).collect();
    let temps = median_series(&series)?;
    let ts = fresh.iter().map(|f| f.ts).max()?;
    Some(Forecast { temps, ts })
}
