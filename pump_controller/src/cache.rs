use std::collections::HashMap;
use std::future::Future;

use chrono::{Duration, Utc};
use pump_protocol::{Forecast, TempTs, Timestamp};
use tracing::debug;

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Ok,
    Failed,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    stale_after_ok: Timestamp,
    stale_after_failed: Timestamp,
    content: T,
}

/// Named slots of upstream fetch results. A slot serves fresh content within
/// its ok window and keeps serving the old content within the wider failed
/// window when the upstream is down.
#[derive(Debug)]
pub struct RequestCache<T> {
    entries: HashMap<String, Entry<T>>,
}

impl<T> Default for RequestCache<T> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<T: Clone> RequestCache<T> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    pub fn put(&mut self, name: &str, ok_until: Timestamp, failed_until: Timestamp, content: T) {
        self.entries.insert(
            name.to_string(),
            Entry { stale_after_ok: ok_until, stale_after_failed: failed_until, content },
        );
    }

    pub fn get(&self, name: &str, check: Staleness) -> Option<T> {
        self.get_at(name, check, Utc::now())
    }

    pub fn get_at(&self, name: &str, check: Staleness, now: Timestamp) -> Option<T> {
        let entry = self.entries.get(name)?;
        let limit = match check {
            Staleness::Ok => entry.stale_after_ok,
            Staleness::Failed => entry.stale_after_failed,
        };
        if now <= limit { Some(entry.content.clone()) } else { None }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

/// The value kinds a slot can hold must know when they were observed, so the
/// windows can be anchored to the sample time rather than the fetch time.
pub trait Timestamped {
    fn timestamp(&self) -> Timestamp;
}

impl Timestamped for TempTs {
    fn timestamp(&self) -> Timestamp {
        self.ts
    }
}

impl Timestamped for Forecast {
    fn timestamp(&self) -> Timestamp {
        self.ts
    }
}

/// Consult the slot, invoke the adapter on a miss, store on success and fall
/// back to the failed window when the adapter comes back empty.
pub async fn cached_fetch<T, F, Fut>(
    cache: &mut RequestCache<T>,
    settings: &Settings,
    name: &str,
    fetch: F,
) -> Option<T>
where
    T: Clone + Timestamped,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    if let Some(hit) = cache.get(name, Staleness::Ok) {
        debug!(cache = name, "cache hit");
        return Some(hit);
    }
    match fetch().await {
        Some(value) => {
            let (ok_minutes, failed_minutes) = settings.cache_window(name);
            let ts = value.timestamp();
            cache.put(
                name,
                ts + Duration::minutes(ok_minutes),
                ts + Duration::minutes(failed_minutes),
                value.clone(),
            );
            Some(value)
        }
        None => {
            let stale = cache.get(name, Staleness::Failed);
            if stale.is_some() {
                debug!(cache = name, "fetch failed, serving stale content");
            } else {
                debug!(cache = name, "fetch failed and nothing cached");
            }
            stale
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts(minutes: i64) -> Timestamp {
        "2018-01-15T12:00:00Z".parse::<Timestamp>().unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn ok_window_expires_before_failed_window() {
        let mut cache = RequestCache::new();
        cache.put("outside_raw", ts(25), ts(120), TempTs::new(dec!(-5), ts(0)));

        assert!(cache.get_at("outside_raw", Staleness::Ok, ts(25)).is_some());
        assert!(cache.get_at("outside_raw", Staleness::Ok, ts(26)).is_none());
        assert!(cache.get_at("outside_raw", Staleness::Failed, ts(26)).is_some());
        assert!(cache.get_at("outside_raw", Staleness::Failed, ts(120)).is_some());
        assert!(cache.get_at("outside_raw", Staleness::Failed, ts(121)).is_none());
    }

    #[test]
    fn missing_name_is_empty() {
        let cache: RequestCache<TempTs> = RequestCache::new();
        assert!(cache.get_at("inside", Staleness::Ok, ts(0)).is_none());
    }

    #[test]
    fn reset_clears_every_slot() {
        let mut cache = RequestCache::new();
        cache.put("a", ts(60), ts(120), TempTs::new(dec!(1), ts(0)));
        cache.put("b", ts(60), ts(120), TempTs::new(dec!(2), ts(0)));
        cache.reset();
        assert!(cache.get_at("a", Staleness::Failed, ts(0)).is_none());
        assert!(cache.get_at("b", Staleness::Failed, ts(0)).is_none());
    }

    #[tokio::test]
    async fn cached_fetch_falls_back_to_stale_content() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        let mut cache = RequestCache::new();
        // sampled 30 min ago: already outside the 25 min ok window for
        // outside_raw, but well inside the 120 min failed window
        let fresh = TempTs::new(dec!(8.187), Utc::now() - Duration::minutes(30));

        let got = cached_fetch(&mut cache, &settings, "outside_raw", || async { Some(fresh) })
            .await
            .unwrap();
        assert_eq!(got.temp, dec!(8.187));

        // upstream breaks: the previous value still serves inside the failed window
        let got = cached_fetch(&mut cache, &settings, "outside_raw", || async {
            None::<TempTs>
        })
        .await
        .unwrap();
        assert_eq!(got.temp, dec!(8.187));

        // an unknown slot with a broken upstream yields nothing
        let got =
            cached_fetch(&mut cache, &settings, "inside", || async { None::<TempTs> }).await;
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn cached_fetch_serves_hits_without_calling_the_adapter() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        let mut cache = RequestCache::new();
        let now = Utc::now();
        cache.put("inside", now + Duration::minutes(15), now + Duration::minutes(120),
            TempTs::new(dec!(21), now));

        let got = cached_fetch(&mut cache, &settings, "inside", || async {
            panic!("adapter must not run on a cache hit")
        })
        .await
        .unwrap();
        assert_eq!(got.temp, dec!(21));
    }
}
