//! One adapter per upstream. Every adapter resolves to `Option<TempTs>` or
//! `Option<Forecast>`: transport errors, bad status codes and malformed
//! payloads are logged and degrade to `None`, never further.

pub mod fmi;
pub mod yr;

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use pump_protocol::{Forecast, TempTs, decimal_round};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{Settings, SmartThings, TempApi};
use crate::util::retry_async;

const HTTP_TRIES: u32 = 3;
const HTTP_RETRY_PAUSE: Duration = Duration::from_secs(10);

pub struct Sources {
    client: reqwest::Client,
}

impl Sources {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        retry_async(HTTP_TRIES, HTTP_RETRY_PAUSE, move || async move {
            let response = self.client.get(url).send().await?;
            let response = response.error_for_status()?;
            Ok::<_, reqwest::Error>(response.text().await?)
        })
        .await
        .with_context(|| format!("GET {url}"))
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        Ok(serde_json::from_str(&self.get_text(url).await?)?)
    }

    // ------------------------------ observations ----------------------------

    pub async fn outside_temp_api(&self, api: &TempApi) -> Option<TempTs> {
        let url = format!(
            "http://{}/latest?table={}",
            api.host_and_port, api.table_name
        );
        let result = async {
            let body = self.get_json(&url).await?;
            Ok::<_, anyhow::Error>(sample_from_json(&body))
        }
        .await;
        flatten("outside temp api", result)
    }

    pub async fn fmi_observation(&self, settings: &Settings) -> Option<TempTs> {
        let Some(url) = fmi_observation_url(settings, "temperature", 1) else {
            return None;
        };
        let result = async {
            let body = self.get_text(&url).await?;
            fmi::last_observation(&body)
        }
        .await;
        flatten("fmi observation", result)
    }

    pub async fn fmi_dew_point(&self, settings: &Settings) -> Option<TempTs> {
        let Some(url) = fmi_observation_url(settings, "td", 1) else {
            return None;
        };
        let result = async {
            let body = self.get_text(&url).await?;
            fmi::mean_observation(&body)
        }
        .await;
        flatten("fmi dew point", result)
    }

    pub async fn open_weather_map(&self, settings: &Settings) -> Option<TempTs> {
        if settings.open_weather_map_key.is_empty() || settings.open_weather_map_location.is_empty()
        {
            return None;
        }
        let url = format!(
            "http://api.openweathermap.org/data/2.5/weather?q={}&units=metric&appid={}",
            settings.open_weather_map_location, settings.open_weather_map_key
        );
        let result = async {
            let body = self.get_json(&url).await?;
            Ok::<_, anyhow::Error>(owm_sample(&body))
        }
        .await;
        flatten("open weather map", result)
    }

    pub async fn inside_endpoint(&self, endpoint: &str) -> Option<TempTs> {
        let result = async {
            let body = self.get_json(endpoint).await?;
            Ok::<_, anyhow::Error>(body.get("latestItem").and_then(sample_from_json))
        }
        .await;
        flatten("inside endpoint", result)
    }

    pub async fn smartthings(&self, st: &SmartThings, device_id: &str) -> Option<TempTs> {
        let url = format!("https://api.smartthings.com/v1/devices/{device_id}/status");
        let url_ref = url.as_str();
        let token = st.token.as_str();
        let result = async {
            let response = retry_async(HTTP_TRIES, HTTP_RETRY_PAUSE, move || async move {
                let r = self.client.get(url_ref).bearer_auth(token).send().await?;
                Ok::<_, reqwest::Error>(r.error_for_status()?.text().await?)
            })
            .await?;
            let body: Value = serde_json::from_str(&response)?;
            Ok::<_, anyhow::Error>(smartthings_sample(&body))
        }
        .await;
        flatten("smartthings", result)
    }

    // ------------------------------- forecasts ------------------------------

    pub async fn fmi_forecast(&self, settings: &Settings) -> Option<Forecast> {
        if settings.fmi_location.is_empty() {
            return None;
        }
        let endtime = (Utc::now() + chrono::Duration::hours(63)).format("%Y-%m-%dT%H:%M:%SZ");
        let url = format!(
            "https://opendata.fmi.fi/wfs?request=getFeature&\
             storedquery_id=fmi::forecast::harmonie::surface::point::simple&\
             place={}&parameters=temperature&endtime={endtime}",
            settings.fmi_location
        );
        let result = async {
            let body = self.get_text(&url).await?;
            let temps = fmi::parse_wfs_samples(&body)?;
            if temps.is_empty() {
                return Err(anyhow!("fmi forecast came back empty"));
            }
            Ok(Forecast::new(temps, Utc::now()))
        }
        .await;
        log_forecast("fmi forecast", flatten("fmi forecast", result.map(Some)))
    }

    pub async fn yr_forecast(&self, settings: &Settings) -> Option<Forecast> {
        if settings.yr_no_location.is_empty() {
            return None;
        }
        let hourly_url = format!(
            "http://www.yr.no/place/{}/forecast_hour_by_hour.xml",
            settings.yr_no_location
        );
        let result = async {
            let body = self.get_text(&hourly_url).await?;
            let hourly = yr::parse_tabular(&body)?;
            if hourly.is_empty() {
                return Err(anyhow!("yr hour-by-hour forecast came back empty"));
            }
            let mut temps = yr::hourly_temps(&hourly);

            // the wider forecast stretches the series; losing it only
            // shortens the horizon, so its failure is not the adapter's
            let wider_url =
                format!("https://www.yr.no/place/{}/forecast.xml", settings.yr_no_location);
            match self.get_text(&wider_url).await.and_then(|b| yr::parse_tabular(&b)) {
                Ok(wider) => temps = yr::extend_hourly(temps, &wider),
                Err(e) => warn!(error = %e, "yr wider forecast unavailable"),
            }

            Ok(Forecast::new(temps, Utc::now()))
        }
        .await;
        log_forecast("yr forecast", flatten("yr forecast", result.map(Some)))
    }
}

fn fmi_observation_url(settings: &Settings, parameter: &str, hours_back: i64) -> Option<String> {
    if settings.fmi_key.is_empty() || settings.fmi_location.is_empty() {
        return None;
    }
    let starttime =
        (Utc::now() - chrono::Duration::hours(hours_back)).format("%Y-%m-%dT%H:%M:%SZ");
    Some(format!(
        "http://data.fmi.fi/fmi-apikey/{}/wfs?request=getFeature&\
         storedquery_id=fmi::observations::weather::simple&\
         place={}&parameters={parameter}&starttime={starttime}",
        settings.fmi_key, settings.fmi_location
    ))
}

fn flatten<T>(name: &str, result: Result<Option<T>>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(source = name, error = %e, "source failed");
            None
        }
    }
}

fn log_forecast(name: &str, forecast: Option<Forecast>) -> Option<Forecast> {
    if let Some(f) = &forecast {
        debug!(
            source = name,
            hours = %f.span_hours(),
            mean = %pump_protocol::decimal_round_opt(f.mean_over(24), 1).unwrap_or_default(),
            mean_48h = %pump_protocol::decimal_round_opt(f.mean_over(48), 1).unwrap_or_default(),
            samples = f.temps.len(),
            "received forecast"
        );
    }
    forecast
}

// ----------------------------- payload parsing ------------------------------

fn decimal_from_json(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// `{"ts": ..., "temperature": ...}` with the temperature either a number or
/// a string, as the temp-api emits both.
fn sample_from_json(v: &Value) -> Option<TempTs> {
    let ts = DateTime::parse_from_rfc3339(v.get("ts")?.as_str()?)
        .ok()?
        .with_timezone(&Utc);
    let temp = decimal_from_json(v.get("temperature")?)?;
    Some(TempTs::new(temp, ts))
}

fn owm_sample(v: &Value) -> Option<TempTs> {
    let temp = decimal_from_json(v.get("main")?.get("temp")?)?;
    let ts = Utc.timestamp_opt(v.get("dt")?.as_i64()?, 0).single()?;
    Some(TempTs::new(decimal_round(temp, 1), ts))
}

fn smartthings_sample(v: &Value) -> Option<TempTs> {
    let measurement = v
        .get("components")?
        .get("main")?
        .get("temperatureMeasurement")?
        .get("temperature")?;
    let temp = decimal_from_json(measurement.get("value")?)?;
    let ts = DateTime::parse_from_rfc3339(measurement.get("timestamp")?.as_str()?)
        .ok()?
        .with_timezone(&Utc);
    Some(TempTs::new(temp, ts))
}
