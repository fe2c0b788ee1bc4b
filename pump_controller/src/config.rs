// Runtime settings: upstream locations and keys, thermal constants, regulator
// gains and cache windows, loaded from a TOML file plus PUMP_* environment
// overrides. The clap struct only carries the paths the daemon starts from.
use anyhow::Result;
use chrono_tz::Tz;
use clap::Parser;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Parser, Debug, Clone)]
pub struct Cli {
    #[arg(long, default_value = "controller.toml")] pub config: String,
    #[arg(long, default_value = "db.sqlite")]       pub database: String,
    #[arg(long, default_value = "logs")]            pub log_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TempApi {
    pub host_and_port: String,
    pub table_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartThings {
    pub token: String,
    pub device_ids: Vec<String>,
}

/// Hours of heating lead time: either a constant or a quadratic in the
/// outside temperature, floored at ten hours.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CoolingTimeBuffer {
    Constant(Decimal),
    Quadratic { a: Decimal, b: Decimal, c: Decimal },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheWindow {
    pub if_ok: i64,
    pub if_failed: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default)]
    pub fmi_location: String,
    #[serde(default)]
    pub fmi_key: String,
    #[serde(default)]
    pub yr_no_location: String,
    #[serde(default)]
    pub open_weather_map_key: String,
    #[serde(default)]
    pub open_weather_map_location: String,

    pub temp_api_outside: Option<TempApi>,
    pub inside_temp_endpoint: Option<String>,
    pub smartthings: Option<SmartThings>,

    #[serde(default = "default_minimum_inside_temp")]
    pub minimum_inside_temp: Decimal,
    #[serde(default = "default_allowed_minimum_inside_temp")]
    pub allowed_minimum_inside_temp: Decimal,
    #[serde(default = "default_cooling_rate")]
    pub cooling_rate_per_hour_per_temperature_diff: Decimal,
    #[serde(default = "default_cooling_time_buffer")]
    pub cooling_time_buffer: CoolingTimeBuffer,
    #[serde(default = "default_hysteresis")]
    pub hysteresis: Decimal,

    #[serde(default = "default_controller_p")]
    pub controller_p: Decimal,
    #[serde(default = "default_controller_i")]
    pub controller_i: Decimal,
    #[serde(default = "default_controller_d")]
    pub controller_d: Decimal,

    #[serde(default)]
    pub cache_times: HashMap<String, CacheWindow>,

    #[serde(default)]
    pub email_addresses: Vec<String>,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,

    pub message_cell_url: Option<String>,
    pub log_cell_url: Option<String>,

    #[serde(default)]
    pub healthcheck_url_cron: String,
    #[serde(default)]
    pub healthcheck_url_message: String,
}

fn default_timezone() -> String { "Europe/Helsinki".to_string() }
fn default_minimum_inside_temp() -> Decimal { dec!(3.5) }
fn default_allowed_minimum_inside_temp() -> Decimal { dec!(1.0) }
fn default_cooling_rate() -> Decimal { dec!(0.015) }
fn default_hysteresis() -> Decimal { dec!(0.0) }
fn default_controller_p() -> Decimal { dec!(2) }
fn default_controller_i() -> Decimal { dec!(2) }
fn default_controller_d() -> Decimal { dec!(15) }
fn default_smtp_server() -> String { "localhost".to_string() }

fn default_cooling_time_buffer() -> CoolingTimeBuffer {
    CoolingTimeBuffer::Quadratic { a: dec!(0), b: dec!(2), c: dec!(38) }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("PUMP").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    pub fn tz(&self) -> Tz {
        self.timezone.parse().unwrap_or(Tz::UTC)
    }

    /// Per-source cache windows in minutes, (ok, failed). Configured values
    /// win over the built-in table.
    pub fn cache_window(&self, name: &str) -> (i64, i64) {
        if let Some(w) = self.cache_times.get(name) {
            return (w.if_ok, w.if_failed);
        }
        match name {
            "outside_raw" => (25, 120),
            "weather_obs" => (15, 120),
            "inside" => (15, 120),
            "smartthings" => (15, 120),
            "dew_point" => (60, 120),
            "owm" => (50, 120),
            "forecast_fmi" => (60, 2880),
            "forecast_yr" => (60, 2880),
            _ => (60, 120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_settings() -> Settings {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn defaults_cover_missing_keys() {
        let s = empty_settings();
        assert_eq!(s.minimum_inside_temp, dec!(3.5));
        assert_eq!(s.allowed_minimum_inside_temp, dec!(1.0));
        assert_eq!(s.cooling_rate_per_hour_per_temperature_diff, dec!(0.015));
        assert_eq!(s.controller_p, dec!(2));
        assert_eq!(s.controller_d, dec!(15));
        assert_eq!(s.tz(), Tz::Europe__Helsinki);
        assert!(matches!(s.cooling_time_buffer, CoolingTimeBuffer::Quadratic { .. }));
    }

    #[test]
    fn cache_windows_fall_back_to_builtin_table() {
        let mut s = empty_settings();
        assert_eq!(s.cache_window("outside_raw"), (25, 120));
        assert_eq!(s.cache_window("forecast_yr"), (60, 2880));
        s.cache_times.insert("outside_raw".into(), CacheWindow { if_ok: 5, if_failed: 10 });
        assert_eq!(s.cache_window("outside_raw"), (5, 10));
    }

    #[test]
    fn cooling_time_buffer_accepts_both_shapes() {
        let s: Settings =
            serde_json::from_str(r#"{"cooling_time_buffer": "24"}"#).unwrap();
        assert!(matches!(s.cooling_time_buffer, CoolingTimeBuffer::Constant(h) if h == dec!(24)));
        let s: Settings = serde_json::from_str(
            r#"{"cooling_time_buffer": {"a": "0", "b": "2", "c": "38"}}"#,
        )
        .unwrap();
        assert!(matches!(s.cooling_time_buffer, CoolingTimeBuffer::Quadratic { .. }));
    }
}
