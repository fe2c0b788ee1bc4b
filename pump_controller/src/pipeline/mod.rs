//! The decision pipeline: a fixed sequence of stages over a shared data bag
//! and the state that survives between iterations. A failing stage is logged
//! and the rest of the pipeline still runs, so one broken upstream can never
//! stop actuation.

mod stages;

use std::fmt::Display;

use chrono::Utc;
use pump_protocol::{Command, Forecast, OperatorMessage, TempTs, Timestamp};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::cache::RequestCache;
use crate::controller::Controller;
use crate::ctx::Ctx;

#[derive(Default)]
pub struct Caches {
    pub temps: RequestCache<TempTs>,
    pub forecasts: RequestCache<Forecast>,
}

/// State owned by the machine thread that outlives single iterations.
pub struct PipelineState {
    pub last_command: Option<Command>,
    pub last_command_send_time: Option<Timestamp>,
    pub heating_start_time: Option<Timestamp>,
    pub minimum_inside_temp: Option<Decimal>,
    pub hysteresis_going_up: bool,
    pub last_status_email: Option<String>,
    pub controller: Option<Controller>,
    pub caches: Caches,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            last_command: None,
            last_command_send_time: None,
            heating_start_time: None,
            minimum_inside_temp: None,
            hysteresis_going_up: false,
            last_status_email: None,
            controller: None,
            caches: Caches::default(),
        }
    }

    /// Leaving AUTO: drop everything the next AUTO round must not inherit.
    /// The caches stay, data already fetched is still data.
    pub fn reset_for_manual(&mut self) {
        self.last_command = None;
        self.last_command_send_time = None;
        self.heating_start_time = None;
        self.minimum_inside_temp = None;
        self.hysteresis_going_up = false;
        self.last_status_email = None;
        self.controller = None;
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

/// The per-iteration data bag the stages fill in order.
pub struct Bag {
    pub now: Timestamp,
    pub have_valid_time: bool,
    pub is_summer: bool,
    pub payload: Option<OperatorMessage>,
    pub trace: Vec<String>,
    pub forecast: Option<Forecast>,
    pub mean_forecast: Option<Decimal>,
    pub outside: Option<TempTs>,
    pub valid_outside: bool,
    pub target: Decimal,
    pub hysteresis: Decimal,
    pub inside: Option<Decimal>,
    pub error: Option<Decimal>,
    pub error_raw: Option<Decimal>,
    pub controller_output: Decimal,
    pub next_command: Option<Command>,
    pub status: Option<String>,
}

impl Bag {
    fn new(payload: Option<OperatorMessage>) -> Self {
        Self {
            now: Utc::now(),
            have_valid_time: false,
            is_summer: false,
            payload,
            trace: Vec::new(),
            forecast: None,
            mean_forecast: None,
            outside: None,
            valid_outside: false,
            target: Decimal::ZERO,
            hysteresis: Decimal::ZERO,
            inside: None,
            error: None,
            error_raw: None,
            controller_output: Decimal::ZERO,
            next_command: None,
            status: None,
        }
    }

    /// A line for the status trace; also goes to the log.
    pub fn add_info(&mut self, line: String) {
        info!("{line}");
        self.trace.push(line);
    }
}

/// "None" where the original would print a Python `None`.
pub fn show<T: Display>(value: &Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "None".to_string(),
    }
}

/// One full decision round. Always returns the bag, however many stages
/// managed to run.
pub async fn run_once(
    ctx: &Ctx,
    state: &mut PipelineState,
    payload: Option<OperatorMessage>,
) -> Bag {
    let mut bag = Bag::new(payload);

    macro_rules! stage {
        ($name:literal, $call:expr) => {
            if let Err(e) = $call.await {
                warn!(stage = $name, error = %e, "pipeline stage failed");
            }
        };
    }

    stage!("load_controller", stages::load_controller(ctx, &mut bag, state));
    stage!("handle_payload", stages::handle_payload(ctx, &mut bag, state));
    stage!("acquire_time", stages::acquire_time(ctx, &mut bag, state));
    stage!("init_trace", stages::init_trace(ctx, &mut bag, state));
    stage!("get_forecast", stages::get_forecast(ctx, &mut bag, state));
    stage!("get_outside", stages::get_outside(ctx, &mut bag, state));
    stage!("compute_target", stages::compute_target(ctx, &mut bag, state));
    stage!(
        "adjust_target_with_dew_point",
        stages::adjust_target_with_dew_point(ctx, &mut bag, state)
    );
    stage!("set_hysteresis", stages::set_hysteresis(ctx, &mut bag, state));
    stage!("get_inside", stages::get_inside(ctx, &mut bag, state));
    stage!("get_error", stages::get_error(ctx, &mut bag, state));
    stage!("update_controller", stages::update_controller(ctx, &mut bag, state));
    stage!("select_command", stages::select_command(ctx, &mut bag, state));
    stage!("maybe_send_status_mail", stages::maybe_send_status_mail(ctx, &mut bag, state));
    stage!("send_ir", stages::send_ir(ctx, &mut bag, state));
    stage!("write_log", stages::write_log(ctx, &mut bag, state));
    stage!("save_controller", stages::save_controller(ctx, &mut bag, state));

    bag
}


#[cfg(test)]
mod tests {
    use super::testing::offline_ctx;
    use super::*;

    /// A state that never transmits: last command OFF with the latch down
    /// holds every heat selection, and OFF equal to last is never resent.
    fn muted_state() -> PipelineState {
        let mut st = PipelineState::new();
        st.last_command = Some(Command::Off);
        st.last_command_send_time = Some(Utc::now());
        st.hysteresis_going_up = false;
        st
    }

    #[tokio::test]
    async fn pipeline_survives_every_upstream_being_down() {
        let ctx = offline_ctx();
        let mut st = muted_state();

        let bag = run_once(&ctx, &mut st, None).await;

        // degraded paths: no sources at all still produces a full trace
        assert!(bag.trace.iter().any(|l| l.starts_with("Outside temperature: None")));
        assert!(bag.trace.iter().any(|l| l.contains("predefined outside")));
        assert!(bag.trace.iter().any(|l| l.starts_with("Inside temperature: None")));
        assert!(bag.trace.iter().any(|l| l.starts_with("Status: ")));
        let status = bag.status.clone().unwrap();
        assert!(status.contains("no outside temp"), "status was: {status}");
        assert!(status.contains("no inside temp"), "status was: {status}");
        assert!(status.contains("no forecast"), "status was: {status}");

        // a command was chosen and the muted state held it back
        assert!(bag.next_command.is_some());
        assert_eq!(st.last_command, Some(Command::Off));

        // first status is recorded but never mailed; the integral persisted
        assert_eq!(st.last_status_email, Some(status));
        assert!(ctx.storage.load_controller_integral().unwrap().is_some());
    }

    #[tokio::test]
    async fn second_round_reuses_state_and_is_stable() {
        let ctx = offline_ctx();
        let mut st = muted_state();

        let first = run_once(&ctx, &mut st, None).await;
        let second = run_once(&ctx, &mut st, None).await;
        assert_eq!(first.next_command, second.next_command);
        assert_eq!(st.last_command, Some(Command::Off));
    }

    /// Seed the caches so the adapters hit their ok windows and the round
    /// runs entirely offline, the way the sensors would feed it live.
    fn seed(
        st: &mut PipelineState,
        inside: Decimal,
        outside: Decimal,
        forecast_flat: Decimal,
    ) {
        let now = Utc::now();
        let ok = now + chrono::Duration::minutes(15);
        let failed = now + chrono::Duration::minutes(120);
        st.caches.temps.put("weather_obs", ok, failed, TempTs::new(outside, now));
        st.caches.temps.put("inside", ok, failed, TempTs::new(inside, now));
        let temps = (1..=48)
            .map(|h| TempTs::new(forecast_flat, now + chrono::Duration::hours(h)))
            .collect();
        st.caches.forecasts.put(
            "forecast_fmi",
            now + chrono::Duration::minutes(60),
            now + chrono::Duration::minutes(2880),
            Forecast::new(temps, now),
        );
    }

    fn ctx_with_inside_endpoint() -> Ctx {
        let mut ctx = offline_ctx();
        // never fetched when the cache window holds
        ctx.settings.inside_temp_endpoint = Some("http://127.0.0.1:9/latest".to_string());
        ctx
    }

    #[tokio::test]
    async fn mild_weather_with_all_sensors_turns_off() {
        let ctx = ctx_with_inside_endpoint();
        let mut st = muted_state();
        seed(&mut st, rust_decimal_macros::dec!(5), rust_decimal_macros::dec!(3),
            rust_decimal_macros::dec!(3));

        let bag = run_once(&ctx, &mut st, None).await;

        // outside above the floor the whole way: the default minimum rules
        assert_eq!(bag.target, ctx.settings.minimum_inside_temp);
        assert_eq!(bag.next_command, Some(Command::Off));
        assert_eq!(bag.status.as_deref(), Some("ok"));
        assert!(bag.trace.iter().any(|l| l == "Outside temperature: 3"));
        assert!(bag.trace.iter().any(|l| l == "Inside temperature: 5"));
    }

    #[tokio::test]
    async fn cold_snap_with_cold_interior_demands_the_strongest_command() {
        let ctx = ctx_with_inside_endpoint();
        let mut st = muted_state();
        // holding the command the selector will pick keeps the round silent
        st.last_command = Some(Command::Heat(24));
        seed(&mut st, rust_decimal_macros::dec!(2), rust_decimal_macros::dec!(-15),
            rust_decimal_macros::dec!(-15));

        let bag = run_once(&ctx, &mut st, None).await;

        assert!(bag.target > rust_decimal_macros::dec!(3), "target was {}", bag.target);
        assert_eq!(bag.next_command, Some(Command::Heat(24)));
        assert_eq!(st.last_command, Some(Command::Heat(24)));
        let status = bag.status.unwrap();
        assert!(
            status.contains("inside is 1 degree or more below target"),
            "status was: {status}"
        );
    }

    #[tokio::test]
    async fn operator_minimum_override_reaches_the_target() {
        let ctx = offline_ctx();
        let mut st = muted_state();

        let payload = OperatorMessage::parse(
            r#"{"command":"auto","param":{"min_inside_temp":"15"}}"#,
        );
        let bag = run_once(&ctx, &mut st, payload).await;
        assert_eq!(st.minimum_inside_temp, Some(rust_decimal_macros::dec!(15)));
        assert!(bag.target >= rust_decimal_macros::dec!(15));
        assert!(bag.trace.iter().any(|l| l.starts_with("Minimum inside temperature: 15")));
    }
}
