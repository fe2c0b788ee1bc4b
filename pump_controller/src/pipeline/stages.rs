//! The pipeline stages, in execution order. Each one reads what earlier
//! stages left in the bag and writes its own additions; persistent effects
//! go through `PipelineState` and the context services.

use anyhow::{Result, anyhow};
use chrono::{Datelike, Utc};
use pump_protocol::{OperatorCommand, TempTs, decimal_round, decimal_round_opt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::{Bag, PipelineState, show};
use crate::cache::cached_fetch;
use crate::controller::Controller;
use crate::ctx::Ctx;
use crate::{clock, fusion, health, hysteresis, model, selector};

const PREDEFINED_OUTSIDE_TEMP: Decimal = dec!(-10);
const DEW_POINT_MAX_AGE_MINUTES: i64 = 6 * 60;
const INSIDE_MAX_AGE_MINUTES: i64 = 120;

pub async fn load_controller(ctx: &Ctx, _bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    if st.controller.is_none() {
        st.controller = Some(Controller::new(
            ctx.settings.controller_p,
            ctx.settings.controller_i,
            ctx.settings.controller_d,
        ));
    }
    let Some(controller) = st.controller.as_mut() else {
        return Ok(());
    };
    if controller.is_reset() {
        if let Some(integral) = ctx.storage.load_controller_integral()? {
            tracing::info!(integral = %integral, "restored controller integral");
            controller.restore_integral(integral);
        }
    }
    Ok(())
}

pub async fn handle_payload(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    if let Some(message) = &bag.payload {
        // a fresh operator wish invalidates the error history, otherwise the
        // changed target shows up as a violent slope
        if let Some(controller) = st.controller.as_mut() {
            controller.reset_past_errors();
        }
        let minimum = match &message.command {
            OperatorCommand::Auto { min_inside_temp: Some(min) } => *min,
            _ => ctx.settings.minimum_inside_temp,
        };
        st.minimum_inside_temp = Some(minimum);
    } else if st.minimum_inside_temp.is_none() {
        st.minimum_inside_temp = Some(ctx.settings.minimum_inside_temp);
    }
    Ok(())
}

pub async fn acquire_time(ctx: &Ctx, bag: &mut Bag, _st: &mut PipelineState) -> Result<()> {
    bag.now = Utc::now();
    bag.have_valid_time = clock::have_valid_time();
    let month = bag.now.with_timezone(&ctx.settings.tz()).month();
    bag.is_summer = bag.have_valid_time && (5..=9).contains(&month);
    health::ping(&ctx.client, &ctx.settings.healthcheck_url_cron).await;
    Ok(())
}

pub async fn init_trace(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    bag.trace.clear();
    let minimum = st.minimum_inside_temp.unwrap_or(ctx.settings.minimum_inside_temp);
    bag.add_info(format!("Minimum inside temperature: {}", decimal_round(minimum, 1)));
    Ok(())
}

pub async fn get_forecast(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let settings = &ctx.settings;
    let fmi = cached_fetch(&mut st.caches.forecasts, settings, "forecast_fmi", move || {
        ctx.sources.fmi_forecast(settings)
    })
    .await;
    let yr = cached_fetch(&mut st.caches.forecasts, settings, "forecast_yr", move || {
        ctx.sources.yr_forecast(settings)
    })
    .await;

    bag.forecast = fusion::fuse_forecasts(
        bag.now,
        fusion::MAX_FORECAST_AGE_MINUTES,
        &[("forecast_fmi", fmi), ("forecast_yr", yr)],
    );
    bag.mean_forecast = bag.forecast.as_ref().and_then(|f| f.mean_over(24));
    bag.add_info(format!(
        "Forecast 24 h mean: {}",
        show(&decimal_round_opt(bag.mean_forecast, 1))
    ));
    Ok(())
}

pub async fn get_outside(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let settings = &ctx.settings;
    let mut samples: Vec<(&str, Option<TempTs>)> = Vec::new();

    if let Some(api) = &settings.temp_api_outside {
        let sample = cached_fetch(&mut st.caches.temps, settings, "outside_raw", move || {
            ctx.sources.outside_temp_api(api)
        })
        .await;
        samples.push(("outside_raw", sample));
    }
    let sample = cached_fetch(&mut st.caches.temps, settings, "weather_obs", move || {
        ctx.sources.fmi_observation(settings)
    })
    .await;
    samples.push(("weather_obs", sample));
    let sample = cached_fetch(&mut st.caches.temps, settings, "owm", move || {
        ctx.sources.open_weather_map(settings)
    })
    .await;
    samples.push(("owm", sample));

    let fused = fusion::fuse_temps(bag.now, fusion::MAX_SAMPLE_AGE_MINUTES, &samples);
    bag.add_info(format!("Outside temperature: {}", show(&fused.map(|s| s.temp))));

    match fused {
        Some(sample) => {
            bag.outside = Some(sample);
            bag.valid_outside = true;
        }
        None => {
            bag.valid_outside = false;
            if let Some(mean) = bag.mean_forecast {
                bag.outside = Some(TempTs::new(mean, bag.now));
                bag.add_info(format!(
                    "Using mean forecast as outside temp: {}",
                    decimal_round(mean, 1)
                ));
            } else {
                bag.outside = Some(TempTs::new(PREDEFINED_OUTSIDE_TEMP, bag.now));
                bag.add_info(format!(
                    "Using predefined outside temperature: {PREDEFINED_OUTSIDE_TEMP}"
                ));
            }
        }
    }
    Ok(())
}

pub async fn compute_target(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let outside = bag.outside.ok_or_else(|| anyhow!("no outside temperature in the bag"))?;
    let outside_for_calc = match bag.mean_forecast {
        Some(mean) => TempTs::new(mean, bag.now),
        None => outside,
    };

    let buffer_hours = model::resolve_buffer_hours(
        &ctx.settings.cooling_time_buffer,
        outside_for_calc.temp,
        bag.forecast.as_ref(),
    );
    bag.add_info(format!(
        "Buffer is {} h at {} C",
        decimal_round(buffer_hours, 1),
        decimal_round(outside_for_calc.temp, 1)
    ));

    let minimum = st.minimum_inside_temp.unwrap_or(ctx.settings.minimum_inside_temp);
    bag.target = model::target_inside_temperature(
        bag.now,
        ctx.settings.cooling_rate_per_hour_per_temperature_diff,
        buffer_hours,
        outside_for_calc,
        ctx.settings.allowed_minimum_inside_temp,
        minimum,
        bag.forecast.as_ref(),
    );
    Ok(())
}

pub async fn adjust_target_with_dew_point(
    ctx: &Ctx,
    bag: &mut Bag,
    st: &mut PipelineState,
) -> Result<()> {
    let settings = &ctx.settings;
    let sample = cached_fetch(&mut st.caches.temps, settings, "dew_point", move || {
        ctx.sources.fmi_dew_point(settings)
    })
    .await;
    let dew_point =
        fusion::fuse_temps(bag.now, DEW_POINT_MAX_AGE_MINUTES, &[("dew_point", sample)]);
    bag.add_info(format!(
        "Dew point: {}",
        show(&decimal_round_opt(dew_point.map(|s| s.temp), 1))
    ));

    if let Some(dew) = dew_point {
        let min_temp_with_rh = model::estimate_temperature_with_rh(dew.temp, dec!(0.8));
        bag.add_info(format!("Temp with 80% RH: {}", decimal_round(min_temp_with_rh, 1)));
        bag.target = bag.target.max(min_temp_with_rh);
    }
    bag.add_info(format!("Target inside temperature: {}", decimal_round(bag.target, 1)));
    Ok(())
}

pub async fn set_hysteresis(ctx: &Ctx, bag: &mut Bag, _st: &mut PipelineState) -> Result<()> {
    bag.hysteresis = ctx.settings.hysteresis;
    bag.add_info(format!(
        "Hysteresis: {} ({})",
        decimal_round(bag.hysteresis, 1),
        decimal_round(bag.target + bag.hysteresis, 1)
    ));
    Ok(())
}

pub async fn get_inside(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let settings = &ctx.settings;
    let mut sample = None;

    if let Some(smartthings) = &settings.smartthings {
        for device_id in &smartthings.device_ids {
            let device_id = device_id.as_str();
            sample = cached_fetch(&mut st.caches.temps, settings, "smartthings", move || {
                ctx.sources.smartthings(smartthings, device_id)
            })
            .await;
            if sample.is_some() {
                break;
            }
        }
    } else if let Some(endpoint) = &settings.inside_temp_endpoint {
        let endpoint = endpoint.as_str();
        sample = cached_fetch(&mut st.caches.temps, settings, "inside", move || {
            ctx.sources.inside_endpoint(endpoint)
        })
        .await;
    }

    bag.inside = fusion::fuse_temps(bag.now, INSIDE_MAX_AGE_MINUTES, &[("inside", sample)])
        .map(|s| s.temp);
    bag.add_info(format!("Inside temperature: {}", show(&bag.inside)));
    Ok(())
}

pub async fn get_error(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    bag.error = hysteresis::calc_error(bag.target, bag.inside, bag.hysteresis);
    bag.error_raw = hysteresis::calc_error(bag.target, bag.inside, Decimal::ZERO);
    st.hysteresis_going_up =
        hysteresis::update_direction(st.hysteresis_going_up, bag.inside, bag.target, bag.hysteresis);

    if let (Some(inside), Some(outside)) = (bag.inside, bag.outside) {
        let buffer = model::cooling_buffer(
            ctx.settings.cooling_rate_per_hour_per_temperature_diff,
            inside,
            outside,
            ctx.settings.allowed_minimum_inside_temp,
            bag.forecast.as_ref(),
        );
        bag.add_info(format!("Cooling buffer: {buffer} h"));
    }
    Ok(())
}

pub async fn update_controller(_ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let controller = st
        .controller
        .as_mut()
        .ok_or_else(|| anyhow!("controller not loaded"))?;

    let max_slope = dec!(0.05);
    let lowest_heating_value = dec!(0) - dec!(0.01);
    let highest_heating_value = dec!(1) + dec!(0.01);
    controller.set_i_low_limit(lowest_heating_value - max_slope * controller.kd());
    controller.set_i_high_limit(highest_heating_value + max_slope * controller.kd());

    let (output, line) = controller.update(bag.now, bag.error, bag.error_raw);
    bag.add_info(format!("Controller: {} ({line})", decimal_round(output, 2)));
    bag.controller_output = output;
    Ok(())
}

pub async fn select_command(_ctx: &Ctx, bag: &mut Bag, _st: &mut PipelineState) -> Result<()> {
    let outside = bag.outside.ok_or_else(|| anyhow!("no outside temperature in the bag"))?;
    let command = selector::select_command(
        bag.controller_output,
        bag.inside,
        outside,
        bag.valid_outside,
        bag.target,
        bag.is_summer,
    );
    bag.add_info(format!("Next command: {command}"));
    bag.next_command = Some(command);
    Ok(())
}

pub async fn maybe_send_status_mail(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let mut parts: Vec<&str> = Vec::new();
    if !bag.have_valid_time {
        parts.push("no valid time");
    }
    if bag.forecast.is_none() {
        parts.push("no forecast");
    }
    if !bag.valid_outside {
        parts.push("no outside temp");
    }
    match bag.inside {
        None => parts.push("no inside temp"),
        Some(inside) if inside <= bag.target - Decimal::ONE => {
            parts.push("inside is 1 degree or more below target")
        }
        Some(_) => {}
    }
    if st.controller.as_ref().is_some_and(|c| c.integral_at_max()) {
        parts.push("controller i term at max");
    }

    let status = if parts.is_empty() { "ok".to_string() } else { parts.join(", ") };
    bag.add_info(format!("Status: {status}"));

    if st.last_status_email.as_deref() != Some(status.as_str()) {
        // the very first status after start is recorded, not mailed
        if st.last_status_email.is_some() {
            ctx.mailer.send("Status", &bag.trace.join("\n")).await;
        }
        st.last_status_email = Some(status.clone());
    }
    bag.status = Some(status);
    Ok(())
}

pub async fn send_ir(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let selected = bag.next_command.ok_or_else(|| anyhow!("no command selected"))?;
    let decision = hysteresis::decide_transmission(
        st.last_command,
        st.heating_start_time,
        st.last_command_send_time,
        st.hysteresis_going_up,
        selected,
        bag.error,
        bag.now,
    );

    if decision.send {
        match ctx.ir.send(&decision.command).await {
            Ok(()) => {
                if let Err(e) = ctx.storage.append_ir_log(&decision.command) {
                    tracing::warn!(error = %e, "could not append to the IR log");
                }
                st.last_command = Some(decision.command);
                st.last_command_send_time = Some(bag.now);
                if decision.heating_started {
                    st.heating_start_time = Some(bag.now);
                }
                if decision.notify {
                    let stamp =
                        bag.now.with_timezone(&ctx.settings.tz()).format("%d.%m.%Y %H:%M");
                    ctx.mailer
                        .send(
                            &format!("Send IR {}", decision.command),
                            &format!(
                                "Send IR {} at {stamp}\n\n{}",
                                decision.command,
                                bag.trace.join("\n")
                            ),
                        )
                        .await;
                }
            }
            Err(e) => {
                // keep last_command as it was so the next round retries
                bag.add_info(format!("Send IR failed: {e}"));
                ctx.mailer
                    .send(
                        &format!("Send IR {}", decision.command),
                        &format!(
                            "Send IR {} failed: {e}\n\n{}",
                            decision.command,
                            bag.trace.join("\n")
                        ),
                    )
                    .await;
            }
        }
    }

    bag.add_info(format!("Actual last command: {}", show(&st.last_command)));
    Ok(())
}

pub async fn write_log(ctx: &Ctx, bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let command = st.last_command.or(bag.next_command);
    let stamp = bag.now.with_timezone(&ctx.settings.tz()).format("%d.%m.%Y %H:%M");
    let content = format!("{}\n{stamp}\n{}", show(&command), bag.trace.join("\n"));
    ctx.cells.write_log(&content).await;
    Ok(())
}

pub async fn save_controller(ctx: &Ctx, _bag: &mut Bag, st: &mut PipelineState) -> Result<()> {
    let controller = st
        .controller
        .as_ref()
        .ok_or_else(|| anyhow!("controller not loaded"))?;
    ctx.storage.save_controller_integral(controller.integral())?;
    Ok(())
}
