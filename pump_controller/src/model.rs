//! The thermal coast model. Interior temperature drifts toward outside at
//! `cooling_rate` °C per hour per degree of difference; everything here is
//! Euler steps of at most one hour over that single constant.

use std::fmt;

use chrono::Duration;
use pump_protocol::{Forecast, TempTs, Timestamp, decimal_round, mean};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use crate::config::CoolingTimeBuffer;

/// Below roughly −17 °C outside the pump loses much of its heating power, so
/// the model doubles the simulated drop there.
const DERATING_THRESHOLD: Decimal = dec!(-17);

fn hours_between(from: Timestamp, to: Timestamp) -> Decimal {
    Decimal::from((to - from).num_seconds()) / dec!(3600)
}

/// Current outside reading followed by the strictly-later forecast samples.
fn valid_forecast(outside_now: TempTs, forecast: Option<&Forecast>) -> Vec<TempTs> {
    let mut series = vec![outside_now];
    if let Some(f) = forecast {
        series.extend(f.temps.iter().copied().filter(|s| s.ts > outside_now.ts));
    }
    series
}

fn step_back(
    inside: Decimal,
    outside: Decimal,
    hours: Decimal,
    cooling_rate: Decimal,
    floor: Decimal,
) -> Decimal {
    let mut drop = cooling_rate * (outside - inside) * hours;
    if outside <= DERATING_THRESHOLD {
        drop *= dec!(2);
    }
    (inside - drop).max(floor)
}

/// Reverse simulation: start at the safety floor `buffer_hours` in the
/// future and coast backwards through the forecast to now. The result is how
/// warm the interior has to be now so that it reaches the floor no earlier
/// than the buffer allows.
pub fn target_inside_temperature(
    now: Timestamp,
    cooling_rate: Decimal,
    buffer_hours: Decimal,
    outside_now: TempTs,
    allowed_floor: Decimal,
    minimum_inside_temp: Decimal,
    forecast: Option<&Forecast>,
) -> Decimal {
    let series = valid_forecast(outside_now, forecast);
    let tail_ts = series.last().map(|s| s.ts).unwrap_or(outside_now.ts);
    let mean_tail = mean(series.iter().map(|s| s.temp)).unwrap_or(outside_now.temp);

    let mut inside = allowed_floor;
    let buffer_secs = (buffer_hours * dec!(3600)).round().to_i64().unwrap_or(0);
    let mut t = now + Duration::seconds(buffer_secs.max(0));

    // beyond the forecast horizon the outside is taken as the forecast mean
    while t > tail_ts {
        let to_tail = hours_between(tail_ts, t);
        let step = to_tail.min(dec!(1));
        inside = step_back(inside, mean_tail, step, cooling_rate, allowed_floor);
        let secs = (step * dec!(3600)).round().to_i64().unwrap_or(0);
        if secs <= 0 {
            break;
        }
        t -= Duration::seconds(secs);
    }

    // then sample by sample, newest first, back to the current outside
    for sample in series.iter().rev() {
        if sample.ts > t {
            continue;
        }
        let step = hours_between(sample.ts, t);
        inside = step_back(inside, sample.temp, step, cooling_rate, allowed_floor);
        t = sample.ts;
    }

    inside.max(minimum_inside_temp)
}

/// Hours until the interior coasts down to the floor, or `Infinite` when it
/// never will under the forecast.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferHours {
    Hours(Decimal),
    Infinite,
}

impl fmt::Display for BufferHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferHours::Hours(h) => write!(f, "{h}"),
            BufferHours::Infinite => f.write_str("inf"),
        }
    }
}

/// Forward simulation of the coast from `inside` down to `allowed_floor`.
pub fn cooling_buffer(
    cooling_rate: Decimal,
    inside: Decimal,
    outside_now: TempTs,
    allowed_floor: Decimal,
    forecast: Option<&Forecast>,
) -> BufferHours {
    let series = valid_forecast(outside_now, forecast);
    let tail_mean = mean(series.iter().map(|s| s.temp)).unwrap_or(outside_now.temp);

    let mut current = inside;
    let mut hours = Decimal::ZERO;

    if current <= allowed_floor {
        return if tail_mean >= allowed_floor {
            BufferHours::Infinite
        } else {
            BufferHours::Hours(Decimal::ZERO)
        };
    }

    for pair in series.windows(2) {
        let step_h = hours_between(pair[0].ts, pair[1].ts);
        let drop = cooling_rate * (current - pair[0].temp) * step_h;
        if drop > Decimal::ZERO && current - drop < allowed_floor {
            let fraction = (current - allowed_floor) / drop;
            return BufferHours::Hours(decimal_round(hours + step_h * fraction, 0));
        }
        current -= drop;
        hours += step_h;
    }

    if tail_mean >= allowed_floor {
        return BufferHours::Infinite;
    }

    let mut steps = 0u32;
    loop {
        let drop = cooling_rate * (current - tail_mean);
        if drop > Decimal::ZERO && current - drop < allowed_floor {
            let fraction = (current - allowed_floor) / drop;
            return BufferHours::Hours(decimal_round(hours + fraction, 0));
        }
        current -= drop;
        hours += Decimal::ONE;
        steps += 1;
        if steps > 100_000 {
            return BufferHours::Infinite;
        }
    }
}

/// Resolve the configured buffer to hours. The quadratic form depends on the
/// outside temperature over the buffer itself, so it is iterated to a fixed
/// point against the forecast mean.
pub fn resolve_buffer_hours(
    buffer: &CoolingTimeBuffer,
    outside: Decimal,
    forecast: Option<&Forecast>,
) -> Decimal {
    match buffer {
        CoolingTimeBuffer::Constant(hours) => *hours,
        CoolingTimeBuffer::Quadratic { a, b, c } => {
            let mut guess = dec!(20);
            for _ in 0..3 {
                let horizon = guess.to_usize().unwrap_or(24).max(1);
                let m = forecast.and_then(|f| f.mean_over(horizon)).unwrap_or(outside);
                guess = (*a * m * m + *b * m + *c).max(dec!(10));
            }
            guess
        }
    }
}

/// Magnus approximation: the temperature at which the given dew point means
/// `rh` relative humidity. Keeping the interior above it avoids condensation.
pub fn estimate_temperature_with_rh(dew_point: Decimal, rh: Decimal) -> Decimal {
    let a = dec!(243.04);
    let b = dec!(17.625);
    let rh_log = rh.ln();
    let gamma = (b * dew_point) / (a + dew_point);
    a * (gamma - rh_log) / (b + rh_log - gamma)
}
