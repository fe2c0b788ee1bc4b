//! Everything that stands between "the selector wants X" and "X goes out
//! over IR": the error band, the direction latch, the minimum heating time
//! and the daily force-send.

use chrono::Duration;
use pump_protocol::{Command, Timestamp};
use rust_decimal::Decimal;

/// Heating, once started, runs at least this long before OFF is allowed.
pub const MIN_TIME_HEATING_SECS: i64 = 2700;
/// Re-transmit an unchanged command this often in case a frame was missed.
pub const FORCE_SEND_SECS: i64 = 24 * 3600;

/// Error with the hysteresis band applied: small overshoots above target
/// (up to `hyst` degrees) count as zero so the regulator does not chatter.
pub fn calc_error(target: Decimal, inside: Option<Decimal>, hyst: Decimal) -> Option<Decimal> {
    inside.map(|i| {
        let e = target - i;
        e - e.min(Decimal::ZERO).clamp(-hyst, Decimal::ZERO)
    })
}

/// The direction latch: latched up while inside is still below target,
/// latched down once it has overshot past the band.
pub fn update_direction(
    going_up: bool,
    inside: Option<Decimal>,
    target: Decimal,
    hyst: Decimal,
) -> bool {
    match inside {
        Some(i) if i < target => true,
        Some(i) if i > target + hyst => false,
        _ => going_up,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transmission {
    /// What the pump should be doing after this tick (sent or held).
    pub command: Command,
    pub send: bool,
    /// A heat/off transition worth a notification mail.
    pub notify: bool,
    /// This send starts a heating run.
    pub heating_started: bool,
}

/// Decide whether the selected command actually goes out.
pub fn decide_transmission(
    last_command: Option<Command>,
    heating_start_time: Option<Timestamp>,
    last_send_time: Option<Timestamp>,
    hysteresis_going_up: bool,
    selected: Command,
    error: Option<Decimal>,
    now: Timestamp,
) -> Transmission {
    let mut next = selected;
    if let Some(last) = last_command {
        // while inside still climbs toward target, never step down; while it
        // coasts back, never step up
        if (hysteresis_going_up && next < last) || (!hysteresis_going_up && next > last) {
            next = last;
        }
    }

    let heating_for = heating_start_time.map(|t| now - t).unwrap_or_else(Duration::zero);
    let min_time_elapsed = heating_for > Duration::seconds(MIN_TIME_HEATING_SECS);

    let was_off = last_command.is_none_or(|l| l == Command::Off);
    let was_heating = last_command.is_none_or(|l| l != Command::Off);
    let from_off_to_heating = was_off && next != Command::Off;
    let from_heating_to_off = was_heating && next == Command::Off;
    let from_heating_to_heating = was_heating && next != Command::Off;

    let send = last_command.is_none()
        || last_command != Some(next)
            && (from_off_to_heating && error.is_none_or(|e| e > Decimal::ZERO)
                || from_heating_to_off
                    && error.is_none_or(|e| e < Decimal::ZERO)
                    && min_time_elapsed
                || from_heating_to_heating);

    if send {
        return Transmission {
            command: next,
            send: true,
            notify: from_off_to_heating || from_heating_to_off,
            heating_started: from_off_to_heating,
        };
    }

    let force = last_command == Some(next)
        && last_send_time.is_some_and(|t| now - t > Duration::seconds(FORCE_SEND_SECS));
    Transmission {
        command: last_command.unwrap_or(next),
        send: force,
        notify: false,
        heating_started: false,
    }
}
