//! Mapping the regulator output onto the discrete command ladder, plus the
//! open-loop paths for when the inside reading is gone.

use pump_protocol::{Command, TempTs};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

/// Commands worth considering. heat24 joins the ladder only in real cold;
/// above that the smaller set-points already out-run the building.
fn candidate_list(outside_temp: Decimal) -> Vec<Command> {
    let mut list = vec![
        Command::Heat(8),
        Command::Heat(10),
        Command::Heat(16),
        Command::Heat(18),
        Command::Heat(20),
        Command::Heat(22),
    ];
    if outside_temp < dec!(15) {
        list.push(Command::Heat(24));
    }
    list
}

/// Interpret `controller_output` as heat demand: at or below 0 nothing, at 1
/// the strongest candidate, linearly in between across the candidates whose
/// set-point still exceeds the inside temperature.
pub fn select_command(
    controller_output: Decimal,
    inside: Option<Decimal>,
    outside: TempTs,
    valid_outside: bool,
    target: Decimal,
    is_summer: bool,
) -> Command {
    let candidates = candidate_list(outside.temp);

    let Some(inside) = inside else {
        return open_loop_command(&candidates, outside.temp, valid_outside, target, is_summer);
    };

    if controller_output <= Decimal::ZERO {
        return Command::Off;
    }

    let heating: Vec<Command> = candidates
        .iter()
        .copied()
        .filter(|c| c.set_point().is_some_and(|sp| sp > inside))
        .collect();

    match heating.len() {
        0 => *candidates.last().expect("candidate list is never empty"),
        1 => heating[0],
        n => {
            let index = (controller_output * Decimal::from(n))
                .floor()
                .to_usize()
                .unwrap_or(0)
                .min(n - 1);
            heating[index]
        }
    }
}

/// No inside reading: heat if the outside says so (or nothing is known and
/// it is not summer), picking the set-point open loop from the spread
/// between target and outside.
fn open_loop_command(
    candidates: &[Command],
    outside_temp: Decimal,
    valid_outside: bool,
    target: Decimal,
    is_summer: bool,
) -> Command {
    let needs_heat =
        (valid_outside && outside_temp < target) || (!valid_outside && !is_summer);
    if !needs_heat {
        return Command::Off;
    }
    let threshold = target + dec!(0.625) * (target - outside_temp);
    candidates
        .iter()
        .copied()
        .find(|c| c.set_point().is_some_and(|sp| sp > threshold))
        .unwrap_or(Command::Heat(22))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pump_protocol::TempTs;

    fn outside(temp: Decimal) -> TempTs {
        TempTs::new(temp, Utc::now())
    }

    #[test]
    fn mild_weather_low_demand_selects_the_weakest_heat() {
        let cmd = select_command(dec!(0.1), Some(dec!(5)), outside(dec!(3)), true, dec!(5), false);
        assert_eq!(cmd, Command::Heat(8));
    }

    #[test]
    fn saturated_demand_selects_the_strongest_candidate() {
        let cmd = select_command(dec!(1.1), Some(dec!(5)), outside(dec!(3)), true, dec!(5), false);
        assert_eq!(cmd, Command::Heat(24));
        // same with an invalid outside: the fallback temperature still shapes the ladder
        let cmd =
            select_command(dec!(1.1), Some(dec!(5)), outside(dec!(3)), false, dec!(15), false);
        assert_eq!(cmd, Command::Heat(24));
    }

    #[test]
    fn demand_maps_linearly_across_the_ladder() {
        // seven candidates: each 1/7 of output moves one rung up
        let at = |v: Decimal| {
            select_command(v, Some(dec!(5)), outside(dec!(3)), true, dec!(5), false)
        };
        assert_eq!(at(dec!(0.14)), Command::Heat(8));
        assert_eq!(at(dec!(0.15)), Command::Heat(10));
        assert_eq!(at(dec!(0.50)), Command::Heat(18));
        assert_eq!(at(dec!(0.99)), Command::Heat(24));
    }

    #[test]
    fn zero_or_negative_demand_is_off() {
        for v in [dec!(0), dec!(-0.5)] {
            let cmd = select_command(v, Some(dec!(5)), outside(dec!(3)), true, dec!(5), false);
            assert_eq!(cmd, Command::Off);
        }
    }

    #[test]
    fn warm_inside_leaves_only_the_top_of_the_ladder() {
        // inside above every set-point except heat24
        let cmd =
            select_command(dec!(0.2), Some(dec!(23)), outside(dec!(-20)), true, dec!(20), false);
        assert_eq!(cmd, Command::Heat(24));
        // inside above the whole ladder: fall back to the highest available
        let cmd =
            select_command(dec!(0.2), Some(dec!(25)), outside(dec!(-20)), true, dec!(20), false);
        assert_eq!(cmd, Command::Heat(24));
    }

    #[test]
    fn open_loop_cold_snap_picks_from_the_spread() {
        // target 10, outside -12: threshold 10 + 0.625 * 22 = 23.75
        let cmd = select_command(dec!(1.1), None, outside(dec!(-12)), true, dec!(10), false);
        assert_eq!(cmd, Command::Heat(24));
        // moderate spread lands low on the ladder
        let cmd = select_command(dec!(1.1), None, outside(dec!(2.5)), true, dec!(3), false);
        assert_eq!(cmd, Command::Heat(8));
    }

    #[test]
    fn open_loop_falls_back_to_heat22_past_the_ladder() {
        // threshold beyond every candidate
        let cmd = select_command(dec!(1.1), None, outside(dec!(-30)), true, dec!(10), false);
        assert_eq!(cmd, Command::Heat(22));
    }

    #[test]
    fn open_loop_warm_outside_is_off() {
        let cmd = select_command(dec!(1.1), None, outside(dec!(5)), true, dec!(5), false);
        assert_eq!(cmd, Command::Off);
    }

    #[test]
    fn summer_with_all_sensors_down_is_off() {
        let cmd = select_command(dec!(0.5), None, outside(dec!(-10)), false, dec!(10), true);
        assert_eq!(cmd, Command::Off);
    }

    #[test]
    fn winter_with_all_sensors_down_heats_open_loop() {
        // fallback outside -10, target 10: threshold 22.5, first above is 24
        let cmd = select_command(dec!(0.5), None, outside(dec!(-10)), false, dec!(10), false);
        assert_eq!(cmd, Command::Heat(24));
    }
}
