//! PID regulator over the target-minus-inside error. Output is in command
//! coverage units: 0 means no heat wanted, 1 means the strongest command.

use chrono::Duration;
use pump_protocol::{Timestamp, decimal_round};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const PAST_ERROR_WINDOW_HOURS: i64 = 2;
const SLOPE_CLAMP_PER_HOUR: Decimal = dec!(0.5);

#[derive(Debug, Clone)]
pub struct Controller {
    kp: Decimal,
    ki: Decimal,
    kd: Decimal,
    i_low_limit: Decimal,
    i_high_limit: Decimal,
    integral: Decimal,
    current_time: Option<Timestamp>,
    past_errors: Vec<(Timestamp, Decimal)>,
}

impl Controller {
    pub fn new(kp: Decimal, ki: Decimal, kd: Decimal) -> Self {
        Self {
            kp,
            ki,
            kd,
            i_low_limit: Decimal::ZERO,
            i_high_limit: Decimal::ZERO,
            integral: Decimal::ZERO,
            current_time: None,
            past_errors: Vec::new(),
        }
    }

    pub fn kd(&self) -> Decimal {
        self.kd
    }

    pub fn reset(&mut self) {
        self.integral = Decimal::ZERO;
        self.current_time = None;
        self.reset_past_errors();
    }

    /// Forget the error history so a changed target does not register as a
    /// huge slope.
    pub fn reset_past_errors(&mut self) {
        self.past_errors.clear();
    }

    pub fn is_reset(&self) -> bool {
        self.current_time.is_none()
    }

    pub fn integral(&self) -> Decimal {
        self.integral
    }

    pub fn restore_integral(&mut self, integral: Decimal) {
        self.integral = integral;
    }

    pub fn integral_at_max(&self) -> bool {
        self.integral >= self.i_high_limit
    }

    pub fn set_i_low_limit(&mut self, value: Decimal) {
        tracing::debug!(limit = %value, "controller i low limit");
        self.i_low_limit = value;
    }

    pub fn set_i_high_limit(&mut self, value: Decimal) {
        tracing::debug!(limit = %value, "controller i high limit");
        self.i_high_limit = value;
    }

    fn update_past_errors(&mut self, now: Timestamp, error: Decimal) {
        self.past_errors.push((now, error));
        let limit = now - Duration::hours(PAST_ERROR_WINDOW_HOURS);
        self.past_errors.retain(|(ts, _)| *ts >= limit);
    }

    /// Least-squares slope of the retained errors, per second. The x axis is
    /// shifted to the oldest retained error to keep the products small.
    fn past_error_slope_per_second(&self) -> Decimal {
        let Some((t0, _)) = self.past_errors.first() else {
            return Decimal::ZERO;
        };
        let n = Decimal::from(self.past_errors.len());
        let mut sum_x = Decimal::ZERO;
        let mut sum_y = Decimal::ZERO;
        let mut sum_xy = Decimal::ZERO;
        let mut sum_x2 = Decimal::ZERO;
        for (ts, error) in &self.past_errors {
            let x = Decimal::from((*ts - *t0).num_seconds());
            sum_x += x;
            sum_y += *error;
            sum_xy += x * *error;
            sum_x2 += x * x;
        }
        let divider = n * sum_x2 - sum_x * sum_x;
        if divider.is_zero() {
            Decimal::ZERO
        } else {
            (n * sum_xy - sum_x * sum_y) / divider
        }
    }

    /// One regulator tick. `error` has the hysteresis band applied; the raw
    /// error feeds the slope history. Returns the output and a summary line
    /// for the trace.
    pub fn update(
        &mut self,
        now: Timestamp,
        error: Option<Decimal>,
        error_without_hysteresis: Option<Decimal>,
    ) -> (Decimal, String) {
        let error = match (error, error_without_hysteresis) {
            (Some(e), raw) => {
                self.update_past_errors(now, raw.unwrap_or(e));
                e
            }
            (None, _) => Decimal::ZERO,
        };

        let p_term = self.kp * error;

        let slope_per_hour = (self.past_error_slope_per_second() * dec!(3600))
            .clamp(-SLOPE_CLAMP_PER_HOUR, SLOPE_CLAMP_PER_HOUR);

        if let Some(previous) = self.current_time {
            let delta_time = Decimal::from((now - previous).num_seconds());
            // integrate only while the system is not already self-correcting
            let converging_up = error > Decimal::ZERO && slope_per_hour >= dec!(-0.05);
            let converging_down = error < Decimal::ZERO && slope_per_hour <= Decimal::ZERO;
            if converging_up || converging_down {
                let update = self.ki * error * delta_time / dec!(3600);
                tracing::debug!(update = %update, "updating integral");
                self.integral += update;
            } else {
                tracing::debug!("not updating integral");
            }
        }
        self.current_time = Some(now);

        if self.integral > self.i_high_limit {
            self.integral = self.i_high_limit;
        } else if self.integral < self.i_low_limit {
            self.integral = self.i_low_limit;
        }

        let i_term = self.integral;
        let d_term = self.kd * slope_per_hour;
        let output = p_term + i_term + d_term;

        let line = format!(
            "e {:.2}, p {:.2}, i {:.2} ({:.2}-{:.2}), d {:.2} slope {:.2}, out {:.2}",
            error,
            p_term,
            i_term,
            self.i_low_limit,
            self.i_high_limit,
            d_term,
            decimal_round(slope_per_hour, 2),
            decimal_round(output, 2),
        );
        (output, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(minutes: i64) -> Timestamp {
        "2018-01-15T12:00:00Z".parse::<Timestamp>().unwrap() + Duration::minutes(minutes)
    }

    fn controller() -> Controller {
        let mut c = Controller::new(dec!(2), dec!(2), dec!(15));
        c.set_i_low_limit(dec!(-0.76));
        c.set_i_high_limit(dec!(1.76));
        c
    }

    #[test]
    fn first_tick_has_no_integral_contribution() {
        let mut c = controller();
        assert!(c.is_reset());
        let (out, _) = c.update(ts(0), Some(dec!(0.5)), Some(dec!(0.5)));
        // p = 1.0, i = 0, d = 0 (single point has no slope)
        assert_eq!(out, dec!(1.0));
        assert!(!c.is_reset());
    }

    #[test]
    fn integral_accumulates_over_time() {
        let mut c = controller();
        c.update(ts(0), Some(dec!(0.5)), Some(dec!(0.5)));
        // constant error for an hour: i += ki * e * 1h = 2 * 0.5 = 1.0
        let (_, line) = c.update(ts(60), Some(dec!(0.5)), Some(dec!(0.5)));
        assert_eq!(c.integral(), dec!(1.0));
        assert!(line.contains("i 1.00"), "line was: {line}");
    }

    #[test]
    fn integral_respects_its_limits() {
        let mut c = controller();
        c.update(ts(0), Some(dec!(5)), Some(dec!(5)));
        for i in 1..10 {
            // constant error keeps the slope at zero, so integration goes on
            c.update(ts(i * 60), Some(dec!(5)), Some(dec!(5)));
            assert!(c.integral() <= dec!(1.76));
            assert!(c.integral() >= dec!(-0.76));
        }
        assert_eq!(c.integral(), dec!(1.76));
        assert!(c.integral_at_max());
    }

    #[test]
    fn negative_integral_snaps_to_lower_limit() {
        let mut c = controller();
        c.update(ts(0), Some(dec!(-5)), Some(dec!(-5)));
        for i in 1..10 {
            c.update(ts(i * 60), Some(dec!(-5)), Some(dec!(-5)));
        }
        assert_eq!(c.integral(), dec!(-0.76));
    }

    #[test]
    fn rising_inside_gates_the_integral() {
        let mut c = controller();
        // positive error shrinking fast: inside is rising, slope < -0.05/h
        c.update(ts(0), Some(dec!(1.0)), Some(dec!(1.0)));
        c.update(ts(60), Some(dec!(0.5)), Some(dec!(0.5)));
        let before = c.integral();
        c.update(ts(120), Some(dec!(0.2)), Some(dec!(0.2)));
        assert_eq!(c.integral(), before, "integral moved while self-correcting");
    }

    #[test]
    fn missing_error_means_zero_error() {
        let mut c = controller();
        c.update(ts(0), Some(dec!(1)), Some(dec!(1)));
        let (out, _) = c.update(ts(60), None, None);
        // e = 0: no p, no integration; only d from the single history point
        assert_eq!(out, Decimal::ZERO);
    }

    #[test]
    fn derivative_follows_the_raw_error_slope() {
        let mut c = controller();
        // hysteresis zeroes the banded error but the raw error keeps falling
        c.update(ts(0), Some(dec!(0)), Some(dec!(0.4)));
        let (out, _) = c.update(ts(60), Some(dec!(0)), Some(dec!(0.2)));
        // slope -0.2/h: d = 15 * -0.2 = -3
        assert!((out - dec!(-3.0)).abs() < dec!(0.000001), "got {out}");
    }

    #[test]
    fn slope_is_clamped() {
        let mut c = controller();
        c.update(ts(0), Some(dec!(10)), Some(dec!(10)));
        let (_, line) = c.update(ts(30), Some(dec!(0)), Some(dec!(0)));
        // raw slope is -20/h; the clamp holds it at -0.5
        assert!(line.contains("slope -0.50"), "line was: {line}");
    }

    #[test]
    fn old_errors_age_out_of_the_window() {
        let mut c = controller();
        c.update(ts(0), Some(dec!(1)), Some(dec!(1)));
        c.update(ts(121), Some(dec!(1)), Some(dec!(1)));
        assert_eq!(c.past_errors.len(), 1);
    }

    #[test]
    fn reset_clears_time_integral_and_history() {
        let mut c = controller();
        c.update(ts(0), Some(dec!(1)), Some(dec!(1)));
        c.update(ts(60), Some(dec!(1)), Some(dec!(1)));
        c.reset();
        assert!(c.is_reset());
        assert_eq!(c.integral(), Decimal::ZERO);
        assert!(c.past_errors.is_empty());
    }
}
