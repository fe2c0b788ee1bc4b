// lib.rs — Shared vocabulary for the heat-pump controller and operator console

use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// =============================== Common =====================================

pub type Timestamp = DateTime<Utc>;

/// Set-points the pump accepts over IR, in ascending order.
pub const SET_POINTS: [i32; 10] = [8, 10, 16, 18, 20, 22, 24, 26, 28, 30];

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("no such set-point: {0}")]
    InvalidSetPoint(i32),
    #[error("unknown command token: {0}")]
    UnknownToken(String),
}

// ============================== Commands ====================================

/// One discrete pump command. `Off` sorts below every heating command and
/// heating commands sort by set-point, so `max` picks the strongest command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Command {
    Off,
    Heat(i32),
}

impl Command {
    pub fn heat(set_point: i32) -> Result<Self, ProtocolError> {
        if SET_POINTS.contains(&set_point) {
            Ok(Command::Heat(set_point))
        } else {
            Err(ProtocolError::InvalidSetPoint(set_point))
        }
    }

    /// All heating commands, weakest first.
    pub fn heating_ladder() -> impl Iterator<Item = Command> {
        SET_POINTS.iter().map(|sp| Command::Heat(*sp))
    }

    pub fn set_point(&self) -> Option<Decimal> {
        match self {
            Command::Off => None,
            Command::Heat(sp) => Some(Decimal::from(*sp)),
        }
    }

    pub fn is_heating(&self) -> bool {
        matches!(self, Command::Heat(_))
    }

    /// The literal argv token understood by the IR transmitter. The low
    /// set-points run without the fan profile.
    pub fn token(&self) -> String {
        match self {
            Command::Off => "off".to_string(),
            Command::Heat(sp) if *sp < 16 => format!("heat_{sp}__swing_down"),
            Command::Heat(sp) => format!("heat_{sp}__fan_high__swing_down"),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "off" {
            return Ok(Command::Off);
        }
        for sp in SET_POINTS {
            if s == Command::Heat(sp).token() {
                return Ok(Command::Heat(sp));
            }
        }
        Err(ProtocolError::UnknownToken(s.to_string()))
    }
}

impl From<Command> for String {
    fn from(c: Command) -> String {
        c.token()
    }
}

impl TryFrom<String> for Command {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ========================= Samples & forecasts ==============================

/// A temperature observation or forecast point. Timestamps are UTC instants;
/// anything timezone-flavoured happens at the display edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempTs {
    pub temp: Decimal,
    pub ts: Timestamp,
}

impl TempTs {
    pub fn new(temp: Decimal, ts: Timestamp) -> Self {
        Self { temp, ts }
    }
}

/// Hourly forecast series plus the instant it was fetched. Samples are
/// strictly increasing in time and at most one hour apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub temps: Vec<TempTs>,
    pub ts: Timestamp,
}

impl Forecast {
    pub fn new(temps: Vec<TempTs>, ts: Timestamp) -> Self {
        Self { temps: resample_hourly(temps), ts }
    }

    /// Mean over the first `hours` samples.
    pub fn mean_over(&self, hours: usize) -> Option<Decimal> {
        mean(self.temps.iter().take(hours).map(|t| t.temp))
    }

    pub fn span_hours(&self) -> Decimal {
        match (self.temps.first(), self.temps.last()) {
            (Some(first), Some(last)) => {
                Decimal::from((last.ts - first.ts).num_seconds()) / dec!(3600)
            }
            _ => Decimal::ZERO,
        }
    }
}

/// Enforce the forecast invariant: drop out-of-order samples and fill gaps
/// wider than an hour by repeating the last known value at one-hour steps.
pub fn resample_hourly(temps: Vec<TempTs>) -> Vec<TempTs> {
    let mut out: Vec<TempTs> = Vec::with_capacity(temps.len());
    for sample in temps {
        if let Some(prev) = out.last().copied() {
            if sample.ts <= prev.ts {
                continue;
            }
            let mut cursor = prev;
            while sample.ts - cursor.ts > Duration::hours(1) {
                cursor = TempTs::new(cursor.temp, cursor.ts + Duration::hours(1));
                out.push(cursor);
            }
        }
        out.push(sample);
    }
    out
}

// ========================= Operator messages ================================

/// Closed variant for everything an operator may ask for. Anything else on
/// the wire decodes to `None` and the machine stays where it is.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    TurnOff,
    SetTemp { temp: i32 },
    Auto { min_inside_temp: Option<Decimal> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorMessage {
    pub command: OperatorCommand,
}

#[derive(Deserialize)]
struct WireMessage {
    command: String,
    #[serde(default)]
    param: Option<Value>,
}

fn decimal_from_value(v: &Value) -> Option<Decimal> {
    match v {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

impl OperatorMessage {
    /// Decode a raw message cell value. Malformed JSON and unknown commands
    /// are treated as "no message".
    pub fn parse(raw: &str) -> Option<Self> {
        let wire: WireMessage = serde_json::from_str(raw).ok()?;
        Self::from_wire(&wire.command, wire.param.as_ref())
    }

    /// Decode the two columns of a command-log row.
    pub fn from_parts(command: &str, param: &str) -> Option<Self> {
        let value = if param.is_empty() {
            None
        } else {
            serde_json::from_str::<Value>(param).ok()
        };
        Self::from_wire(command, value.as_ref())
    }

    fn from_wire(command: &str, param: Option<&Value>) -> Option<Self> {
        let command = match command {
            "turn off" => OperatorCommand::TurnOff,
            "set temp" => OperatorCommand::SetTemp {
                temp: param?.get("temp")?.as_i64()? as i32,
            },
            "auto" => OperatorCommand::Auto {
                min_inside_temp: param
                    .and_then(|p| p.get("min_inside_temp"))
                    .and_then(decimal_from_value),
            },
            _ => return None,
        };
        Some(Self { command })
    }

    pub fn command_word(&self) -> &'static str {
        match self.command {
            OperatorCommand::TurnOff => "turn off",
            OperatorCommand::SetTemp { .. } => "set temp",
            OperatorCommand::Auto { .. } => "auto",
        }
    }

    pub fn param_json(&self) -> String {
        match &self.command {
            OperatorCommand::TurnOff => String::new(),
            OperatorCommand::SetTemp { temp } => format!(r#"{{"temp":{temp}}}"#),
            OperatorCommand::Auto { min_inside_temp: None } => String::new(),
            OperatorCommand::Auto { min_inside_temp: Some(min) } => {
                format!(r#"{{"min_inside_temp":"{min}"}}"#)
            }
        }
    }

    /// The JSON the console writes into the message cell.
    pub fn to_wire_json(&self) -> String {
        let param = self.param_json();
        if param.is_empty() {
            format!(r#"{{"command":"{}","param":null}}"#, self.command_word())
        } else {
            format!(r#"{{"command":"{}","param":{}}}"#, self.command_word(), param)
        }
    }

    pub fn is_auto(&self) -> bool {
        matches!(self.command, OperatorCommand::Auto { .. })
    }
}

// ============================ Numeric kernel ================================

/// Half-up rounding, the convention used for every displayed temperature.
pub fn decimal_round(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
}

pub fn decimal_round_opt(value: Option<Decimal>, decimals: u32) -> Option<Decimal> {
    value.map(|v| decimal_round(v, decimals))
}

pub fn mean(values: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    let mut sum = Decimal::ZERO;
    let mut n = 0u32;
    for v in values {
        sum += v;
        n += 1;
    }
    if n == 0 { None } else { Some(sum / Decimal::from(n)) }
}

/// Median by temperature. For an even count the temperature is the midpoint
/// of the two central samples and the timestamp lies halfway between theirs.
/// Ties sort by timestamp so the result does not depend on input order.
pub fn median(samples: &[TempTs]) -> Option<TempTs> {
    let mut sorted: Vec<TempTs> = samples.to_vec();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| match a.temp.cmp(&b.temp) {
        Ordering::Equal => a.ts.cmp(&b.ts),
        other => other,
    });
    let n = sorted.len();
    if n % 2 == 1 {
        Some(sorted[n / 2])
    } else {
        let lo = sorted[n / 2 - 1];
        let hi = sorted[n / 2];
        Some(TempTs::new(
            (lo.temp + hi.temp) / dec!(2),
            lo.ts + (hi.ts - lo.ts).abs() / 2,
        ))
    }
}

/// Elementwise median over several forecast series. Series are first aligned
/// to a common head: whatever starts earlier than the latest head loses its
/// leading samples. Positions past a shorter series take the median of the
/// series that still have samples there.
pub fn median_series(series: &[Vec<TempTs>]) -> Option<Vec<TempTs>> {
    let nonempty: Vec<&Vec<TempTs>> = series.iter().filter(|s| !s.is_empty()).collect();
    let head = nonempty.iter().map(|s| s[0].ts).max()?;
    let aligned: Vec<Vec<TempTs>> = nonempty
        .iter()
        .map(|s| s.iter().copied().filter(|t| t.ts >= head).collect())
        .collect();
    let longest = aligned.iter().map(|s| s.len()).max()?;
    let mut fused = Vec::with_capacity(longest);
    for i in 0..longest {
        let at: Vec<TempTs> = aligned.iter().filter_map(|s| s.get(i).copied()).collect();
        if let Some(m) = median(&at) {
            fused.push(m);
        }
    }
    if fused.is_empty() { None } else { Some(fused) }
}

// ================================ Tests =====================================
