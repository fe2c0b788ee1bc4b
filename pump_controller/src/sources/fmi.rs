//! FMI open-data WFS parsing. Observations, forecasts and dew points all
//! arrive as `BsWfs:BsWfsElement` members with a time and a parameter value.

use anyhow::Result;
use pump_protocol::{TempTs, Timestamp};
use quick_xml::Reader;
use quick_xml::events::Event;
use rust_decimal::Decimal;
use std::str::FromStr;

enum Field {
    Time,
    Value,
}

/// Every (time, value) pair in document order. Entries whose value does not
/// parse as a finite decimal (FMI emits literal `NaN` for gaps) are skipped.
pub fn parse_wfs_samples(xml: &str) -> Result<Vec<TempTs>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut field: Option<Field> = None;
    let mut time: Option<Timestamp> = None;
    let mut value: Option<Decimal> = None;
    let mut out = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                field = match e.name().as_ref() {
                    b"BsWfs:Time" => Some(Field::Time),
                    b"BsWfs:ParameterValue" => Some(Field::Value),
                    _ => None,
                };
            }
            Event::Text(t) => {
                let text = t.unescape()?;
                match field {
                    Some(Field::Time) => time = text.parse::<Timestamp>().ok(),
                    Some(Field::Value) => value = Decimal::from_str(&text).ok(),
                    None => {}
                }
            }
            Event::End(e) => {
                if e.name().as_ref() == b"BsWfs:BsWfsElement" {
                    if let (Some(ts), Some(temp)) = (time.take(), value.take()) {
                        out.push(TempTs::new(temp, ts));
                    }
                    time = None;
                    value = None;
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

/// The most recent observation in the document, if any.
pub fn last_observation(xml: &str) -> Result<Option<TempTs>> {
    Ok(parse_wfs_samples(xml)?.into_iter().last())
}

/// Mean of all values, stamped with the last observation time. Used for the
/// dew-point query, which returns the past hour of observations.
pub fn mean_observation(xml: &str) -> Result<Option<TempTs>> {
    let samples = parse_wfs_samples(xml)?;
    let Some(last) = samples.last().copied() else {
        return Ok(None);
    };
    Ok(pump_protocol::mean(samples.iter().map(|s| s.temp))
        .map(|temp| TempTs::new(temp, last.ts)))
}
