//! Parsing for the yr.no tabular forecast XML (hour-by-hour and the wider
//! multi-hour forecast used to extend it). Times in the document are local
//! to the forecast place; the `timezone` element says which zone.

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use pump_protocol::{TempTs, Timestamp};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use rust_decimal::Decimal;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YrEntry {
    pub from: Timestamp,
    pub to: Timestamp,
    pub temp: Decimal,
}

fn attr(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    Ok(e.try_get_attribute(name)?
        .map(|a| a.unescape_value().map(|v| v.into_owned()))
        .transpose()?)
}

fn local_to_utc(tz: Tz, raw: &str) -> Option<Timestamp> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok()?;
    tz.from_local_datetime(&naive).earliest().map(|dt| dt.with_timezone(&Utc))
}

/// All `<time from to>` entries with their temperature.
pub fn parse_tabular(xml: &str) -> Result<Vec<YrEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut tz = Tz::UTC;
    let mut span: Option<(String, String)> = None;
    let mut temp: Option<Decimal> = None;
    let mut out = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"timezone" => {
                    if let Some(id) = attr(&e, "id")? {
                        tz = id.parse().unwrap_or(Tz::UTC);
                    }
                }
                b"time" => {
                    let from = attr(&e, "from")?.context("time without @from")?;
                    let to = attr(&e, "to")?.context("time without @to")?;
                    span = Some((from, to));
                    temp = None;
                }
                b"temperature" => {
                    if let Some(v) = attr(&e, "value")? {
                        temp = Decimal::from_str(&v).ok();
                    }
                }
                _ => {}
            },
            Event::End(e) => {
                if e.name().as_ref() == b"time" {
                    if let (Some((from, to)), Some(value)) = (span.take(), temp.take()) {
                        if let (Some(from), Some(to)) =
                            (local_to_utc(tz, &from), local_to_utc(tz, &to))
                        {
                            out.push(YrEntry { from, to, temp: value });
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(out)
}

pub fn hourly_temps(entries: &[YrEntry]) -> Vec<TempTs> {
    entries.iter().map(|e| TempTs::new(e.temp, e.from)).collect()
}

/// Extend an hourly series with the wider forecast: repeat each wider value
/// at one-hour steps until its `@to` instant is covered.
pub fn extend_hourly(mut temps: Vec<TempTs>, wider: &[YrEntry]) -> Vec<TempTs> {
    for entry in wider {
        while let Some(last) = temps.last().copied() {
            if entry.to <= last.ts {
                break;
            }
            temps.push(TempTs::new(entry.temp, last.ts + chrono::Duration::hours(1)));
        }
    }
    temps
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn doc(times: &str) -> String {
        format!(
            "<weatherdata>\
             <location><name>Tampere</name>\
             <timezone id=\"Europe/Helsinki\" utcoffsetMinutes=\"120\"/>\
             </location>\
             <forecast><tabular>{times}</tabular></forecast>\
             </weatherdata>"
        )
    }

    fn time(from: &str, to: &str, value: &str) -> String {
        format!(
            "<time from=\"{from}\" to=\"{to}\" period=\"2\">\
             <symbol number=\"4\"/>\
             <temperature unit=\"celsius\" value=\"{value}\"/>\
             <pressure unit=\"hPa\" value=\"1009.5\"/>\
             </time>"
        )
    }

    #[test]
    fn parses_local_times_into_utc() {
        let xml = doc(&time("2018-02-01T14:00:00", "2018-02-01T15:00:00", "-5"));
        let entries = parse_tabular(&xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].temp, dec!(-5));
        // Helsinki winter time is UTC+2
        assert_eq!(entries[0].from, "2018-02-01T12:00:00Z".parse::<Timestamp>().unwrap());
        assert_eq!(entries[0].to, "2018-02-01T13:00:00Z".parse::<Timestamp>().unwrap());
    }

    #[test]
    fn skips_times_without_temperature() {
        let xml = doc(
            "<time from=\"2018-02-01T14:00:00\" to=\"2018-02-01T15:00:00\" period=\"2\">\
             <symbol number=\"4\"/></time>",
        );
        assert!(parse_tabular(&xml).unwrap().is_empty());
    }

    #[test]
    fn wider_forecast_extends_by_repeating() {
        let hourly = vec![
            TempTs::new(dec!(-5), "2018-02-01T12:00:00Z".parse().unwrap()),
            TempTs::new(dec!(-6), "2018-02-01T13:00:00Z".parse().unwrap()),
        ];
        let wider = [YrEntry {
            from: "2018-02-01T12:00:00Z".parse().unwrap(),
            to: "2018-02-01T16:00:00Z".parse().unwrap(),
            temp: dec!(-8),
        }];
        let extended = extend_hourly(hourly, &wider);
        assert_eq!(extended.len(), 5);
        assert_eq!(extended[2].temp, dec!(-8));
        assert_eq!(extended[4].temp, dec!(-8));
        assert_eq!(extended[4].ts, "2018-02-01T16:00:00Z".parse::<Timestamp>().unwrap());
    }

    #[test]
    fn extension_past_covered_span_is_a_no_op() {
        let hourly = vec![TempTs::new(dec!(-5), "2018-02-01T12:00:00Z".parse().unwrap())];
        let wider = [YrEntry {
            from: "2018-02-01T10:00:00Z".parse().unwrap(),
            to: "2018-02-01T11:00:00Z".parse().unwrap(),
            temp: dec!(0),
        }];
        assert_eq!(extend_hourly(hourly.clone(), &wider), hourly);
    }
}
