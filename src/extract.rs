//! Metric extraction from raw endpoint bodies.
//!
//! Which endpoint and which field (or HTML row) carries a metric depends only on the
//! generation, see [`source`]. Extraction itself is pure.

use crate::api::endpoint::EndpointKind;
use crate::api::response::InverterRecord;
use crate::api::Error;
use crate::model::{Generation, InverterReading, MetricName};
use chrono::{Local, TimeZone};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

const PRODUCTION_PATTERN: &str = r"<td>Currentl[^<]*</td>\s+<td>\s*(\d+(?:\.\d+)?)\s*(W|kW|MW)</td>";
const DAY_PRODUCTION_PATTERN: &str = r"<td>Today</td>\s+<td>\s*(\d+(?:\.\d+)?)\s*(Wh|kWh|MWh)</td>";
const WEEK_PRODUCTION_PATTERN: &str =
    r"<td>Past Week</td>\s+<td>\s*(\d+(?:\.\d+)?)\s*(Wh|kWh|MWh)</td>";
const LIFE_PRODUCTION_PATTERN: &str =
    r"<td>Since Installation</td>\s+<td>\s*(\d+(?:\.\d+)?)\s*(Wh|kWh|MWh)</td>";

const LAST_REPORT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

lazy_static! {
    static ref PRODUCTION: Regex = Regex::new(PRODUCTION_PATTERN).unwrap();
    static ref DAY_PRODUCTION: Regex = Regex::new(DAY_PRODUCTION_PATTERN).unwrap();
    static ref WEEK_PRODUCTION: Regex = Regex::new(WEEK_PRODUCTION_PATTERN).unwrap();
    static ref LIFE_PRODUCTION: Regex = Regex::new(LIFE_PRODUCTION_PATTERN).unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlRow {
    Currently,
    Today,
    PastWeek,
    SinceInstallation,
}

impl HtmlRow {
    fn regex(self) -> &'static Regex {
        match self {
            HtmlRow::Currently => &*PRODUCTION,
            HtmlRow::Today => &*DAY_PRODUCTION,
            HtmlRow::PastWeek => &*WEEK_PRODUCTION,
            HtmlRow::SinceInstallation => &*LIFE_PRODUCTION,
        }
    }
}

/// Where a metric lives for a given generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// JSON body of `endpoint`, addressed by an RFC 6901 pointer.
    Json {
        endpoint: EndpointKind,
        pointer: &'static str,
    },
    /// Row of the legacy HTML page.
    Html(HtmlRow),
    /// Separately fetched, authenticated inverter list.
    Inverters,
    NotAvailable,
}

impl Source {
    /// Cached endpoint this source reads from, if any.
    pub fn endpoint(self) -> Option<EndpointKind> {
        match self {
            Source::Json { endpoint, .. } => Some(endpoint),
            Source::Html(_) => Some(EndpointKind::ProductionHtml),
            Source::Inverters | Source::NotAvailable => None,
        }
    }
}

const fn json(endpoint: EndpointKind, pointer: &'static str) -> Source {
    Source::Json { endpoint, pointer }
}

/// The metric × generation table.
pub fn source(metric: MetricName, generation: Generation) -> Source {
    use EndpointKind::{ApiV1Production, ProductionJson};
    use MetricName::*;

    if metric == InvertersProduction {
        return match generation {
            Generation::LegacyHtml => Source::NotAvailable,
            _ => Source::Inverters,
        };
    }

    match generation {
        Generation::ModelS { metered: true } => match metric {
            Production => json(ProductionJson, "/production/1/wNow"),
            DailyProduction => json(ProductionJson, "/production/1/whToday"),
            SevenDaysProduction => json(ProductionJson, "/production/1/whLastSevenDays"),
            LifetimeProduction => json(ProductionJson, "/production/1/whLifetime"),
            Consumption => json(ProductionJson, "/consumption/0/wNow"),
            DailyConsumption => json(ProductionJson, "/consumption/0/whToday"),
            SevenDaysConsumption => json(ProductionJson, "/consumption/0/whLastSevenDays"),
            LifetimeConsumption => json(ProductionJson, "/consumption/0/whLifetime"),
            InvertersProduction => Source::Inverters,
        },
        Generation::ModelS { metered: false } | Generation::ModelC => match metric {
            Production => json(ApiV1Production, "/wattsNow"),
            DailyProduction => json(ApiV1Production, "/wattHoursToday"),
            SevenDaysProduction => json(ApiV1Production, "/wattHoursSevenDays"),
            LifetimeProduction => json(ApiV1Production, "/wattHoursLifetime"),
            _ => Source::NotAvailable,
        },
        Generation::LegacyHtml => match metric {
            Production => Source::Html(HtmlRow::Currently),
            DailyProduction => Source::Html(HtmlRow::Today),
            SevenDaysProduction => Source::Html(HtmlRow::PastWeek),
            LifetimeProduction => Source::Html(HtmlRow::SinceInstallation),
            _ => Source::NotAvailable,
        },
    }
}

/// Endpoints that have to be cached for all production/consumption metrics of `generation`.
pub fn endpoints(generation: Generation) -> Vec<EndpointKind> {
    MetricName::ALL
        .iter()
        .filter_map(|metric| source(*metric, generation).endpoint())
        .fold(Vec::new(), |mut endpoints, endpoint| {
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
            endpoints
        })
}

/// Truncate a JSON number to an integer.
fn json_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|v| v.trunc() as i64))
}

pub fn from_json(body: &str, pointer: &str) -> Result<i64, Error> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| Error::parse(format!("JSON ({})", e), body))?;

    value
        .pointer(pointer)
        .and_then(json_integer)
        .ok_or_else(|| Error::parse(format!("numeric value at '{}'", pointer), body))
}

fn unit_multiplier(unit: &str) -> Option<i64> {
    match unit {
        "W" | "Wh" => Some(1),
        "kW" | "kWh" => Some(1_000),
        "MW" | "MWh" => Some(1_000_000),
        _ => None,
    }
}

/// Scale a decimal string by `multiplier`, truncating what is left of the fraction.
fn scale(number: &str, multiplier: i64) -> Option<i64> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let mut value = whole.parse::<i64>().ok()?.checked_mul(multiplier)?;

    let mut place = multiplier;
    for digit in fraction.chars() {
        place /= 10;
        if place == 0 {
            break;
        }
        value = value.checked_add(i64::from(digit.to_digit(10)?) * place)?;
    }
    Some(value)
}

/// Parse a "<number> <unit>" cell such as `1.39 kW`.
pub fn with_unit(number: &str, unit: &str) -> Option<i64> {
    scale(number, unit_multiplier(unit)?)
}

pub fn from_html(body: &str, row: HtmlRow) -> Result<i64, Error> {
    let captures = row
        .regex()
        .captures(body)
        .ok_or_else(|| Error::parse(format!("{:?} row of production page", row), body))?;

    with_unit(&captures[1], &captures[2]).ok_or_else(|| {
        Error::parse(
            format!("{:?} value of production page", row),
            &captures[0],
        )
    })
}

/// Whether `body` looks like a legacy production page.
pub fn is_production_page(body: &str) -> bool {
    PRODUCTION.is_match(body)
}

/// Read a numeric metric from `body` according to `source`.
pub fn value(source: Source, body: &str) -> Result<i64, Error> {
    match source {
        Source::Json { pointer, .. } => from_json(body, pointer),
        Source::Html(row) => from_html(body, row),
        Source::Inverters | Source::NotAvailable => Err(Error::Internal(format!(
            "{:?} has no cached body to read from",
            source
        ))),
    }
}

/// Map of inverter serial to its latest report. Any malformed record fails the whole list.
pub fn inverters(body: &str) -> Result<BTreeMap<String, InverterReading>, Error> {
    let records: Vec<InverterRecord> = serde_json::from_str(body)
        .map_err(|e| Error::parse(format!("inverter list ({})", e), body))?;

    records
        .into_iter()
        .map(|record| {
            let last_report = Local
                .timestamp_opt(record.last_report_date, 0)
                .single()
                .ok_or_else(|| {
                    Error::parse(
                        format!("lastReportDate of inverter {}", record.serial_number),
                        record.last_report_date.to_string(),
                    )
                })?
                .format(LAST_REPORT_FORMAT)
                .to_string();

            Ok((
                record.serial_number,
                InverterReading {
                    watts: record.last_report_watts,
                    last_report,
                },
            ))
        })
        .collect()
}
