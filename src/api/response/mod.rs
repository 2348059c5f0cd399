use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/* `/production.json`, only the parts detection needs */
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub active_count: u64,
}

#[derive(Deserialize)]
pub struct ProductionJson {
    pub production: Vec<MeterReading>,
    pub consumption: Vec<Value>,
}

impl ProductionJson {
    /// Number of active current transformers on the production meter (`production[1]`).
    /// A missing meter entry counts as none.
    pub fn active_ct_count(&self) -> u64 {
        self.production.get(1).map(|m| m.active_count).unwrap_or(0)
    }
}

/* `/api/v1/production` */
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiV1Production {
    pub watts_now: f64,
    pub watt_hours_today: f64,
    pub watt_hours_seven_days: f64,
    pub watt_hours_lifetime: f64,
}

/* `/api/v1/production/inverters` */
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InverterRecord {
    pub serial_number: String,
    /// Seconds since the epoch
    pub last_report_date: i64,
    pub last_report_watts: i64,
}

lazy_static! {
    static ref SERIAL_ELEMENT: Regex = Regex::new(r"<sn>\s*(\d+)\s*</sn>").unwrap();
    static ref SERIAL_TEXT: Regex = Regex::new(r"Envoy\s+Serial\s+Number:?\s*(\d+)").unwrap();
}

/// Last six digits of the serial found in an `info.xml` (or older info page) body.
pub fn serial_suffix(body: &str) -> Option<String> {
    let serial = SERIAL_ELEMENT
        .captures(body)
        .or_else(|| SERIAL_TEXT.captures(body))?
        .get(1)?
        .as_str();

    let start = serial.len().saturating_sub(6);
    Some(serial[start..].to_string())
}
