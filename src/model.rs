use enumset::{EnumSet, EnumSetType};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

pub type Watts = i64;
pub type WattHours = i64;

pub const DEFAULT_USERNAME: &str = "envoy";
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const CONSUMPTION_NOT_AVAILABLE: &str = "Consumption data not available for your Envoy device.";
pub const INVERTERS_NOT_AVAILABLE: &str =
    "Inverters production not available for your Envoy device.";

/// Connection settings for a single Envoy.
#[derive(Debug, Clone)]
pub struct Envoy {
    pub host: String,
    pub username: String,
    pub password: Option<String>,
    pub inverters: bool,
    pub update_interval: Duration,
    pub timeout: Duration,
}

/// Firmware generation of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// Combined `/production.json`. `metered` is false when no CT is active, in which case
    /// production is read from `/api/v1/production` and consumption is not available.
    ModelS { metered: bool },
    /// `/api/v1/production` only.
    ModelC,
    /// Scraped `/production` HTML page.
    LegacyHtml,
}

impl Generation {
    /// Capabilities this generation can provide at most.
    pub fn supported(self) -> EnumSet<Capability> {
        match self {
            Generation::ModelS { metered: true } => {
                Capability::Production | Capability::Consumption | Capability::Inverters
            }
            Generation::ModelS { metered: false } | Generation::ModelC => {
                Capability::Production | Capability::Inverters
            }
            Generation::LegacyHtml => EnumSet::only(Capability::Production),
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generation::ModelS { metered: true } => write!(f, "Envoy S (metered)"),
            Generation::ModelS { metered: false } => write!(f, "Envoy S (unmetered)"),
            Generation::ModelC => write!(f, "Envoy C"),
            Generation::LegacyHtml => write!(f, "legacy Envoy"),
        }
    }
}

#[derive(Debug, EnumSetType)]
pub enum Capability {
    Production,
    Consumption,
    Inverters,
}

/// Detected state of one Envoy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    pub host: String,
    pub username: String,
    pub password: Option<String>,
    /// Last six digits of the device serial, fallback password for the inverters endpoint.
    pub serial_suffix: Option<String>,
    pub generation: Option<Generation>,
    pub capabilities: EnumSet<Capability>,
}

impl DeviceProfile {
    pub fn new(envoy: &Envoy) -> Self {
        DeviceProfile {
            host: envoy.host.to_owned(),
            username: envoy.username.to_owned(),
            password: envoy.password.to_owned(),
            serial_suffix: None,
            generation: None,
            capabilities: EnumSet::empty(),
        }
    }

    /// Record the detected `generation`. Capabilities are clamped to what it supports.
    pub fn classify(&mut self, generation: Generation, inverters: bool) {
        let mut wanted = Capability::Production | Capability::Consumption;
        if inverters {
            wanted.insert(Capability::Inverters);
        }

        self.generation = Some(generation);
        self.capabilities = wanted & generation.supported();
    }

    pub fn reset(&mut self) {
        self.serial_suffix = None;
        self.generation = None;
        self.capabilities = EnumSet::empty();
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Password for the inverters endpoint: explicit value, else derived serial suffix.
    pub fn inverters_password(&self) -> Option<&str> {
        self.password
            .as_deref()
            .or_else(|| self.serial_suffix.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricName {
    Production,
    Consumption,
    DailyProduction,
    DailyConsumption,
    SevenDaysProduction,
    SevenDaysConsumption,
    LifetimeProduction,
    LifetimeConsumption,
    InvertersProduction,
}

impl MetricName {
    pub const ALL: [MetricName; 9] = [
        MetricName::Production,
        MetricName::Consumption,
        MetricName::DailyProduction,
        MetricName::DailyConsumption,
        MetricName::SevenDaysProduction,
        MetricName::SevenDaysConsumption,
        MetricName::LifetimeProduction,
        MetricName::LifetimeConsumption,
        MetricName::InvertersProduction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricName::Production => "production",
            MetricName::Consumption => "consumption",
            MetricName::DailyProduction => "daily_production",
            MetricName::DailyConsumption => "daily_consumption",
            MetricName::SevenDaysProduction => "seven_days_production",
            MetricName::SevenDaysConsumption => "seven_days_consumption",
            MetricName::LifetimeProduction => "lifetime_production",
            MetricName::LifetimeConsumption => "lifetime_consumption",
            MetricName::InvertersProduction => "inverters_production",
        }
    }

    /// Capability the device must have for this metric to be read.
    pub fn requires(self) -> Capability {
        match self {
            MetricName::Consumption
            | MetricName::DailyConsumption
            | MetricName::SevenDaysConsumption
            | MetricName::LifetimeConsumption => Capability::Consumption,
            MetricName::InvertersProduction => Capability::Inverters,
            _ => Capability::Production,
        }
    }

    pub fn not_available(self) -> Metric {
        match self.requires() {
            Capability::Inverters => Metric::NotAvailable(INVERTERS_NOT_AVAILABLE.to_string()),
            _ => Metric::NotAvailable(CONSUMPTION_NOT_AVAILABLE.to_string()),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InverterReading {
    pub watts: Watts,
    /// `lastReportDate` rendered in local time.
    pub last_report: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metric {
    /// Watts for instantaneous metrics, watt-hours for cumulative ones.
    Value(i64),
    Inverters(BTreeMap<String, InverterReading>),
    NotAvailable(String),
}

impl Metric {
    pub fn value(&self) -> Option<i64> {
        match self {
            Metric::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Metric::NotAvailable(_))
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Value(v) => write!(f, "{}", v),
            Metric::Inverters(inverters) => {
                let entries: Vec<String> = inverters
                    .iter()
                    .map(|(serial, r)| format!("{}: [{}, {}]", serial, r.watts, r.last_report))
                    .collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Metric::NotAvailable(message) => f.write_str(message),
        }
    }
}
