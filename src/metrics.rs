use envoy_reader::model::{Metric, MetricName};
use envoy_reader::{EnvoyReader, Error};
use prometheus::{Encoder, IntGaugeVec, TextEncoder};

lazy_static! {
    static ref POWER_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!("envoy_power_watts", "current power (in W)"),
        &["direction"],
    )
    .unwrap();
    static ref ENERGY_TODAY_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!("envoy_energy_today_wh", "energy in current day (in Wh)"),
        &["direction"],
    )
    .unwrap();
    static ref ENERGY_SEVEN_DAYS_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "envoy_energy_seven_days_wh",
            "energy over the last seven days (in Wh)"
        ),
        &["direction"],
    )
    .unwrap();
    static ref ENERGY_LIFETIME_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!("envoy_energy_lifetime_wh", "energy since installation (in Wh)"),
        &["direction"],
    )
    .unwrap();
    static ref INVERTER_POWER_GAUGE: IntGaugeVec = register_int_gauge_vec!(
        opts!(
            "envoy_inverter_power_watts",
            "last power reported by inverter (in W)"
        ),
        &["serial"],
    )
    .unwrap();
}

/// Gauge and `direction` label for a scalar metric.
fn gauge(name: MetricName) -> Option<(&'static IntGaugeVec, &'static str)> {
    match name {
        MetricName::Production => Some((&*POWER_GAUGE, "production")),
        MetricName::Consumption => Some((&*POWER_GAUGE, "consumption")),
        MetricName::DailyProduction => Some((&*ENERGY_TODAY_GAUGE, "production")),
        MetricName::DailyConsumption => Some((&*ENERGY_TODAY_GAUGE, "consumption")),
        MetricName::SevenDaysProduction => Some((&*ENERGY_SEVEN_DAYS_GAUGE, "production")),
        MetricName::SevenDaysConsumption => Some((&*ENERGY_SEVEN_DAYS_GAUGE, "consumption")),
        MetricName::LifetimeProduction => Some((&*ENERGY_LIFETIME_GAUGE, "production")),
        MetricName::LifetimeConsumption => Some((&*ENERGY_LIFETIME_GAUGE, "consumption")),
        MetricName::InvertersProduction => None,
    }
}

/// Drop whatever `name` last reported, so a failing metric is not served as current.
fn clear_metric(name: MetricName) {
    match gauge(name) {
        Some((gauge, direction)) => {
            // absent until the metric was first read
            let _ = gauge.remove_label_values(&[direction]);
        }
        None => INVERTER_POWER_GAUGE.reset(),
    }
}

/// Feed one metric into the Prometheus registry.
fn process_metric(name: MetricName, result: &Result<Metric, Error>) {
    match (result, gauge(name)) {
        (Ok(Metric::Value(value)), Some((gauge, direction))) => {
            gauge.with_label_values(&[direction]).set(*value);
        }
        (Ok(Metric::Inverters(inverters)), _) => {
            INVERTER_POWER_GAUGE.reset();
            for (serial, reading) in inverters {
                INVERTER_POWER_GAUGE
                    .with_label_values(&[serial.as_str()])
                    .set(reading.watts);
            }
        }
        (Ok(Metric::NotAvailable(message)), _) => {
            log::trace!("{}: {}", name, message);
            clear_metric(name);
        }
        (Ok(Metric::Value(_)), None) => log::warn!("No gauge for {}", name),
        (Err(_), _) => clear_metric(name),
    }
}

/// Collect all metrics from `reader`, updating Prometheus exporter registry.
pub async fn collect(reader: &EnvoyReader) -> Result<(), Error> {
    let update = reader.update().await?;

    for (name, result) in update {
        if let Err(e) = &result {
            log::error!("Unable to read {} from {}: {}", name, reader.host(), e);
        }
        process_metric(name, &result);
    }

    Ok(())
}

/// Read metrics from Prometheus exporter registry.
pub async fn read() -> Result<String, Error> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| Error::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
}
