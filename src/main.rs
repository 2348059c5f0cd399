#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate prometheus;
#[macro_use]
extern crate rocket;

use config::Config;
use envoy_reader::{api, EnvoyReader};
use rocket::{Build, Rocket, State};
use std::time::Duration;

mod metrics;

const HOST: &str = "envoy";
const INTERVAL: i64 = 15;

#[derive(Clone, serde::Deserialize)]
pub struct EnvoyConfig {
    host: String,
    username: Option<String>,
    password: Option<String>,
    inverters: bool,
    interval: u64,
}

pub fn read_settings() -> Result<EnvoyConfig, config::ConfigError> {
    let mut settings = Config::default();
    settings
        .set_default("host", HOST)?
        .set_default("inverters", false)?
        .set_default("interval", INTERVAL)?
        .merge(config::Environment::with_prefix("ENVOY"))?;

    settings.try_into()
}

#[get("/metrics")]
async fn metrics_route(reader: &State<EnvoyReader>) -> Result<String, api::Error> {
    metrics::collect(reader).await?;
    metrics::read().await
}

#[get("/dump")]
async fn dump_route(reader: &State<EnvoyReader>) -> Result<String, api::Error> {
    let update = reader.update().await?;
    let profile = reader.profile().await;

    Ok(format!("{:#?}\n{:#?}", profile, update))
}

#[launch]
fn rocket() -> Rocket<Build> {
    env_logger::init();

    let settings = read_settings().expect("Configuration error");
    let mut envoy = api::envoy(
        settings.host,
        settings.username,
        settings.password,
        settings.inverters,
    );
    envoy.update_interval = Duration::from_secs(settings.interval);

    let reader = EnvoyReader::new(envoy).expect("Unable to create Envoy reader");
    log::info!("Reading Envoy at {}", reader.host());

    rocket::build()
        .manage(reader)
        .mount("/", routes![metrics_route, dump_route])
}
