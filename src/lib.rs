pub mod api;
pub mod detect;
pub mod extract;
pub mod model;

use api::cache::ResponseCache;
use api::endpoint::EndpointKind;
use api::Fetcher;
pub use api::{envoy, Error};
use extract::Source;
use model::{Capability, DeviceProfile, Generation, Metric, MetricName};
pub use model::{CONSUMPTION_NOT_AVAILABLE, INVERTERS_NOT_AVAILABLE};

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Result of a batch [`EnvoyReader::update`], one entry per metric.
pub type Update = BTreeMap<MetricName, Result<Metric, Error>>;

struct State {
    profile: DeviceProfile,
    cache: ResponseCache,
}

/// Reads production and consumption values from an Enphase Envoy on the local network.
///
/// The firmware generation is detected on first use. Raw responses are cached for the
/// update interval, so repeated reads within it do not hit the device again.
pub struct EnvoyReader {
    envoy: model::Envoy,
    fetcher: Fetcher,
    state: Mutex<State>,
}

impl EnvoyReader {
    pub fn new(envoy: model::Envoy) -> Result<EnvoyReader, Error> {
        let fetcher = Fetcher::new(&envoy)?;
        let state = State {
            profile: DeviceProfile::new(&envoy),
            cache: ResponseCache::new(envoy.update_interval),
        };

        Ok(EnvoyReader {
            envoy,
            fetcher,
            state: Mutex::new(state),
        })
    }

    pub fn host(&self) -> &str {
        self.fetcher.host()
    }

    pub async fn update_interval(&self) -> Duration {
        self.state.lock().await.cache.ttl()
    }

    pub async fn set_update_interval(&self, interval: Duration) {
        self.state.lock().await.cache.set_ttl(interval);
    }

    /// Snapshot of the current device profile.
    pub async fn profile(&self) -> DeviceProfile {
        self.state.lock().await.profile.clone()
    }

    /// Forget detection results and cached responses.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.profile.reset();
        state.cache.clear();
    }

    /// Skip detection and treat the device as `generation`.
    pub async fn set_generation(&self, generation: Generation) {
        let mut state = self.state.lock().await;
        state.cache.clear();
        state.profile.classify(generation, self.envoy.inverters);
    }

    /// Run detection now, replacing any earlier result.
    pub async fn detect(&self) -> Result<DeviceProfile, Error> {
        let mut state = self.state.lock().await;
        state.profile.reset();
        state.cache.clear();

        self.ensure_ready(&mut state).await?;
        Ok(state.profile.clone())
    }

    async fn ensure_ready(&self, state: &mut State) -> Result<Generation, Error> {
        if let Some(generation) = state.profile.generation {
            return Ok(generation);
        }

        let detection = detect::detect(&self.fetcher).await?;
        state
            .profile
            .classify(detection.generation, self.envoy.inverters);
        state
            .cache
            .insert(detection.endpoint, detection.body, Instant::now());

        Ok(detection.generation)
    }

    /// Derive the inverters password from the serial number, if none was given.
    /// Probed again on every call until a serial is found.
    async fn ensure_serial(&self, state: &mut State) {
        if state.profile.serial_suffix.is_some() || state.profile.password.is_some() {
            return;
        }
        state.profile.serial_suffix = detect::serial_suffix(&self.fetcher).await;
    }

    /// Body of `endpoint`, from cache while fresh.
    async fn body(&self, cache: &mut ResponseCache, endpoint: EndpointKind) -> Result<String, Error> {
        if let Some(body) = cache.get(endpoint, Instant::now()) {
            log::debug!("Using cached {}", endpoint);
            return Ok(body.to_string());
        }

        let response = self.fetcher.fetch(endpoint).await?;
        if !response.is_success() {
            return Err(Error::UnexpectedStatus {
                endpoint: self.fetcher.url(endpoint),
                status: response.status.as_u16(),
            });
        }

        cache.insert(endpoint, response.body.clone(), Instant::now());
        Ok(response.body)
    }

    async fn refresh(
        &self,
        cache: &mut ResponseCache,
        generation: Generation,
    ) -> HashMap<EndpointKind, Result<String, Error>> {
        let mut bodies = HashMap::new();
        for endpoint in extract::endpoints(generation) {
            let body = self.body(cache, endpoint).await;
            bodies.insert(endpoint, body);
        }
        bodies
    }

    /// Per-inverter production. Never cached.
    async fn fetch_inverters(&self, profile: &DeviceProfile) -> Result<Metric, Error> {
        let password = profile.inverters_password().unwrap_or_else(|| {
            log::warn!("No password or serial number known for the inverters endpoint");
            ""
        });

        let endpoint = EndpointKind::ApiV1Inverters;
        let response = self
            .fetcher
            .fetch_digest(endpoint, &profile.username, password)
            .await?;

        if !response.is_success() {
            return Err(Error::UnexpectedStatus {
                endpoint: self.fetcher.url(endpoint),
                status: response.status.as_u16(),
            });
        }

        match extract::inverters(&response.body) {
            Ok(readings) => Ok(Metric::Inverters(readings)),
            Err(e) => {
                log::warn!("Inverter production unavailable: {}", e);
                Ok(MetricName::InvertersProduction.not_available())
            }
        }
    }

    /// Read a single metric, detecting and fetching as needed.
    pub async fn metric(&self, name: MetricName) -> Result<Metric, Error> {
        let mut state = self.state.lock().await;
        let generation = self.ensure_ready(&mut state).await?;

        if !state.profile.has(name.requires()) {
            return Ok(name.not_available());
        }

        let source = extract::source(name, generation);
        match source.endpoint() {
            Some(endpoint) => {
                let body = self.body(&mut state.cache, endpoint).await?;
                extract::value(source, &body).map(Metric::Value)
            }
            None if source == Source::Inverters => {
                self.ensure_serial(&mut state).await;
                self.fetch_inverters(&state.profile).await
            }
            None => Ok(name.not_available()),
        }
    }

    /// Fetch once and read every metric. A failing metric only affects its own entry.
    pub async fn update(&self) -> Result<Update, Error> {
        let mut state = self.state.lock().await;
        let generation = self.ensure_ready(&mut state).await?;

        let wants_inverters = state.profile.has(Capability::Inverters);
        if wants_inverters {
            self.ensure_serial(&mut state).await;
        }

        let purged = state.cache.purge_expired(Instant::now());
        if purged > 0 {
            log::debug!("Dropped {} stale response(s)", purged);
        }

        let State { profile, cache, .. } = &mut *state;
        let profile = &*profile;
        let (bodies, inverters) = tokio::join!(self.refresh(cache, generation), async {
            if wants_inverters {
                Some(self.fetch_inverters(profile).await)
            } else {
                None
            }
        });

        let update: Update = MetricName::ALL
            .iter()
            .map(|&name| {
                let source = extract::source(name, generation);
                let result = if !profile.has(name.requires()) {
                    Ok(name.not_available())
                } else {
                    match (source.endpoint(), &inverters) {
                        (Some(endpoint), _) => match bodies.get(&endpoint) {
                            Some(Ok(body)) => extract::value(source, body).map(Metric::Value),
                            Some(Err(e)) => Err(e.clone()),
                            None => Err(Error::Internal(format!("{} was not fetched", endpoint))),
                        },
                        (None, Some(inverters)) if source == Source::Inverters => {
                            inverters.clone()
                        }
                        (None, _) => Ok(name.not_available()),
                    }
                };

                if let Err(e) = &result {
                    log::warn!("{} unavailable: {}", name, e);
                }
                (name, result)
            })
            .collect();

        Ok(update)
    }

    pub async fn production(&self) -> Result<Metric, Error> {
        self.metric(MetricName::Production).await
    }

    pub async fn consumption(&self) -> Result<Metric, Error> {
        self.metric(MetricName::Consumption).await
    }

    pub async fn daily_production(&self) -> Result<Metric, Error> {
        self.metric(MetricName::DailyProduction).await
    }

    pub async fn daily_consumption(&self) -> Result<Metric, Error> {
        self.metric(MetricName::DailyConsumption).await
    }

    pub async fn seven_days_production(&self) -> Result<Metric, Error> {
        self.metric(MetricName::SevenDaysProduction).await
    }

    pub async fn seven_days_consumption(&self) -> Result<Metric, Error> {
        self.metric(MetricName::SevenDaysConsumption).await
    }

    pub async fn lifetime_production(&self) -> Result<Metric, Error> {
        self.metric(MetricName::LifetimeProduction).await
    }

    pub async fn lifetime_consumption(&self) -> Result<Metric, Error> {
        self.metric(MetricName::LifetimeConsumption).await
    }

    pub async fn inverters_production(&self) -> Result<Metric, Error> {
        self.metric(MetricName::InvertersProduction).await
    }
}
