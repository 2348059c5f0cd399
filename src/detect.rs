//! Firmware generation detection.

use crate::api::endpoint::EndpointKind;
use crate::api::response::{self, ApiV1Production, ProductionJson};
use crate::api::{Error, Fetcher, RawResponse};
use crate::extract;
use crate::model::Generation;
use std::time::Duration;

const INFO_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a successful probe. `body` is the response of `endpoint` and can be cached.
#[derive(Debug, Clone)]
pub struct Detection {
    pub generation: Generation,
    pub endpoint: EndpointKind,
    pub body: String,
}

/// Probe result: successful response body, or `None` if the candidate should be skipped.
async fn probe(fetcher: &Fetcher, endpoint: EndpointKind) -> Option<String> {
    match fetcher.fetch(endpoint).await {
        Ok(RawResponse { status, body, .. }) if status.is_success() => Some(body),
        Ok(RawResponse { status, .. }) => {
            log::debug!("Probe {} answered {}", endpoint, status);
            None
        }
        Err(e) => {
            log::debug!("Probe {} failed: {}", endpoint, e);
            None
        }
    }
}

/// Classify a `/production.json` body.
pub fn classify_production_json(body: &str) -> Option<Generation> {
    let production: ProductionJson = serde_json::from_str(body).ok()?;
    let active = production.active_ct_count();

    log::debug!(
        "production meter {:?} has {} active CT(s)",
        production.production.get(1).and_then(|m| m.kind.as_deref()),
        active
    );

    Some(Generation::ModelS {
        metered: active > 0,
    })
}

/// Classify an `/api/v1/production` body.
pub fn classify_api_v1_production(body: &str) -> Option<Generation> {
    let production: ApiV1Production = serde_json::from_str(body).ok()?;
    log::debug!("api/v1/production reports {} W", production.watts_now);
    Some(Generation::ModelC)
}

/// Classify a `/production` HTML body.
pub fn classify_production_page(body: &str) -> Option<Generation> {
    extract::is_production_page(body).then(|| Generation::LegacyHtml)
}

/// Probe the candidate endpoints in priority order; the first recognised answer wins.
pub async fn detect(fetcher: &Fetcher) -> Result<Detection, Error> {
    let candidates: [(EndpointKind, fn(&str) -> Option<Generation>); 3] = [
        (EndpointKind::ProductionJson, classify_production_json),
        (EndpointKind::ApiV1Production, classify_api_v1_production),
        (EndpointKind::ProductionHtml, classify_production_page),
    ];

    for (endpoint, classify) in candidates {
        let body = match probe(fetcher, endpoint).await {
            Some(body) => body,
            None => continue,
        };

        match classify(&body) {
            Some(generation) => {
                log::info!("Detected {} at {} via {}", generation, fetcher.host(), endpoint);
                return Ok(Detection {
                    generation,
                    endpoint,
                    body,
                });
            }
            None => log::debug!("{} answered but was not recognised", endpoint),
        }
    }

    Err(Error::Detection {
        host: fetcher.host().to_string(),
    })
}

/// Last six digits of the device serial from `/info.xml`. Failures are logged, not returned.
pub async fn serial_suffix(fetcher: &Fetcher) -> Option<String> {
    let response = match fetcher
        .fetch_with(EndpointKind::InfoXml, None, INFO_TIMEOUT)
        .await
    {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
            log::warn!("{} answered {}", EndpointKind::InfoXml, response.status);
            return None;
        }
        Err(e) => {
            log::warn!("Unable to read device serial number: {}", e);
            return None;
        }
    };

    let serial = response::serial_suffix(&response.body);
    if serial.is_none() {
        log::warn!(
            "Unable to find device serial number, this is needed to read inverter production"
        );
    }
    serial
}
