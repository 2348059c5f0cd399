pub mod cache;
pub mod endpoint;
pub mod error;
pub mod response;

use crate::model;
use endpoint::EndpointKind;
pub use error::Error;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Attempts per request on transport-level failure.
const MAX_ATTEMPTS: usize = 3;
/// Simultaneous requests against one device; the embedded HTTP server is slow.
const MAX_CONCURRENT_REQUESTS: usize = 2;

pub fn envoy(
    host: String,
    username: Option<String>,
    password: Option<String>,
    inverters: bool,
) -> model::Envoy {
    model::Envoy {
        host: normalize_host(&host),
        username: username.unwrap_or_else(|| model::DEFAULT_USERNAME.to_string()),
        password,
        inverters,
        update_interval: model::DEFAULT_UPDATE_INTERVAL,
        timeout: model::DEFAULT_TIMEOUT,
    }
}

/// Lowercase the scheme and authority of `host`, leaving any path as given.
fn normalize_host(host: &str) -> String {
    let (scheme, rest) = match host.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, host),
    };
    let (authority, path) = rest.split_at(rest.find('/').unwrap_or(rest.len()));

    match scheme {
        Some(scheme) => format!("{}://{}{}", scheme.to_lowercase(), authority.to_lowercase(), path),
        None => format!("{}{}", authority.to_lowercase(), path),
    }
}

/// Failures worth another attempt: the device did not answer in time or refused the connection.
fn is_transient(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

/// Host part of `host`, without any scheme prefix.
pub fn display_host(host: &str) -> &str {
    host.split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(host)
        .trim_end_matches('/')
}

fn base_url(host: &str) -> String {
    let base = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    };
    base.trim_end_matches('/').to_string()
}

/// Response as received; the HTTP status is left for the caller to interpret.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: http::StatusCode,
    pub challenge: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// HTTP access to one Envoy.
#[derive(Debug)]
pub struct Fetcher {
    host: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
    permits: Semaphore,
}

impl Fetcher {
    pub fn new(envoy: &model::Envoy) -> Result<Fetcher, Error> {
        let client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Unable to build HTTP client: {}", e)))?;

        Ok(Fetcher {
            host: display_host(&envoy.host).to_string(),
            base_url: base_url(&envoy.host),
            timeout: envoy.timeout,
            client,
            permits: Semaphore::new(MAX_CONCURRENT_REQUESTS),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn url(&self, endpoint: EndpointKind) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }

    fn connectivity_error(&self, error: reqwest::Error, attempts: usize) -> Error {
        Error::Connectivity {
            host: self.host.to_owned(),
            message: format!("{} after {} attempt(s)", error, attempts),
        }
    }

    /// GET `endpoint`, retrying on transport failures only.
    pub async fn fetch(&self, endpoint: EndpointKind) -> Result<RawResponse, Error> {
        self.fetch_with(endpoint, None, self.timeout).await
    }

    pub async fn fetch_with(
        &self,
        endpoint: EndpointKind,
        authorization: Option<&str>,
        timeout: Duration,
    ) -> Result<RawResponse, Error> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        let url = self.url(endpoint);
        let mut attempt = 1;

        loop {
            let mut request = self.client.get(&url).timeout(timeout);
            if let Some(value) = authorization {
                request = request.header(AUTHORIZATION, value);
            }

            log::debug!("GET {} (attempt {}/{})", url, attempt, MAX_ATTEMPTS);

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let challenge = response
                        .headers()
                        .get(WWW_AUTHENTICATE)
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);

                    match response.text().await {
                        Ok(body) => {
                            log::trace!("endpoint: {}, status: {}, body: {}", endpoint, status, body);
                            return Ok(RawResponse {
                                status,
                                challenge,
                                body,
                            });
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if attempt == MAX_ATTEMPTS || !is_transient(&error) {
                return Err(self.connectivity_error(error, attempt));
            }
            log::debug!("GET {} failed: {}", url, error);
            attempt += 1;
        }
    }

    /// GET `endpoint` answering one digest challenge with `username` and `password`.
    pub async fn fetch_digest(
        &self,
        endpoint: EndpointKind,
        username: &str,
        password: &str,
    ) -> Result<RawResponse, Error> {
        let response = self.fetch(endpoint).await?;
        if response.status != http::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let authentication_error = |message: String| Error::Authentication {
            endpoint: endpoint.path().to_string(),
            message,
        };

        let challenge = response
            .challenge
            .as_deref()
            .ok_or_else(|| authentication_error("no digest challenge received".to_string()))?;

        let mut prompt = digest_auth::parse(challenge)
            .map_err(|e| authentication_error(format!("invalid digest challenge: {}", e)))?;
        let context = digest_auth::AuthContext::new(username, password, endpoint.path());
        let answer = prompt
            .respond(&context)
            .map_err(|e| authentication_error(format!("unable to answer challenge: {}", e)))?;

        let response = self
            .fetch_with(endpoint, Some(&answer.to_header_string()), self.timeout)
            .await?;

        if response.status == http::StatusCode::UNAUTHORIZED {
            Err(authentication_error(format!(
                "credentials for user '{}' rejected",
                username
            )))
        } else {
            Ok(response)
        }
    }
}
