//! HTTP probe execution. A probe never fails as a task: transport errors,
//! unexpected status codes and missing keywords all come back as a
//! `ProbeOutcome` ready to be recorded as a check.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::db::entities::monitor;
use crate::db::enums::{CheckErrorType, MonitorProtocol};
use crate::db::services::check_service::NewCheck;
use crate::monitoring::tls;
use crate::version::VERSION;

/// Engine-level probe defaults, passed in explicitly rather than read from
/// ambient globals.
#[derive(Debug, Clone)]
pub struct CheckConfig {
    /// Total transport attempts per probe, including the first one.
    pub transport_attempts: u32,
    pub retry_backoff: Duration,
    pub tls_timeout: Duration,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            transport_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            tls_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-monitor probe overrides stored in the `probe_config` JSON column.
/// Unknown fields are ignored; a malformed document is logged and dropped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeOverrides {
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    pub basic_auth: Option<BasicAuth>,
    pub expected_status: Option<Vec<u16>>,
    pub keyword: Option<String>,
    pub tls_inspection: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Fully resolved input for one probe: monitor row merged with the engine
/// defaults and the per-monitor overrides.
#[derive(Debug, Clone)]
pub struct ProbeSpec {
    pub url: String,
    pub method: Method,
    pub timeout: Duration,
    pub transport_attempts: u32,
    pub retry_backoff: Duration,
    pub headers: Vec<(String, String)>,
    pub basic_auth: Option<BasicAuth>,
    pub body: Option<String>,
    /// Accepted status codes; `None` means any 2xx.
    pub expected_status: Option<Vec<u16>>,
    /// Case-insensitive substring the body must contain for the probe to
    /// count as up.
    pub keyword: Option<String>,
    pub inspect_tls: bool,
    pub tls_timeout: Duration,
}

impl ProbeSpec {
    pub fn from_monitor(monitor: &monitor::Model, defaults: &CheckConfig) -> Self {
        let overrides = match &monitor.probe_config {
            Some(raw) => match serde_json::from_value::<ProbeOverrides>(raw.clone()) {
                Ok(overrides) => overrides,
                Err(err) => {
                    warn!(
                        monitor_id = monitor.id,
                        error = %err,
                        "ignoring malformed probe config"
                    );
                    ProbeOverrides::default()
                }
            },
            None => ProbeOverrides::default(),
        };

        let method = match &overrides.method {
            Some(name) => match Method::from_bytes(name.to_uppercase().as_bytes()) {
                Ok(method) => method,
                Err(_) => {
                    warn!(monitor_id = monitor.id, method = %name, "unknown probe method, using GET");
                    Method::GET
                }
            },
            None => Method::GET,
        };

        Self {
            url: monitor.url.clone(),
            method,
            timeout: Duration::from_secs(monitor.timeout_seconds.max(1) as u64),
            transport_attempts: defaults.transport_attempts.max(1),
            retry_backoff: defaults.retry_backoff,
            headers: overrides
                .headers
                .map(|headers| headers.into_iter().collect())
                .unwrap_or_default(),
            basic_auth: overrides.basic_auth,
            body: overrides.body,
            expected_status: overrides.expected_status,
            keyword: overrides.keyword,
            inspect_tls: monitor.protocol == MonitorProtocol::Https
                && overrides.tls_inspection.unwrap_or(true),
            tls_timeout: defaults.tls_timeout,
        }
    }
}

/// Everything a probe learned, shaped like a check row minus the timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeOutcome {
    pub is_up: bool,
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i32>,
    pub ssl_valid: Option<bool>,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    pub keyword_found: Option<bool>,
    pub error_message: Option<String>,
    pub error_type: Option<CheckErrorType>,
}

impl ProbeOutcome {
    pub fn into_check(self, checked_at: DateTime<Utc>) -> NewCheck {
        NewCheck {
            is_up: self.is_up,
            status_code: self.status_code,
            response_time_ms: self.response_time_ms,
            ssl_valid: self.ssl_valid,
            ssl_expires_at: self.ssl_expires_at,
            keyword_found: self.keyword_found,
            error_message: self.error_message,
            error_type: self.error_type,
            checked_at,
        }
    }
}

pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(format!("sitepulse/{VERSION}"))
            .build()?;
        Ok(Self { client })
    }

    /// Runs one probe. Response time covers the whole transport phase,
    /// retries and backoff included. TLS inspection runs only after a
    /// successful probe of an https monitor and can never fail the probe.
    pub async fn probe(&self, spec: &ProbeSpec) -> ProbeOutcome {
        let started = Instant::now();
        let response = self.send_with_retries(spec).await;
        let elapsed_ms = started.elapsed().as_millis() as i32;

        let mut outcome = match response {
            Ok(response) => self.evaluate_response(spec, response, elapsed_ms).await,
            Err(err) => {
                let message = error_chain_text(&err);
                ProbeOutcome {
                    is_up: false,
                    error_type: Some(classify_error(&message)),
                    error_message: Some(message),
                    ..ProbeOutcome::default()
                }
            }
        };

        if outcome.is_up && spec.inspect_tls {
            let info = tls::inspect_certificate(&spec.url, spec.tls_timeout).await;
            outcome.ssl_valid = Some(info.valid);
            outcome.ssl_expires_at = info.expires_at;
        }

        outcome
    }

    async fn send_with_retries(
        &self,
        spec: &ProbeSpec,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut attempt = 1;
        loop {
            match self.build_request(spec).send().await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < spec.transport_attempts => {
                    debug!(url = %spec.url, attempt, error = %err, "probe transport error, retrying");
                    tokio::time::sleep(spec.retry_backoff).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn build_request(&self, spec: &ProbeSpec) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(spec.method.clone(), &spec.url)
            .timeout(spec.timeout);
        for (name, value) in &spec.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(auth) = &spec.basic_auth {
            request = request.basic_auth(&auth.username, auth.password.as_deref());
        }
        if let Some(body) = &spec.body {
            request = request.body(body.clone());
        }
        request
    }

    async fn evaluate_response(
        &self,
        spec: &ProbeSpec,
        response: reqwest::Response,
        elapsed_ms: i32,
    ) -> ProbeOutcome {
        let status = response.status();
        let accepted = match &spec.expected_status {
            Some(codes) => codes.contains(&status.as_u16()),
            None => status.is_success(),
        };

        let mut outcome = ProbeOutcome {
            is_up: accepted,
            status_code: Some(status.as_u16() as i32),
            response_time_ms: Some(elapsed_ms),
            ..ProbeOutcome::default()
        };

        // An unexpected status is a plain fact; the code itself says what
        // went wrong, so no error fields are set.
        if !accepted {
            return outcome;
        }

        if let Some(keyword) = &spec.keyword {
            match response.text().await {
                Ok(body) => {
                    let found = body.to_lowercase().contains(&keyword.to_lowercase());
                    outcome.keyword_found = Some(found);
                    if !found {
                        outcome.is_up = false;
                        outcome.error_message =
                            Some(format!("keyword \"{keyword}\" not found in response body"));
                        outcome.error_type = Some(CheckErrorType::Unknown);
                    }
                }
                Err(err) => {
                    let message = error_chain_text(&err);
                    outcome.is_up = false;
                    outcome.error_type = Some(classify_error(&message));
                    outcome.error_message = Some(message);
                }
            }
        }

        outcome
    }
}

/// Buckets an error-text chain into the stored taxonomy. Matching is
/// ordered: timeout wording wins over dns, dns over tls, tls over generic
/// connection failures.
pub fn classify_error(message: &str) -> CheckErrorType {
    let text = message.to_lowercase();
    if text.contains("timed out") || text.contains("timeout") {
        CheckErrorType::Timeout
    } else if text.contains("dns") || text.contains("lookup") {
        CheckErrorType::Dns
    } else if text.contains("certificate") || text.contains("ssl") || text.contains("tls") {
        CheckErrorType::Ssl
    } else if text.contains("connect") {
        CheckErrorType::Connection
    } else {
        CheckErrorType::Unknown
    }
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
