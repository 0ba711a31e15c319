//! HTTP unary transport
//!
//! Posts JSON messages to the GCM HTTP endpoint and retries on the caller's
//! [`Backoff`]. Transport failures and 5xx answers are retried, a
//! `Retry-After` header raises the backoff floor, and 4xx answers fail
//! straight away. For multicast messages only the registration ids that came
//! back `Unavailable` or `InternalServerError` are sent again, and their
//! results are merged back into the first response in request order.

use crate::backoff::Backoff;
use crate::config::{ClientConfig, Credentials};
use crate::error::{GcmResult, HttpError};
use crate::message::{HttpMessage, HttpResponse, HttpResult};
use crate::metrics::UNARY_ATTEMPTS;
use crate::transport::UnaryTransport;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use std::time::Duration;
use tracing::*;

/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// [`UnaryTransport`] over HTTPS
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    debug: bool,
}

impl HttpTransport {
    /// Transport for the configured environment's endpoint
    pub fn new(config: &ClientConfig, credentials: &Credentials) -> GcmResult<Self> {
        Self::with_endpoint(
            config.environment.http_endpoint(),
            credentials.api_key.clone(),
            config.debug,
        )
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        debug: bool,
    ) -> GcmResult<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HttpError::Request {
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            debug,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One POST, no retries
    async fn send_once(&self, message: &HttpMessage) -> Result<HttpResponse, HttpError> {
        if self.debug {
            debug!(
                endpoint = %self.endpoint,
                body = %serde_json::to_string(message).unwrap_or_default(),
                "sending http message"
            );
        }

        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("key={}", self.api_key))
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                retry_after: parse_retry_after(response.headers()),
            });
        }

        let body = response.text().await?;
        if self.debug {
            debug!(status = status.as_u16(), %body, "received http response");
        }
        serde_json::from_str(&body).map_err(|e| HttpError::Decode {
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl UnaryTransport for HttpTransport {
    async fn send(&self, message: &HttpMessage, backoff: &mut Backoff) -> GcmResult<HttpResponse> {
        let targets = message.targets();
        if targets.is_empty() {
            return Err(HttpError::NoRecipients.into());
        }

        let mut merge = MulticastMerge::new(targets);
        let mut last_error = None;

        loop {
            let request = message.retarget(&merge.pending_targets());
            match self.send_once(&request).await {
                Ok(response) => {
                    UNARY_ATTEMPTS.with_label_values(&["success"]).inc();
                    last_error = None;
                    merge.absorb(response);
                    if merge.is_done() {
                        break;
                    }
                    debug!(
                        remaining = merge.pending.len(),
                        "registration ids unavailable, sending them again"
                    );
                }
                Err(err) if err.is_retryable() => {
                    UNARY_ATTEMPTS.with_label_values(&["retryable"]).inc();
                    if let Some(delay) = err.retry_after() {
                        backoff.set_minimum(delay);
                    }
                    warn!(error = %err, delay = ?backoff.current_delay(), "http send failed");
                    last_error = Some(err);
                }
                Err(err) => {
                    UNARY_ATTEMPTS.with_label_values(&["fatal"]).inc();
                    return Err(err.into());
                }
            }

            if !backoff.should_retry() {
                debug!("giving up on http send");
                break;
            }
            backoff.wait().await;
        }

        match merge.into_response() {
            Some(response) => Ok(response),
            None => Err(last_error
                .unwrap_or_else(|| HttpError::Request {
                    reason: "no response received".to_string(),
                })
                .into()),
        }
    }
}

/// Results collected across multicast attempts
struct MulticastMerge {
    targets: Vec<String>,
    /// Indexes into `targets` still waiting for a final result
    pending: Vec<usize>,
    response: Option<HttpResponse>,
}

impl MulticastMerge {
    fn new(targets: Vec<String>) -> Self {
        let pending = (0..targets.len()).collect();
        Self {
            targets,
            pending,
            response: None,
        }
    }

    fn pending_targets(&self) -> Vec<String> {
        self.pending
            .iter()
            .map(|&index| self.targets[index].clone())
            .collect()
    }

    fn is_done(&self) -> bool {
        self.pending.is_empty()
    }

    fn absorb(&mut self, response: HttpResponse) {
        if response.results.len() != self.pending.len() {
            // not a per-registration answer, nothing to match up
            if self.response.is_none() {
                self.response = Some(response);
            }
            self.pending.clear();
            return;
        }

        let total = self.targets.len();
        let merged = self.response.get_or_insert_with(|| HttpResponse {
            multicast_id: response.multicast_id,
            results: vec![HttpResult::default(); total],
            ..Default::default()
        });

        let mut still_pending = Vec::new();
        for (index, result) in self.pending.iter().copied().zip(response.results) {
            if result.is_retryable() {
                still_pending.push(index);
            }
            merged.results[index] = result;
        }
        recount(merged);
        self.pending = still_pending;
    }

    fn into_response(self) -> Option<HttpResponse> {
        self.response
    }
}

fn recount(response: &mut HttpResponse) {
    let failure = response.results.iter().filter(|r| r.error.is_some()).count();
    response.failure = failure as u32;
    response.success = (response.results.len() - failure) as u32;
    response.canonical_ids = response
        .results
        .iter()
        .filter(|r| r.registration_id.is_some())
        .count() as u32;
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
