//! HTTP client for the extraction provider.
//!
//! The provider exposes an async-analyze API: a submission is accepted
//! with `202` and an `Operation-Location` header; the operation is then
//! polled until it reports a terminal status. Responses may carry
//! `Retry-After` pacing hints which are surfaced to the dispatcher.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Response, StatusCode, header};
use serde::Deserialize;

use docket_core::extract::{Extractor, OperationId, PollOutcome};
use docket_core::{Error, ErrorKind, Result};

use crate::TRACING_TARGET;

/// Header carrying the provider API key.
const API_KEY_HEADER: &str = "x-api-key";

/// Configuration for the extraction provider client.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Service base URL, without a trailing slash.
    pub endpoint: String,
    /// API key sent on every request.
    pub api_key: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ExtractorConfig {
    /// Creates a config with the default request timeout.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Reqwest-backed [`Extractor`] implementation.
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: reqwest::Client,
    config: ExtractorConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResult {
    #[serde(default)]
    fields: serde_json::Value,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OperationError {
    #[serde(default)]
    message: String,
}

impl HttpExtractor {
    /// Creates a client from configuration.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| Error::with_source(ErrorKind::ExtractorPermanent, Box::new(err)))?;

        Ok(Self { client, config })
    }

    fn submit_url(&self, model_id: &str) -> String {
        format!("{}/models/{}:analyze", self.config.endpoint, model_id)
    }

    /// Maps an HTTP status to the transient/permanent error split.
    fn classify_status(status: StatusCode) -> ErrorKind {
        if status.is_server_error()
            || matches!(
                status,
                StatusCode::TOO_MANY_REQUESTS
                    | StatusCode::REQUEST_TIMEOUT
                    | StatusCode::TOO_EARLY
            )
        {
            ErrorKind::ExtractorTransient
        } else {
            ErrorKind::ExtractorPermanent
        }
    }

    fn error_for_response(response: &Response) -> Error {
        let status = response.status();
        Error::new(Self::classify_status(status))
            .with_detail(format!("provider returned {status}"))
    }

    fn transport_error(err: reqwest::Error) -> Error {
        // Connection and timeout failures are worth a retry.
        Error::with_source(ErrorKind::ExtractorTransient, Box::new(err))
    }

    fn retry_after(response: &Response) -> Option<Duration> {
        response
            .headers()
            .get(header::RETRY_AFTER)?
            .to_str()
            .ok()?
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

#[async_trait::async_trait]
impl Extractor for HttpExtractor {
    async fn submit(&self, model_id: &str, payload: Bytes) -> Result<OperationId> {
        let response = self
            .client
            .post(self.submit_url(model_id))
            .header(API_KEY_HEADER, &self.config.api_key)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_for_response(&response));
        }

        let operation_url = response
            .headers()
            .get("operation-location")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                Error::new(ErrorKind::ExtractorPermanent)
                    .with_detail("submission accepted without an operation location")
            })?;

        tracing::debug!(
            target: TRACING_TARGET,
            model_id = %model_id,
            operation = %operation_url,
            "submission accepted"
        );

        Ok(OperationId::new(operation_url))
    }

    async fn poll(&self, operation_id: &OperationId) -> Result<PollOutcome> {
        let response = self
            .client
            .get(operation_id.as_str())
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_for_response(&response));
        }

        let retry_after = Self::retry_after(&response);
        let body: OperationResponse = response
            .json()
            .await
            .map_err(|err| Error::with_source(ErrorKind::ExtractorTransient, Box::new(err)))?;

        match body.status.as_str() {
            "succeeded" => {
                let result = body.analyze_result.unwrap_or(AnalyzeResult {
                    fields: serde_json::Value::Null,
                    confidence: None,
                });
                Ok(PollOutcome::Succeeded {
                    fields: result.fields,
                    confidence: result.confidence,
                })
            }
            "failed" => {
                let message = body
                    .error
                    .map(|err| err.message)
                    .filter(|message| !message.is_empty())
                    .unwrap_or_else(|| "extraction failed".to_string());
                Ok(PollOutcome::Failed {
                    message,
                    // The provider reports validation failures here; a
                    // resubmission of the same page will not succeed.
                    transient: false,
                })
            }
            _ => Ok(PollOutcome::Running { retry_after }),
        }
    }
}
