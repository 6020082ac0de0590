//! # HTTP Service Client
//!
//! Thin JSON client for sibling services. Every request carries the
//! configured timeout and, when set, the cluster `Secret` header. Failures
//! are classified into [`CollaboratorError`] so handlers can map them to
//! transient or permanent outcomes.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::errors::{CollaboratorError, CollaboratorResult};
use crate::config::{ConfigResult, ConfigurationError};

const SECRET_HEADER: &str = "Secret";

#[derive(Debug, Clone)]
pub struct HttpServiceClient {
    client: Client,
    service: &'static str,
    base_url: String,
}

impl HttpServiceClient {
    pub fn new(
        service: &'static str,
        base_url: &str,
        timeout: Duration,
        secret: Option<&str>,
    ) -> ConfigResult<Self> {
        Url::parse(base_url).map_err(|e| {
            ConfigurationError::invalid_value(
                format!("collaborators.{service}_url"),
                base_url,
                format!("invalid base URL: {e}"),
            )
        })?;

        let mut builder = Client::builder()
            .timeout(timeout)
            .user_agent(format!("fsm-worker/{}", env!("CARGO_PKG_VERSION")));

        if let Some(secret) = secret {
            let mut headers = HeaderMap::new();
            let mut value = HeaderValue::from_str(secret).map_err(|_| {
                ConfigurationError::invalid_value(
                    "collaborators.cluster_secret",
                    "<redacted>",
                    "secret is not a valid header value",
                )
            })?;
            value.set_sensitive(true);
            headers.insert(SECRET_HEADER, value);
            builder = builder.default_headers(headers);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigurationError::load_error(format!("Failed to create HTTP client: {e}")))?;

        info!(
            service,
            base_url,
            timeout_ms = timeout.as_millis() as u64,
            secret_configured = secret.is_some(),
            "Created collaborator client"
        );

        Ok(Self {
            client,
            service,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> CollaboratorResult<T> {
        self.execute(self.client.get(self.url(path))).await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CollaboratorResult<T> {
        self.execute(self.client.post(self.url(path)).json(body)).await
    }

    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> CollaboratorResult<T> {
        self.execute(self.client.patch(self.url(path)).json(body)).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> CollaboratorResult<T> {
        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(self.service, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport(self.service, &e))?;

        if !status.is_success() {
            let error = classify_status(self.service, status, &body);
            warn!(service = self.service, status = %status, error = %error, "Collaborator call failed");
            return Err(error);
        }

        debug!(service = self.service, status = %status, "Collaborator call succeeded");
        // Empty bodies (204) decode as JSON null
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| {
            CollaboratorError::rejected(self.service, format!("unexpected response body: {e}"))
        })
    }
}

/// Error for a non-success HTTP status
pub fn classify_status(service: &str, status: StatusCode, body: &str) -> CollaboratorError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            CollaboratorError::timeout(service)
        }
        StatusCode::TOO_MANY_REQUESTS => CollaboratorError::rate_limited(service),
        StatusCode::NOT_FOUND => CollaboratorError::not_found(format!("{service}: {body}")),
        s if s.is_server_error() => {
            CollaboratorError::unavailable(service, format!("HTTP {}: {body}", s.as_u16()))
        }
        s => CollaboratorError::rejected(service, format!("HTTP {}: {body}", s.as_u16())),
    }
}

fn classify_transport(service: &str, error: &reqwest::Error) -> CollaboratorError {
    if error.is_timeout() {
        CollaboratorError::timeout(service)
    } else if error.is_decode() || error.is_builder() {
        CollaboratorError::rejected(service, error.to_string())
    } else {
        CollaboratorError::unavailable(service, error.to_string())
    }
}
