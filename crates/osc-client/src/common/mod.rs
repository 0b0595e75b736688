//! Common utilities for the Outscale API client
//!
//! Provides the signed HTTP transport shared by every API call.

pub mod filters;
pub mod signing;

use crate::error::OscError;
use crate::models::ApiErrorResponse;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use signing::{Credentials, CONTENT_TYPE};
use tracing::debug;

/// HTTP client wrapper with request signing
pub struct HttpClient {
    client: Client,
    endpoint: Url,
    region: String,
    credentials: Credentials,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    ///
    /// `endpoint` is the API root, e.g. `https://api.eu-west-2.outscale.com/api/v1`.
    pub fn new(
        client: Client,
        endpoint: &str,
        region: String,
        credentials: Credentials,
    ) -> Result<Self, OscError> {
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| OscError::InvalidRequest(format!("invalid endpoint {}: {}", endpoint, e)))?;
        if endpoint.host_str().is_none() {
            return Err(OscError::InvalidRequest(format!(
                "endpoint {} has no host",
                endpoint
            )));
        }

        Ok(Self {
            client,
            endpoint,
            region,
            credentials,
        })
    }

    /// Get the API endpoint
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Get the region requests are signed for
    pub fn region(&self) -> &str {
        &self.region
    }

    fn host(&self) -> String {
        match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        }
    }

    /// Call an OAPI operation (`POST <endpoint>/<operation>`) and decode the response
    pub async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        body: &serde_json::Value,
    ) -> Result<T, OscError> {
        let path = format!("{}/{}", self.endpoint.path().trim_end_matches('/'), operation);
        let mut url = self.endpoint.clone();
        url.set_path(&path);

        let payload = serde_json::to_vec(body)?;
        let signed = signing::sign_request(
            &self.credentials,
            &self.region,
            &self.host(),
            &path,
            &payload,
            chrono::Utc::now(),
        )?;

        debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .header("Content-Type", CONTENT_TYPE)
            .header("Accept", "application/json")
            .header("X-Osc-Date", &signed.osc_date)
            .header("Authorization", &signed.authorization)
            .body(payload)
            .send()
            .await
            .map_err(OscError::Http)?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(decode_error(status.as_u16(), operation, &text));
        }

        serde_json::from_str(&text).map_err(|e| OscError::Api {
            status: status.as_u16(),
            code: String::new(),
            message: format!(
                "error decoding {} response: {} - Response (first 500 chars): {}",
                operation,
                e,
                text.chars().take(500).collect::<String>()
            ),
        })
    }
}

/// Map an OAPI error body to an [`OscError`]
pub(crate) fn decode_error(status: u16, operation: &str, body: &str) -> OscError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => {
            let first = &parsed.errors[0];
            OscError::from_api(status, &first.code, &first.error_type, &first.details)
        }
        _ => OscError::from_api(
            status,
            "",
            &format!("{} failed", operation),
            &body.chars().take(500).collect::<String>(),
        ),
    }
}
