//! HTTP client for the protocol and services sidecars.
//!
//! Both sidecars speak JSON over HTTP. The client owns base URLs, the optional
//! bearer token and the shared connection pool; it knows nothing about
//! effects. See [`interpreter`](super::interpreter) for the mapping from
//! effects to endpoints.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use super::error::ServiceError;
use super::retry::RetryConfig;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors constructing a gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway URL {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// JSON-over-HTTP client for both sidecars.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    protocol_url: Url,
    services_url: Url,
    token: Option<String>,
    pub(super) retry: RetryConfig,
}

impl HttpGateway {
    /// Creates a gateway for the given sidecar base URLs.
    pub fn new(
        protocol_url: &str,
        services_url: &str,
        token: Option<String>,
        retry: RetryConfig,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            protocol_url: parse_base(protocol_url)?,
            services_url: parse_base(services_url)?,
            token,
            retry,
        })
    }

    pub(super) async fn protocol_post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        self.post(&self.protocol_url, path, body).await
    }

    /// GETs a protocol resource, mapping 404 to `None`.
    pub(super) async fn protocol_get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, ServiceError> {
        let url = join(&self.protocol_url, path)?;
        let response = self.authorized(self.client.get(url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        handle_response(response).await.map(Some)
    }

    pub(super) async fn services_post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        self.post(&self.services_url, path, body).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        base: &Url,
        path: &str,
        body: &B,
    ) -> Result<T, ServiceError> {
        let url = join(base, path)?;
        let response = self
            .authorized(self.client.post(url))
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Body shape sidecars use to report failures.
#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    #[serde(alias = "message")]
    error: String,
}

async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ServiceError> {
    let status = response.status();
    if status.is_success() {
        let text = response.text().await?;
        // Acknowledgements may come back with an empty body.
        let body = if text.trim().is_empty() { "{}" } else { text.as_str() };
        return serde_json::from_str(body)
            .map_err(|e| ServiceError::permanent(format!("undecodable response: {e}")));
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ServiceError::classify(Some(status.as_u16()), message))
}

fn parse_base(raw: &str) -> Result<Url, GatewayError> {
    // A trailing slash makes `join` append rather than replace the last segment.
    let normalized = format!("{}/", raw.trim_end_matches('/'));
    Url::parse(&normalized).map_err(|source| GatewayError::InvalidUrl {
        url: raw.to_string(),
        source,
    })
}

fn join(base: &Url, path: &str) -> Result<Url, ServiceError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ServiceError::permanent(format!("bad request path {path:?}: {e}")))
}
