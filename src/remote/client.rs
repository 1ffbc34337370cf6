// JSON-over-HTTP client shared by the content and chat adapters.
//
// A thin reqwest wrapper: a base URL, an optional bearer token, and helpers
// that send a request and decode the JSON answer. Failures are returned as
// `ApiError` so each adapter can classify them for its own callers.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use super::traits::{HydrateError, PublishError};

const USER_AGENT: &str = concat!("feedrelay/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout for REST calls (not the stream).
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method} {path} returned {status}: {body}")]
    Status {
        method: Method,
        path: String,
        status: StatusCode,
        body: String,
    },
    #[error("{method} {path} failed: {source}")]
    Transport {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport { source, .. } => source.status(),
        }
    }

    /// Could the same request succeed later?
    ///
    /// Rate limits, request timeouts, server errors and network failures
    /// are transient. Other 4xx answers and undecodable bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
            }
            ApiError::Transport { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::NOT_FOUND) | Some(StatusCode::GONE)
        )
    }
}

impl From<ApiError> for HydrateError {
    fn from(err: ApiError) -> Self {
        if err.is_transient() {
            HydrateError::Transient(err.to_string())
        } else {
            HydrateError::Permanent(err.to_string())
        }
    }
}

impl From<ApiError> for PublishError {
    fn from(err: ApiError) -> Self {
        if err.is_transient() {
            PublishError::Connectivity(err.to_string())
        } else {
            PublishError::Rejected(err.to_string())
        }
    }
}

pub struct ApiClient {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Create a client for the API rooted at `base_url`.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("Invalid API URL: {base_url}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("API URL must be hierarchical (http/https): {base_url}");
        }

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// The base URL with `segments` appended, each percent-encoded.
    pub fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Hierarchical URLs were checked in `new`, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// GET a JSON resource.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let request = self.request(Method::GET, segments).query(query);
        let response = self.execute(Method::GET, segments, request).await?;
        Self::decode(Method::GET, segments, response).await
    }

    /// Send a JSON body and decode the JSON answer.
    pub async fn send_json<B, T>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(method.clone(), segments).json(body);
        let response = self.execute(method.clone(), segments, request).await?;
        Self::decode(method, segments, response).await
    }

    /// Send a JSON body and ignore whatever comes back on success.
    pub async fn send_json_unit<B>(
        &self,
        method: Method,
        segments: &[&str],
        body: &B,
    ) -> Result<(), ApiError>
    where
        B: Serialize + ?Sized,
    {
        let request = self.request(method.clone(), segments).json(body);
        self.execute(method, segments, request).await.map(|_| ())
    }

    fn request(&self, method: Method, segments: &[&str]) -> reqwest::RequestBuilder {
        let request = self.client.request(method, self.url_for(segments));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(
        &self,
        method: Method,
        segments: &[&str],
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ApiError> {
        let path = segments.join("/");
        debug!(method = %method, path = %path, "API request");

        let response = request.send().await.map_err(|source| ApiError::Transport {
            method: method.clone(),
            path: path.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                method,
                path,
                status,
                body,
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        method: Method,
        segments: &[&str],
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        response
            .json::<T>()
            .await
            .map_err(|source| ApiError::Transport {
                method,
                path: segments.join("/"),
                source,
            })
    }
}
