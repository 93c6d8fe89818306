//! FHIR REST client
//!
//! [`FhirClient`] implements [`RemoteRepository`] over HTTP with `reqwest`.
//! Searches and page fetches are retried with exponential backoff; creates and
//! transactions are sent exactly once.

use super::models::Bundle;
use super::repository::{CreateOutcome, RemoteRepository, SearchQuery};
use crate::config::FhirConfig;
use crate::domain::ids::RemoteId;
use crate::domain::{RepositoryError, Result, SyncError};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, LOCATION,
};
use reqwest::{Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// FHIR JSON media type
const FHIR_JSON: &str = "application/fhir+json";

/// HTTP implementation of [`RemoteRepository`]
///
/// # Example
///
/// ```no_run
/// use fhirsync::adapters::fhir::{FhirClient, RemoteRepository, SearchQuery};
/// use fhirsync::config::FhirConfig;
///
/// # async fn example() -> fhirsync::domain::Result<()> {
/// let client = FhirClient::new(FhirConfig::default())?;
/// let page = client.search(&SearchQuery::all("Patient", Some(100))).await?;
/// println!("{} patients on the first page", page.entry.len());
/// # Ok(())
/// # }
/// ```
pub struct FhirClient {
    /// Base URL without a trailing slash
    base_url: String,

    /// Base URL with a trailing slash, used to resolve relative links
    base: Url,

    client: Client,

    config: FhirConfig,
}

impl FhirClient {
    /// Builds a client from configuration
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Configuration`] if the base URL is invalid or the
    /// HTTP client cannot be built.
    pub fn new(config: FhirConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let base = Url::parse(&format!("{base_url}/")).map_err(|e| {
            SyncError::Configuration(format!("Invalid fhir.base_url '{}': {e}", config.base_url))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(FHIR_JSON));
        if let Some(auth) = auth_header_value(&config)? {
            headers.insert(AUTHORIZATION, auth);
        }

        let mut builder = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(30))
            .default_headers(headers);

        if !config.tls_verify {
            tracing::warn!(base_url = %base_url, "TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| SyncError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            base,
            client,
            config,
        })
    }

    /// Resolves a link returned by the server against the base URL
    fn resolve_link(&self, link: &str) -> Result<Url> {
        self.base.join(link).map_err(|e| {
            RepositoryError::InvalidResponse(format!("Invalid next link '{link}': {e}")).into()
        })
    }

    /// Retry a read with exponential backoff
    ///
    /// Only transient failures (connection, timeout, 5xx, 429) are retried.
    async fn retry_request<F, T, Fut>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_retries = self.config.retry.max_retries.max(1);
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    let transient = matches!(&e, SyncError::Repository(repo) if repo.is_transient());
                    if !transient || attempt >= max_retries {
                        return Err(e);
                    }

                    let delay_ms = backoff_delay_ms(&self.config, attempt);
                    crate::log_retry_attempt!(attempt, max_retries, delay_ms, e);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// Sends a GET and decodes a Bundle, retrying transient failures
    async fn get_bundle(&self, url: Url, query: &[(String, String)]) -> Result<Bundle> {
        self.retry_request(|| {
            let request = self
                .client
                .get(url.clone())
                .query(query)
                .header(CACHE_CONTROL, "no-cache");
            async move {
                let response = send(request).await?;
                decode_json(response).await
            }
        })
        .await
    }
}

#[async_trait]
impl RemoteRepository for FhirClient {
    async fn create(&self, resource: &Value) -> Result<CreateOutcome> {
        let resource_type = resource
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Validation("Resource has no resourceType".to_string()))?;

        let url = format!("{}/{}", self.base_url, resource_type);
        tracing::debug!(url = %url, "Creating resource");

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, FHIR_JSON)
            .header("Prefer", "return=representation")
            .body(serde_json::to_vec(resource)?);
        let response = send(request).await?;

        let location = response
            .headers()
            .get(LOCATION)
            .or_else(|| response.headers().get("Content-Location"))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response.bytes().await.map_err(transport_error)?;
        let created: Option<Value> = if body.is_empty() {
            None
        } else {
            serde_json::from_slice(&body).ok()
        };

        let remote_id = location
            .as_deref()
            .and_then(|loc| RemoteId::from_location(resource_type, loc))
            .or_else(|| {
                created
                    .as_ref()
                    .and_then(|r| r.get("id"))
                    .and_then(Value::as_str)
                    .and_then(|id| RemoteId::new(id).ok())
            })
            .ok_or_else(|| {
                RepositoryError::InvalidResponse(format!(
                    "Create of {resource_type} returned neither a Location nor an id"
                ))
            })?;

        Ok(CreateOutcome {
            remote_id,
            resource: created,
        })
    }

    async fn submit_transaction(&self, bundle: &Bundle) -> Result<Bundle> {
        tracing::debug!(
            base_url = %self.base_url,
            bundle_type = ?bundle.bundle_type,
            entries = bundle.entry.len(),
            "Submitting bundle"
        );

        let request = self
            .client
            .post(self.base.clone())
            .header(CONTENT_TYPE, FHIR_JSON)
            .body(serde_json::to_vec(bundle)?);
        let response = send(request).await?;
        decode_json(response).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<Bundle> {
        let url = self.resolve_link(&query.resource_type)?;
        tracing::debug!(
            resource_type = %query.resource_type,
            params = ?query.params,
            "Searching"
        );
        self.get_bundle(url, &query.params).await
    }

    async fn fetch_next_page(&self, page: &Bundle) -> Result<Bundle> {
        let link = page.next_link().ok_or_else(|| {
            SyncError::Repository(RepositoryError::NotFound(
                "Page has no next link".to_string(),
            ))
        })?;
        let url = self.resolve_link(link)?;
        tracing::debug!(url = %url, "Fetching next page");
        self.get_bundle(url, &[]).await
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Build authorization header value
fn auth_header_value(config: &FhirConfig) -> Result<Option<HeaderValue>> {
    let value = match config.auth_type.as_str() {
        "bearer" => config
            .access_token
            .as_ref()
            .map(|token| format!("Bearer {}", token.expose_secret().as_str())),
        "basic" => match (&config.username, &config.password) {
            (Some(username), Some(password)) => {
                let credentials = format!("{username}:{}", password.expose_secret().as_str());
                let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
                Some(format!("Basic {encoded}"))
            }
            _ => None,
        },
        _ => None,
    };

    value
        .map(|v| {
            let mut header = HeaderValue::from_str(&v).map_err(|_| {
                SyncError::Configuration("Credentials contain invalid header characters".to_string())
            })?;
            header.set_sensitive(true);
            Ok(header)
        })
        .transpose()
}

/// Delay before the given retry attempt (1-based), capped at `max_delay_ms`
fn backoff_delay_ms(config: &FhirConfig, attempt: usize) -> u64 {
    let factor = config
        .retry
        .backoff_multiplier
        .powi(attempt.saturating_sub(1) as i32);
    let delay = config.retry.initial_delay_ms as f64 * factor;
    (delay as u64).min(config.retry.max_delay_ms)
}

/// Sends a request and maps non-success statuses to [`RepositoryError`]
async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, body).into())
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| {
        SyncError::Repository(RepositoryError::InvalidResponse(format!(
            "Failed to decode response: {e}"
        )))
    })
}

fn transport_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        RepositoryError::Timeout(err.to_string()).into()
    } else {
        RepositoryError::ConnectionFailed(err.to_string()).into()
    }
}

/// Maps an HTTP status to a repository error
fn status_error(status: StatusCode, body: String) -> RepositoryError {
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RepositoryError::AuthenticationFailed(format!("{status}: {body}"))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => RepositoryError::NotFound(body),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            RepositoryError::Timeout(format!("{status}: {body}"))
        }
        _ if status.is_server_error() => RepositoryError::ServerError {
            status: code,
            message: body,
        },
        _ => RepositoryError::ClientError {
            status: code,
            message: body,
        },
    }
}
