//! JSON:API 1.0 read client.
//!
//! Peer services expose read endpoints under `/api/<resource>`. Only
//! read-time resolution lookups are used here (guild by name, route by
//! name, reactor by name in a map, tenant list, item data). Requests carry
//! the tenant headers; transient failures (connect, timeout, 429, 5xx) are
//! retried with full-jitter backoff.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::headers;
use crate::tenant::Tenant;
use crate::utils::retry::{self, RetryError, RetryPolicy};
use crate::utils::shutdown::Shutdown;

/// Errors raised by read lookups.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed document: {0}")]
    Decode(String),

    #[error("No endpoint configured for service '{0}'")]
    NoEndpoint(String),

    #[error("Lookup cancelled")]
    Cancelled,
}

impl ResolveError {
    /// Connection failures, timeouts, rate limiting and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            _ => false,
        }
    }
}

// ============================================================================
// Document model
// ============================================================================

/// Top-level JSON:API document.
#[derive(Debug, Clone, Deserialize)]
pub struct Document<A> {
    pub data: PrimaryData<A>,
    #[serde(default)]
    pub included: Vec<Resource<Value>>,
}

/// Primary data: a single resource, a collection, or null.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData<A> {
    Many(Vec<Resource<A>>),
    One(Box<Resource<A>>),
    Null(Option<()>),
}

impl<A> PrimaryData<A> {
    pub fn into_vec(self) -> Vec<Resource<A>> {
        match self {
            Self::Many(v) => v,
            Self::One(r) => vec![*r],
            Self::Null(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Resource<A> {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: A,
    #[serde(default)]
    pub relationships: HashMap<String, Relationship>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Option<Linkage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    One(ResourceIdentifier),
    Many(Vec<ResourceIdentifier>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

// ============================================================================
// Client
// ============================================================================

/// Peer service endpoints and lookup behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Base URL per service name (e.g. `guilds: http://atlas-guilds:8080`).
    pub endpoints: HashMap<String, String>,
    /// Fallback base URL when a service has no explicit endpoint.
    pub default_base_url: Option<String>,
    pub timeout_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            default_base_url: None,
            timeout_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ServicesConfig {
    pub fn base_url(&self, service: &str) -> Option<&str> {
        self.endpoints
            .get(service)
            .or(self.default_base_url.as_ref())
            .map(|s| s.trim_end_matches('/'))
    }
}

/// Tenant-aware JSON:API reader.
#[derive(Clone)]
pub struct JsonApiClient {
    client: Client,
    config: ServicesConfig,
    shutdown: Shutdown,
}

impl JsonApiClient {
    pub fn new(config: ServicesConfig, shutdown: Shutdown) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            config,
            shutdown,
        })
    }

    pub fn has_service(&self, service: &str) -> bool {
        self.config.base_url(service).is_some()
    }

    /// Build `{base}/api/{path}` for a service.
    pub fn url(&self, service: &str, path: &str) -> Result<String, ResolveError> {
        let base = self
            .config
            .base_url(service)
            .ok_or_else(|| ResolveError::NoEndpoint(service.to_string()))?;
        Ok(format!("{}/api/{}", base, path.trim_start_matches('/')))
    }

    /// Fetch a document, retrying transient failures.
    pub async fn fetch<A: DeserializeOwned>(
        &self,
        tenant: &Tenant,
        service: &str,
        path: &str,
    ) -> Result<Document<A>, ResolveError> {
        let url = self.url(service, path)?;
        let result = retry::retry(
            &self.config.retry,
            &self.shutdown,
            service,
            || self.get_once::<A>(tenant, &url),
            ResolveError::is_transient,
        )
        .await;

        match result {
            Ok(doc) => Ok(doc),
            Err(RetryError::Failed(e)) => {
                warn!(service = %service, url = %url, error = %e, "Lookup failed");
                Err(e)
            }
            Err(RetryError::Cancelled) => Err(ResolveError::Cancelled),
        }
    }

    /// Fetch exactly one resource; an empty collection is `NotFound`.
    pub async fn fetch_one<A: DeserializeOwned>(
        &self,
        tenant: &Tenant,
        service: &str,
        path: &str,
    ) -> Result<Resource<A>, ResolveError> {
        self.fetch::<A>(tenant, service, path)
            .await?
            .data
            .into_vec()
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NotFound(format!("{}/{}", service, path)))
    }

    async fn get_once<A: DeserializeOwned>(
        &self,
        tenant: &Tenant,
        url: &str,
    ) -> Result<Document<A>, ResolveError> {
        let mut request = self
            .client
            .get(url)
            .header("Accept", "application/vnd.api+json");
        for (name, value) in headers::tenant_headers(tenant) {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(ResolveError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        debug!(url = %url, bytes = body.len(), "Lookup response");
        serde_json::from_slice(&body).map_err(|e| ResolveError::Decode(e.to_string()))
    }
}
