//! `RemoteCollection` over JSON REST conventions.
//!
//! | verb         | request                                   |
//! |--------------|-------------------------------------------|
//! | `list`       | `GET /{resource}`                         |
//! | `create`     | `POST /{resource}` with the draft         |
//! | `update`     | `PATCH /{resource}/{id}` with the patch   |
//! | `delete`     | `DELETE /{resource}/{id}`                 |
//! | `set_status` | `PATCH /{resource}/{id}` with `{field: s}`|

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tracing::{debug, warn};

use super::http::{
    HttpError, HttpMethod, HttpRequest, HttpResponse, HttpTransport, ValidatedUrl,
    DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS,
};
use crate::config::ConfigError;
use crate::error::{FieldError, RemoteError, TransportFailure};
use crate::model::Entity;
use crate::remote::RemoteCollection;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_status_field() -> String {
    "status".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RestConfig {
    pub base_url: String,
    pub resource: String,
    #[serde(default)]
    pub bearer_token: Option<SecretString>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Body key `set_status` writes to.
    #[serde(default = "default_status_field")]
    pub status_field: String,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            resource: resource.into(),
            bearer_token: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            status_field: default_status_field(),
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(SecretString::new(token.into()));
        self
    }

    pub fn validate(&self) -> Result<ValidatedUrl, ConfigError> {
        let base = ValidatedUrl::new(self.base_url.as_str())
            .map_err(|e| ConfigError::Invalid(format!("base_url: {e}")))?;

        let resource_ok = !self.resource.is_empty()
            && self
                .resource
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !resource_ok {
            return Err(ConfigError::Invalid(format!(
                "resource '{}' must be a non-empty path segment",
                self.resource
            )));
        }

        if self.timeout_ms == 0 || self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "timeout_ms must be in 1..={MAX_TIMEOUT_MS}"
            )));
        }

        if self.status_field.trim().is_empty() {
            return Err(ConfigError::Invalid("status_field cannot be empty".into()));
        }

        if self
            .bearer_token
            .as_ref()
            .is_some_and(|t| t.expose_secret().trim().is_empty())
        {
            return Err(ConfigError::Invalid("bearer_token cannot be blank".into()));
        }

        Ok(base)
    }
}

/// Error body the server sends with non-2xx statuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub errors: Vec<FieldError>,
}

/// Maps a non-2xx response onto the remote error taxonomy.
#[must_use]
pub fn classify_status(status: u16, body: &[u8], request_id: &str) -> RemoteError {
    let parsed = serde_json::from_slice::<ApiErrorResponse>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP error: {status}"));
    let is_conflict = parsed
        .as_ref()
        .and_then(|e| e.code.as_deref())
        .is_some_and(|code| code.eq_ignore_ascii_case("conflict"));
    let fields = parsed.map(|e| e.errors).unwrap_or_default();

    match status {
        404 => RemoteError::NotFound { message },
        409 | 422 if is_conflict => RemoteError::Conflict { message },
        408 | 429 | 500..=599 => {
            TransportFailure::status(status, message).with_request_id(request_id).into()
        }
        400..=499 => RemoteError::Rejected { message, fields },
        _ => TransportFailure::status(status, message).with_request_id(request_id).into(),
    }
}

pub struct RestCollection<T, H> {
    config: RestConfig,
    base: ValidatedUrl,
    transport: H,
    _entity: PhantomData<fn() -> T>,
}

impl<T, H: HttpTransport> RestCollection<T, H> {
    pub fn new(config: RestConfig, transport: H) -> Result<Self, ConfigError> {
        let base = config.validate()?;
        Ok(Self {
            config,
            base,
            transport,
            _entity: PhantomData,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &RestConfig {
        &self.config
    }

    #[must_use]
    pub const fn transport(&self) -> &H {
        &self.transport
    }

    fn request(&self, method: HttpMethod, id: Option<String>) -> Result<HttpRequest, HttpError> {
        let url = match &id {
            Some(id) => self
                .base
                .with_segments(&[self.config.resource.as_str(), id.as_str()])?,
            None => self.base.with_segments(&[self.config.resource.as_str()])?,
        };

        let mut request = HttpRequest::new(method, url)
            .with_timeout_ms(self.config.timeout_ms)?
            .with_header("Accept", "application/json")?;
        if let Some(token) = &self.config.bearer_token {
            request =
                request.with_header("Authorization", format!("Bearer {}", token.expose_secret()))?;
        }
        Ok(request)
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, RemoteError> {
        let method = request.method();
        debug!(
            method = method.as_str(),
            url = request.url().as_str(),
            request_id = request.request_id(),
            "sending request"
        );

        let response = self
            .transport
            .send(request)
            .await
            .map_err(TransportFailure::from)?;

        if response.is_success() {
            return Ok(response);
        }

        let error = classify_status(response.status(), response.body(), response.request_id());
        warn!(
            method = method.as_str(),
            status = response.status(),
            request_id = response.request_id(),
            error = %error,
            "request failed"
        );
        Err(error)
    }
}

#[async_trait]
impl<T, H> RemoteCollection for RestCollection<T, H>
where
    T: Entity + DeserializeOwned,
    T::Draft: Serialize,
    T::Patch: Serialize,
    T::Status: Serialize,
    H: HttpTransport,
{
    type Entity = T;

    async fn list(&self) -> Result<Vec<T>, RemoteError> {
        let request = self.request(HttpMethod::Get, None)?;
        Ok(self.send(request).await?.json()?)
    }

    async fn create(&self, draft: &T::Draft) -> Result<T, RemoteError> {
        let request = self.request(HttpMethod::Post, None)?.with_json(draft)?;
        Ok(self.send(request).await?.json()?)
    }

    async fn update(&self, key: &T::Key, patch: &T::Patch) -> Result<T, RemoteError> {
        let request = self
            .request(HttpMethod::Patch, Some(key.to_string()))?
            .with_json(patch)?;
        Ok(self.send(request).await?.json()?)
    }

    async fn delete(&self, key: &T::Key) -> Result<(), RemoteError> {
        let request = self.request(HttpMethod::Delete, Some(key.to_string()))?;
        self.send(request).await?;
        Ok(())
    }

    async fn set_status(&self, key: &T::Key, status: &T::Status) -> Result<T, RemoteError> {
        let value = serde_json::to_value(status).map_err(|e| HttpError::SerializationError {
            message: e.to_string(),
        })?;
        let mut body = serde_json::Map::new();
        body.insert(self.config.status_field.clone(), value);

        let request = self
            .request(HttpMethod::Patch, Some(key.to_string()))?
            .with_json(&body)?;
        Ok(self.send(request).await?.json()?)
    }
}
