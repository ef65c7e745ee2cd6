//! REST backend client.
//!
//! Thin reqwest wrapper over `/api/v1`. Response parsing lives in pure
//! functions (`parse_list`, `parse_record`, `parse_profile`) so the envelope
//! rules are testable without a server. Views and forms talk to the
//! [`Backend`] trait, never to `ApiClient` directly.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures, non-2xx statuses, malformed bodies and `success:
//! false` envelopes are all distinct `ApiError` variants so callers can
//! surface them instead of silently dropping the response.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::record::Record;

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The base URL cannot carry API paths.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// The HTTP request did not complete.
    #[error("API request failed: {0}")]
    Request(String),

    /// The backend returned a non-success HTTP status.
    #[error("API response error: status {status}")]
    Response { status: u16, body: String },

    /// The response body is not the expected envelope.
    #[error("API response parse failed: {0}")]
    Parse(String),

    /// The envelope reported `success: false`.
    #[error("API rejected request: {0}")]
    Rejected(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

// =============================================================================
// RESOURCES
// =============================================================================

/// Backend tables reachable through the generic CRUD endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Job,
    Prompt,
    PromptChain,
    Task,
}

impl Table {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Job => "job",
            Self::Prompt => "prompt",
            Self::PromptChain => "prompt_chain",
            Self::Task => "task",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "job" => Some(Self::Job),
            "prompt" => Some(Self::Prompt),
            "prompt_chain" => Some(Self::PromptChain),
            "task" => Some(Self::Task),
            _ => None,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque change-detection token returned with list responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(pub String);

/// One list response: records in server order plus an optional fingerprint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub records: Vec<Record>,
    pub fingerprint: Option<Fingerprint>,
}

/// A dataset file for `POST /api/v1/upload`.
#[derive(Debug, Clone)]
pub struct DatasetUpload {
    pub dataset_name: String,
    /// Task route the dataset belongs to, sent as `dataset_type`.
    pub dataset_type: Option<String>,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

// =============================================================================
// BACKEND TRAIT
// =============================================================================

/// Backend operations used by views and forms. Enables mocking in tests.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// `GET /api/v1/profile`: the logged-in user's `username` and `credits`.
    async fn profile(&self) -> Result<Record, ApiError>;

    /// `GET /api/v1/{table}`.
    async fn list(&self, table: Table) -> Result<Snapshot, ApiError>;

    /// `GET /api/v1/{table}/{id}`.
    async fn get(&self, table: Table, id: &str) -> Result<Record, ApiError>;

    /// `POST /api/v1/{table}`.
    async fn create(&self, table: Table, record: &Record) -> Result<Record, ApiError>;

    /// `PUT /api/v1/{table}/{id}`.
    async fn update(&self, table: Table, id: &str, record: &Record) -> Result<Record, ApiError>;

    /// `POST /api/v1/upload` as multipart `file` + `dataset_name`.
    async fn upload(&self, upload: DatasetUpload) -> Result<Record, ApiError>;
}

// =============================================================================
// CLIENT
// =============================================================================

/// Build the shared HTTP client with request and connect timeouts.
///
/// # Errors
///
/// Returns [`ApiError::HttpClientBuild`] if reqwest rejects the configuration.
pub fn build_http(request_timeout: Duration, connect_timeout: Duration) -> Result<reqwest::Client, ApiError> {
    reqwest::Client::builder()
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| ApiError::HttpClientBuild(e.to_string()))
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidBaseUrl`] when `base_url` is not an
    /// absolute hierarchical URL.
    pub fn new(http: reqwest::Client, base_url: &str, api_key: Option<String>) -> Result<Self, ApiError> {
        let base = Url::parse(base_url).map_err(|e| ApiError::InvalidBaseUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url.to_owned()));
        }
        Ok(Self { http, base, api_key: api_key.filter(|key| !key.trim().is_empty()) })
    }

    /// Same client, authenticated with `api_key`.
    #[must_use]
    pub fn with_api_key(&self, api_key: &str) -> Self {
        let mut client = self.clone();
        client.api_key = Some(api_key.to_owned()).filter(|key| !key.trim().is_empty());
        client
    }

    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Absolute URL for `/api/v1/<segments...>`, each segment percent-encoded.
    #[must_use]
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v1"]).extend(segments);
        }
        url
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await.map_err(|e| ApiError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| ApiError::Request(e.to_string()))?;
        debug!(status, bytes = text.len(), "api response");

        if !(200..300).contains(&status) {
            return Err(ApiError::Response { status, body: text });
        }
        Ok(text)
    }
}

#[async_trait::async_trait]
impl Backend for ApiClient {
    async fn profile(&self) -> Result<Record, ApiError> {
        let text = self.send(self.http.get(self.endpoint(&["profile"]))).await?;
        parse_profile(&text)
    }

    async fn list(&self, table: Table) -> Result<Snapshot, ApiError> {
        let text = self.send(self.http.get(self.endpoint(&[table.as_str()]))).await?;
        parse_list(&text)
    }

    async fn get(&self, table: Table, id: &str) -> Result<Record, ApiError> {
        let text = self.send(self.http.get(self.endpoint(&[table.as_str(), id]))).await?;
        parse_record(&text)
    }

    async fn create(&self, table: Table, record: &Record) -> Result<Record, ApiError> {
        let request = self.http.post(self.endpoint(&[table.as_str()])).json(record);
        let text = self.send(request).await?;
        parse_saved(&text, record)
    }

    async fn update(&self, table: Table, id: &str, record: &Record) -> Result<Record, ApiError> {
        let request = self.http.put(self.endpoint(&[table.as_str(), id])).json(record);
        let text = self.send(request).await?;
        parse_saved(&text, record)
    }

    async fn upload(&self, upload: DatasetUpload) -> Result<Record, ApiError> {
        let file = reqwest::multipart::Part::bytes(upload.bytes).file_name(upload.file_name);
        let mut form = reqwest::multipart::Form::new().text("dataset_name", upload.dataset_name);
        if let Some(dataset_type) = upload.dataset_type {
            form = form.text("dataset_type", dataset_type);
        }
        let form = form.part("file", file);
        let text = self.send(self.http.post(self.endpoint(&["upload"])).multipart(form)).await?;
        parse_saved(&text, &Record::new())
    }
}

// =============================================================================
// ENVELOPE PARSING
// =============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    checksum: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn parse_envelope(text: &str) -> Result<Envelope, ApiError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| ApiError::Parse(e.to_string()))?;
    if envelope.success == Some(false) {
        let message = envelope.message.unwrap_or_else(|| "request rejected".to_owned());
        return Err(ApiError::Rejected(message));
    }
    Ok(envelope)
}

fn record_from(value: Value) -> Result<Record, ApiError> {
    match value {
        Value::Object(map) => Ok(Record::from(map)),
        other => Err(ApiError::Parse(format!("expected record object, got {other}"))),
    }
}

/// Parse a `{data: [...], checksum}` list body.
///
/// # Errors
///
/// Returns [`ApiError::Parse`] for malformed bodies and
/// [`ApiError::Rejected`] for `success: false`.
pub fn parse_list(text: &str) -> Result<Snapshot, ApiError> {
    let envelope = parse_envelope(text)?;
    let records = match envelope.data {
        Value::Array(items) => items.into_iter().map(record_from).collect::<Result<Vec<_>, _>>()?,
        Value::Null => Vec::new(),
        other => return Err(ApiError::Parse(format!("expected record list, got {other}"))),
    };
    let fingerprint = envelope.checksum.and_then(|checksum| match checksum {
        Value::Null => None,
        Value::String(s) => Some(Fingerprint(s)),
        other => Some(Fingerprint(other.to_string())),
    });
    Ok(Snapshot { records, fingerprint })
}

/// Parse a `{data: {...}}` single record body. A one-element list is accepted.
///
/// # Errors
///
/// Returns [`ApiError::Parse`] when `data` holds no record.
pub fn parse_record(text: &str) -> Result<Record, ApiError> {
    match parse_envelope(text)?.data {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::Parse("record not found".to_owned()))
            .and_then(record_from),
        other => record_from(other),
    }
}

/// Parse `{success, data: {username, credits}}`.
///
/// # Errors
///
/// Returns [`ApiError::Rejected`] unless `success` is true.
pub fn parse_profile(text: &str) -> Result<Record, ApiError> {
    let envelope = parse_envelope(text)?;
    if envelope.success != Some(true) {
        return Err(ApiError::Rejected("profile unavailable".to_owned()));
    }
    record_from(envelope.data)
}

/// Parse a create/update/upload reply. Backends that echo nothing yield the
/// submitted record.
fn parse_saved(text: &str, submitted: &Record) -> Result<Record, ApiError> {
    if text.trim().is_empty() {
        return Ok(submitted.clone());
    }
    match parse_envelope(text)?.data {
        Value::Object(map) => Ok(Record::from(map)),
        _ => Ok(submitted.clone()),
    }
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
