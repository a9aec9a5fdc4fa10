use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Request, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::{CredentialStore, RenewalCoordinator};
use crate::config::ClientSettings;
use crate::error::{deadline_ms, fallback_message, ClientError};
use crate::request::{Attempt, FormValue, RequestBody, RequestOptions};

/// Error codes a server uses when the access token itself is the problem
const TOKEN_REJECTION_CODES: &[&str] = &["TOKEN_EXPIRED", "INVALID_TOKEN", "TOKEN_INVALID"];

/// Outcome of a single network attempt
#[derive(Debug, PartialEq)]
pub(crate) enum Reply {
    Success(Value),
    /// 401; `token_rejected` when the body blames the access token
    Unauthorized { token_rejected: bool, body: String },
    Failure(ClientError),
}

/// The single entry point for API calls.
///
/// Handles per-call deadlines, bearer credentials, response classification and
/// one transparent retry after a coordinated token renewal.
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    base_url: String,

    credentials: Arc<CredentialStore>,

    /// Shared renewal state, one per session
    coordinator: RenewalCoordinator,

    default_timeout: Duration,

    /// Deadline for login and registration
    auth_timeout: Duration,
}

impl ApiClient {
    /// Create a client and its renewal coordinator from settings
    pub fn new(settings: &ClientSettings, credentials: Arc<CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let coordinator = RenewalCoordinator::new(
            client.clone(),
            settings.base_url.clone(),
            credentials.clone(),
            settings.renewal_timeout,
        );

        Ok(Self::with_coordinator(client, settings, credentials, coordinator))
    }

    /// Create a client around an existing coordinator
    pub fn with_coordinator(
        client: Client,
        settings: &ClientSettings,
        credentials: Arc<CredentialStore>,
        coordinator: RenewalCoordinator,
    ) -> Self {
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
            coordinator,
            default_timeout: settings.request_timeout,
            auth_timeout: settings.auth_timeout,
        }
    }

    /// Perform a logical call and return the parsed JSON body
    pub async fn call(&self, endpoint: &str, options: RequestOptions) -> Result<Value, ClientError> {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!(
            "api_call",
            request_id = %request_id,
            method = %options.method,
            endpoint = endpoint
        );

        self.dispatch(endpoint, &options, request_id)
            .instrument(span)
            .await
    }

    pub async fn get(&self, endpoint: &str) -> Result<Value, ClientError> {
        self.call(endpoint, RequestOptions::get()).await
    }

    pub async fn post(&self, endpoint: &str, body: Value) -> Result<Value, ClientError> {
        self.call(endpoint, RequestOptions::post().json(body)).await
    }

    pub async fn put(&self, endpoint: &str, body: Value) -> Result<Value, ClientError> {
        self.call(endpoint, RequestOptions::put().json(body)).await
    }

    pub async fn patch(&self, endpoint: &str, body: Value) -> Result<Value, ClientError> {
        self.call(endpoint, RequestOptions::patch().json(body)).await
    }

    pub async fn delete(&self, endpoint: &str) -> Result<Value, ClientError> {
        self.call(endpoint, RequestOptions::delete()).await
    }

    async fn dispatch(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        request_id: Uuid,
    ) -> Result<Value, ClientError> {
        let mut attempt = Attempt::First;
        // Token handed back by the renewal, used as-is for the retry
        let mut renewed: Option<String> = None;

        loop {
            let token = match renewed.take() {
                Some(token) => Some(token),
                None if options.public => None,
                None => self.credentials.access_token(),
            };

            tracing::debug!(attempt = ?attempt, "Executing request attempt");

            let reply = self
                .send_once(endpoint, options, token.as_deref(), request_id)
                .await?;

            match reply {
                Reply::Success(value) => return Ok(value),
                Reply::Failure(err) => {
                    tracing::warn!(error = %err, "Request failed");
                    return Err(err);
                }
                Reply::Unauthorized { body, .. } if options.public => {
                    return Err(http_error(StatusCode::UNAUTHORIZED.as_u16(), &body));
                }
                Reply::Unauthorized {
                    token_rejected: true,
                    ..
                } if attempt.may_renew() => {
                    tracing::warn!("Access token rejected, renewing and retrying...");

                    match self.coordinator.renew_after(token.as_deref()).await {
                        Ok(token) => renewed = Some(token),
                        Err(e) => {
                            tracing::warn!(error = %e, "Renewal failed, session expired");
                            return Err(ClientError::AuthExpired);
                        }
                    }

                    attempt = Attempt::RetryAfterRenewal;
                }
                Reply::Unauthorized { .. } => {
                    tracing::warn!(attempt = ?attempt, "Unauthorized, clearing credentials");
                    self.credentials.clear();
                    return Err(ClientError::AuthExpired);
                }
            }
        }
    }

    /// Send one attempt under its own deadline.
    /// The timer lives inside this future and is dropped on every exit.
    async fn send_once(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: Option<&str>,
        request_id: Uuid,
    ) -> Result<Reply, ClientError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let timeout_ms = deadline_ms(timeout);
        let request = self.build_request(endpoint, options, token, request_id)?;

        let exchange = async {
            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| transport_error(e, timeout_ms))?;

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| transport_error(e, timeout_ms))?;

            tracing::debug!(status = %status, "Received HTTP response");
            Ok::<_, ClientError>((status, body))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                let (status, body) = result?;
                Ok(classify(status.as_u16(), &body))
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout_ms, "Request timed out");
                Err(ClientError::Timeout { timeout_ms })
            }
        }
    }

    fn build_request(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: Option<&str>,
        request_id: Uuid,
    ) -> Result<Request, ClientError> {
        let url = self.url_for(endpoint);

        let mut builder = self
            .client
            .request(options.method.clone(), &url)
            .header("X-Request-Id", request_id.to_string());

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }

        if options.body.is_json() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }

        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        builder = match &options.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.body(value.to_string()),
            RequestBody::Bytes { data, content_type } => {
                let builder = match content_type {
                    Some(content_type) => builder.header(CONTENT_TYPE, content_type.as_str()),
                    None => builder,
                };
                builder.body(data.clone())
            }
            RequestBody::Multipart(parts) => {
                let mut form = Form::new();
                for part in parts {
                    form = match &part.value {
                        FormValue::Text(text) => form.text(part.name.clone(), text.clone()),
                        FormValue::File {
                            file_name,
                            mime,
                            data,
                        } => {
                            let mut file = Part::bytes(data.to_vec()).file_name(file_name.clone());
                            if let Some(mime) = mime {
                                file = file
                                    .mime_str(mime)
                                    .map_err(|e| ClientError::Request(e.to_string()))?;
                            }
                            form.part(part.name.clone(), file)
                        }
                    };
                }
                builder.multipart(form)
            }
        };

        builder
            .build()
            .map_err(|e| ClientError::Request(e.to_string()))
    }

    /// Resolve an endpoint against the base URL. Absolute URLs pass through.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn coordinator(&self) -> &RenewalCoordinator {
        &self.coordinator
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn auth_timeout(&self) -> Duration {
        self.auth_timeout
    }
}

/// Categorize a transport failure
/// A connect timeout is a connection failure, not the per-call deadline
fn transport_error(e: reqwest::Error, timeout_ms: u64) -> ClientError {
    if e.is_timeout() && !e.is_connect() {
        return ClientError::Timeout { timeout_ms };
    }

    let error_kind = if e.is_connect() && e.is_timeout() {
        "connect_timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    };

    tracing::warn!(error_kind = error_kind, error = %e, "HTTP request error");
    ClientError::Network(format!("{} (kind: {})", e, error_kind))
}

/// Classify a complete response
pub(crate) fn classify(status: u16, body: &str) -> Reply {
    match status {
        200..=299 => parse_success(body),
        401 => Reply::Unauthorized {
            token_rejected: is_token_rejection(body),
            body: body.to_string(),
        },
        _ => Reply::Failure(http_error(status, body)),
    }
}

fn parse_success(body: &str) -> Reply {
    if body.trim().is_empty() {
        return Reply::Success(Value::Null);
    }

    match serde_json::from_str(body) {
        Ok(value) => Reply::Success(value),
        Err(e) => Reply::Failure(ClientError::InvalidResponse(e.to_string())),
    }
}

/// Whether a 401 body says the access token is expired or invalid
pub(crate) fn is_token_rejection(body: &str) -> bool {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(code) = json.get("code").and_then(|v| v.as_str()) {
            if TOKEN_REJECTION_CODES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(code))
            {
                return true;
            }
        }

        return server_message(&json).is_some_and(|message| mentions_bad_token(&message));
    }

    mentions_bad_token(body)
}

fn mentions_bad_token(text: &str) -> bool {
    let text = text.to_lowercase();
    (text.contains("token") || text.contains("jwt"))
        && (text.contains("expired") || text.contains("invalid"))
}

/// Build an HTTP error, preferring the server's message
pub(crate) fn http_error(status: u16, body: &str) -> ClientError {
    let json = serde_json::from_str::<Value>(body).ok();

    let message = json
        .as_ref()
        .and_then(server_message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| fallback_message(status));

    let code = json
        .as_ref()
        .and_then(|j| j.get("code"))
        .and_then(|v| v.as_str())
        .map(str::to_string);

    ClientError::Http {
        status,
        message,
        code,
    }
}

/// `message`, `error` or `error.message` of an error body
fn server_message(json: &Value) -> Option<String> {
    if let Some(message) = json.get("message").and_then(|v| v.as_str()) {
        return Some(message.to_string());
    }

    match json.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(error) => error
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        None => None,
    }
}
