// Session endpoints
// Login, registration and logout on top of the API client

use serde::Serialize;
use serde_json::Value;

use crate::auth::{Envelope, SessionData};
use crate::error::ClientError;
use crate::http_client::ApiClient;
use crate::request::RequestOptions;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Registration payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Typed access to the authentication endpoints
pub struct SessionApi<'a> {
    client: &'a ApiClient,
}

impl<'a> SessionApi<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        Self { client }
    }

    /// Log in and store both tokens.
    /// Returns the raw response so callers can read the user profile.
    pub async fn login(&self, email: &str, password: &str) -> Result<Value, ClientError> {
        let options = RequestOptions::post()
            .json(serde_json::json!({ "email": email, "password": password }))
            .timeout(self.client.auth_timeout())
            .public();

        let response = self.client.call(LOGIN_PATH, options).await?;
        self.store_session(&response)?;
        tracing::info!("Logged in as {}", email);
        Ok(response)
    }

    /// Create an account and store both tokens
    pub async fn register(&self, registration: &Registration) -> Result<Value, ClientError> {
        let options = RequestOptions::post()
            .json_from(registration)
            .map_err(|e| ClientError::Request(e.to_string()))?
            .timeout(self.client.auth_timeout())
            .public();

        let response = self.client.call(REGISTER_PATH, options).await?;
        self.store_session(&response)?;
        tracing::info!("Registered {}", registration.email);
        Ok(response)
    }

    /// Tell the server the session is over, then forget the tokens.
    /// The local session is cleared even if the server call fails.
    pub async fn logout(&self) {
        if self.is_authenticated() {
            if let Err(e) = self.client.call(LOGOUT_PATH, RequestOptions::post()).await {
                tracing::debug!(error = %e, "Server-side logout failed");
            }
        }

        self.client.credentials().clear();
        tracing::info!("Logged out");
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.credentials().access_token().is_some()
    }

    fn store_session(&self, response: &Value) -> Result<(), ClientError> {
        let envelope: Envelope<SessionData> = serde_json::from_value(response.clone())
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        match envelope.data {
            Some(data) if envelope.success && !data.token.is_empty() => {
                self.client
                    .credentials()
                    .replace(&data.token, data.refresh_token.as_deref());
                Ok(())
            }
            _ => Err(ClientError::InvalidResponse(
                envelope
                    .message
                    .unwrap_or_else(|| "response does not contain a session token".to_string()),
            )),
        }
    }
}
