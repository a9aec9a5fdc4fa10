// Authentication types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "token";

/// Storage key of the renewal (refresh) token
pub const RENEWAL_TOKEN_KEY: &str = "refreshToken";

/// Credential pair held by the [`CredentialStore`](super::CredentialStore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub renewal_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, renewal_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            renewal_token,
        }
    }
}

/// Why a renewal episode failed.
/// Every waiter of an episode receives the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenewalError {
    #[error("No renewal token available")]
    MissingRenewalToken,

    #[error("Renewal request failed: {0}")]
    Network(String),

    #[error("Renewal request timed out after {0}ms")]
    Timeout(u64),

    #[error("Renewal rejected: {status} - {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed renewal response: {0}")]
    Malformed(String),

    #[error("Renewal episode aborted")]
    Aborted,
}

/// Body of `POST /auth/refresh-token`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Envelope returned by the marketplace backend
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

/// `data` of a successful refresh
#[derive(Debug, Deserialize)]
pub struct RefreshData {
    pub token: String,
}

/// `data` of a successful login or registration
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub token: String,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<serde_json::Value>,
}
