// Token refresh request

use reqwest::Client;
use std::time::Duration;

use crate::error::deadline_ms;

use super::types::{Envelope, RefreshData, RefreshRequest, RenewalError};

/// Path of the renewal endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "/auth/refresh-token";

/// Build the renewal URL for a base URL
pub fn refresh_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), REFRESH_PATH)
}

/// Exchange a renewal token for a new access token.
/// Exactly one network round-trip, bounded by `timeout`.
pub async fn request_new_token(
    client: &Client,
    base_url: &str,
    renewal_token: &str,
    timeout: Duration,
) -> Result<String, RenewalError> {
    let url = refresh_url(base_url);
    let timeout_ms = deadline_ms(timeout);

    tracing::debug!(url = %url, "Sending token refresh request");

    let exchange = async {
        let response = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&RefreshRequest {
                refresh_token: renewal_token,
            })
            .send()
            .await
            .map_err(|e| RenewalError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RenewalError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(RenewalError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        parse_refresh_body(&body)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(RenewalError::Timeout(timeout_ms)),
    }
}

/// Extract the token from `{ success: true, data: { token } }`
pub fn parse_refresh_body(body: &str) -> Result<String, RenewalError> {
    let envelope: Envelope<RefreshData> =
        serde_json::from_str(body).map_err(|e| RenewalError::Malformed(e.to_string()))?;

    if !envelope.success {
        return Err(RenewalError::Malformed(
            envelope
                .message
                .unwrap_or_else(|| "success flag is not set".to_string()),
        ));
    }

    match envelope.data {
        Some(data) if !data.token.is_empty() => Ok(data.token),
        _ => Err(RenewalError::Malformed(
            "response does not contain data.token".to_string(),
        )),
    }
}
