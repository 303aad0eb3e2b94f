// Token refresh exchange

use super::types::{RefreshRequest, TokenPairResponse};
use crate::config::AuthConfig;
use crate::error::{RefreshError, TransportError};
use crate::http_client::{HttpRequest, Transport};

/// Status the refresh endpoint uses for an invalid or expired refresh token
pub const INVALID_REFRESH_STATUS: u16 = 422;

/// Exchange `refresh_token` for a new token pair
///
/// Goes straight to the transport: a 401 here must not re-enter refresh dispatch.
pub async fn exchange<T: Transport>(
    transport: &T,
    config: &AuthConfig,
    refresh_token: Option<String>,
) -> Result<TokenPairResponse, RefreshError> {
    let refresh_token = refresh_token.ok_or(RefreshError::MissingRefreshToken)?;

    tracing::info!("Refreshing access token...");

    let request = HttpRequest::post(config.refresh_endpoint.as_str())
        .with_json(&RefreshRequest { refresh_token })
        .map_err(|e| {
            RefreshError::Exchange(TransportError::Network {
                kind: "request_error",
                message: e.to_string(),
            })
        })?;

    let send = transport.send(request);
    let outcome = match config.refresh_timeout {
        Some(limit) => tokio::time::timeout(limit, send)
            .await
            .map_err(|_| RefreshError::TimedOut(limit))?,
        None => send.await,
    };

    let response = outcome.map_err(|e| match e {
        TransportError::Status { status, body } if status == INVALID_REFRESH_STATUS => {
            RefreshError::InvalidRefreshToken { status, body }
        }
        other => RefreshError::Exchange(other),
    })?;

    let pair: TokenPairResponse = response
        .json()
        .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;

    if pair.access_token.is_empty() {
        return Err(RefreshError::MalformedResponse(
            "response does not contain accessToken".to_string(),
        ));
    }

    tracing::info!(
        rotated_refresh_token = pair.refresh_token.is_some(),
        "Access token refreshed"
    );

    Ok(pair)
}
