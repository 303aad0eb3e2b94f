// Login/logout session on top of the refresh coordinator

use crate::auth::{
    CredentialPair, CredentialStore, LoginRequest, RefreshCoordinator, TokenPairResponse,
};
use crate::config::AuthConfig;
use crate::error::{ApiError, Result};
use crate::http_client::{HttpRequest, HttpResponse, Transport};

/// Authenticated session: login, logout and protected calls
///
/// All calls go through the coordinator, so an expired access token is
/// refreshed transparently and a rejected login is returned as is.
pub struct Session<T, S> {
    coordinator: RefreshCoordinator<T, S>,
}

impl<T: Transport, S: CredentialStore> Session<T, S> {
    pub fn new(transport: T, store: S, config: AuthConfig) -> Self {
        Self {
            coordinator: RefreshCoordinator::new(transport, store, config),
        }
    }

    pub fn from_coordinator(coordinator: RefreshCoordinator<T, S>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator<T, S> {
        &self.coordinator
    }

    /// Log in and store the returned token pair
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialPair> {
        let config = self.coordinator.config();
        let request = HttpRequest::post(config.login_endpoint.as_str())
            .with_json(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .map_err(|e| ApiError::ValidationError(e.to_string()))?;

        let response = self.coordinator.send(request).await?;
        let tokens: TokenPairResponse = response.json().map_err(|e| {
            ApiError::Internal(anyhow::anyhow!("Failed to parse login response: {}", e))
        })?;

        // A login without a refresh token must not leave the previous one usable
        self.coordinator.set_token(&tokens.access_token)?;
        match tokens.refresh_token {
            Some(ref refresh_token) => self.coordinator.set_refresh_token(refresh_token)?,
            None => self.coordinator.remove_refresh_token()?,
        }

        tracing::info!("Logged in as {}", email);

        Ok(CredentialPair {
            access_token: Some(tokens.access_token),
            refresh_token: tokens.refresh_token,
        })
    }

    /// Log out; stored tokens are cleared even if the call fails
    pub async fn logout(&self) -> Result<HttpResponse> {
        let url = self.coordinator.config().logout_endpoint.clone();
        let outcome = self.coordinator.send(HttpRequest::post(url)).await;

        if let Err(ref e) = outcome {
            tracing::warn!("Logout request failed: {}", e);
        }
        if let Err(e) = self.coordinator.clear_tokens() {
            tracing::error!("Failed to clear stored tokens: {}", e);
            if outcome.is_ok() {
                return Err(e);
            }
        }

        outcome
    }

    /// GET the configured protected endpoint
    pub async fn protected_request(&self) -> Result<HttpResponse> {
        let url = self.coordinator.config().protected_endpoint.clone();
        self.coordinator.send(HttpRequest::get(url)).await
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.coordinator.send(request).await
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.coordinator.token()
    }

    pub fn set_token(&self, access_token: &str) -> Result<()> {
        self.coordinator.set_token(access_token)
    }

    pub fn set_refresh_token(&self, refresh_token: &str) -> Result<()> {
        self.coordinator.set_refresh_token(refresh_token)
    }

    pub fn clear_tokens(&self) -> Result<()> {
        self.coordinator.clear_tokens()
    }

    pub fn is_logged_in(&self) -> Result<bool> {
        Ok(self.token()?.is_some())
    }
}
