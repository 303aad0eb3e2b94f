use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::interceptor::{attach_credential, classify, set_authorization, Disposition};
use super::refresh;
use super::store::{clear_pair, read_pair, write_pair, CredentialStore};
use super::types::CredentialPair;
use super::waiters::{Waiter, WaiterQueue};
use crate::config::AuthConfig;
use crate::error::{ApiError, RefreshError, Result};
use crate::http_client::{HttpRequest, HttpResponse, Transport};

/// Refresh state, guarded together with the waiter queue
#[derive(Default)]
struct RefreshState {
    /// True while a refresh exchange is outstanding
    in_flight: bool,

    /// Requests waiting on the current exchange
    waiters: WaiterQueue,

    /// Number of exchanges started
    cycles: u64,
}

struct Inner<T, S> {
    transport: T,
    store: S,
    config: AuthConfig,
    state: Mutex<RefreshState>,
}

/// Authenticated transport with single-flight token refresh
///
/// Every request gets the stored access token attached. A 401 (outside the
/// login endpoint) suspends the request until a refresh exchange completes,
/// then replays it with the new token. However many requests hit a 401 while
/// an exchange is running, only one exchange is made.
///
/// Create one coordinator per credential store; clones share state.
pub struct RefreshCoordinator<T, S> {
    inner: Arc<Inner<T, S>>,
}

impl<T, S> Clone for RefreshCoordinator<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, S: CredentialStore> RefreshCoordinator<T, S> {
    pub fn new(transport: T, store: S, config: AuthConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                config,
                state: Mutex::new(RefreshState::default()),
            }),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Send a request, refreshing the access token and replaying on expiry
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let config = &self.inner.config;

        let mut outbound = request.clone();
        let attached = attach_credential(&mut outbound, &self.inner.store, config)?;

        let outcome = self.inner.transport.send(outbound).await;

        match classify(&outcome, &request, config) {
            Disposition::PassThrough => outcome.map_err(ApiError::from),
            Disposition::Refresh => {
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    "Access token rejected, waiting for refresh"
                );
                self.replay_after_refresh(request, attached).await
            }
        }
    }

    async fn replay_after_refresh(
        &self,
        mut request: HttpRequest,
        attached: Option<String>,
    ) -> Result<HttpResponse> {
        let token = self.enqueue_waiter(attached.as_deref()).await.wait().await?;

        set_authorization(&mut request, &self.inner.config, &token)?;

        tracing::debug!(
            method = %request.method,
            url = %request.url,
            "Replaying request with refreshed token"
        );

        // A second 401 here is surfaced, not refreshed again
        self.inner
            .transport
            .send(request)
            .await
            .map_err(ApiError::from)
    }

    /// Queue the caller and start an exchange if none is running
    ///
    /// `attached` is the token the rejected request carried. When no exchange
    /// is running and the store already holds a different token, the 401 is
    /// from before the last refresh and the request is replayed with the
    /// stored token instead of spending the refresh token again.
    async fn enqueue_waiter(&self, attached: Option<&str>) -> Waiter {
        let mut state = self.inner.state.lock().await;

        if !state.in_flight {
            let current = self
                .inner
                .store
                .get(&self.inner.config.access_token_key)
                .ok()
                .flatten();
            if let Some(current) = current {
                if attached != Some(current.as_str()) {
                    tracing::debug!(
                        "Rejected token already replaced, replaying without refresh"
                    );
                    return Waiter::resolved(Ok(current));
                }
            }
        }

        let waiter = state.waiters.enqueue();

        if state.in_flight {
            tracing::debug!(waiting = state.waiters.len(), "Refresh in flight, request queued");
        } else {
            state.in_flight = true;
            state.cycles += 1;

            // Detached so a caller dropping its future cannot strand the queue
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.run_refresh_cycle().await;
            });
        }

        waiter
    }

    /// Whether an exchange is outstanding
    pub async fn is_refreshing(&self) -> bool {
        self.inner.state.lock().await.in_flight
    }

    /// Number of requests waiting on the current exchange
    pub async fn waiting(&self) -> usize {
        self.inner.state.lock().await.waiters.len()
    }

    /// Number of exchanges started so far
    pub async fn refresh_cycles(&self) -> u64 {
        self.inner.state.lock().await.cycles
    }

    /// Current access token
    pub fn token(&self) -> Result<Option<String>> {
        Ok(self.inner.store.get(&self.inner.config.access_token_key)?)
    }

    /// Both stored tokens
    pub fn credentials(&self) -> Result<CredentialPair> {
        Ok(read_pair(&self.inner.store, &self.inner.config)?)
    }

    pub fn set_token(&self, access_token: &str) -> Result<()> {
        Ok(self
            .inner
            .store
            .set(&self.inner.config.access_token_key, access_token)?)
    }

    pub fn set_refresh_token(&self, refresh_token: &str) -> Result<()> {
        Ok(self
            .inner
            .store
            .set(&self.inner.config.refresh_token_key, refresh_token)?)
    }

    pub fn remove_refresh_token(&self) -> Result<()> {
        Ok(self
            .inner
            .store
            .remove(&self.inner.config.refresh_token_key)?)
    }

    /// Remove both tokens
    pub fn clear_tokens(&self) -> Result<()> {
        Ok(clear_pair(&self.inner.store, &self.inner.config)?)
    }
}

impl<T: Transport, S: CredentialStore> Inner<T, S> {
    /// Run one exchange and resolve every queued waiter with its outcome
    async fn run_refresh_cycle(&self) {
        let outcome = AssertUnwindSafe(self.refresh_credentials())
            .catch_unwind()
            .await
            .unwrap_or(Err(RefreshError::Abandoned));

        // Reset and drain under the same lock: later 401s start a new cycle
        let waiters = {
            let mut state = self.state.lock().await;
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };

        match outcome {
            Ok(token) => {
                let released = waiters.release_all(&token);
                tracing::info!(released = released, "Released queued requests with new token");
            }
            Err(e) => {
                let failed = waiters.fail_all(&e);
                tracing::warn!(failed = failed, error = %e, "Token refresh failed");
            }
        }
    }

    /// Exchange the stored refresh token and persist the new pair
    async fn refresh_credentials(&self) -> std::result::Result<String, RefreshError> {
        let refresh_token = self
            .store
            .get(&self.config.refresh_token_key)
            .map_err(|e| RefreshError::Storage(e.to_string()))?;

        match refresh::exchange(&self.transport, &self.config, refresh_token).await {
            Ok(pair) => {
                write_pair(
                    &self.store,
                    &self.config,
                    &pair.access_token,
                    pair.refresh_token.as_deref(),
                )
                .map_err(|e| RefreshError::Storage(e.to_string()))?;

                Ok(pair.access_token)
            }
            Err(e) => {
                if e.is_invalid_refresh_token() {
                    tracing::warn!("Refresh token rejected, clearing stored credentials");
                    if let Err(store_err) = clear_pair(&self.store, &self.config) {
                        tracing::error!("Failed to clear credentials: {}", store_err);
                    }
                }
                Err(e)
            }
        }
    }
}
