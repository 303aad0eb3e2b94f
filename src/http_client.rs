use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// An outgoing request, kept owned so it can be replayed after a refresh
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Set a JSON body and the matching content type
    pub fn with_json<T: Serialize>(mut self, body: &T) -> serde_json::Result<Self> {
        let bytes = serde_json::to_vec(body)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Header value as a string, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A successful (2xx) response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Issues a single HTTP request
///
/// Non-success statuses are reported as `TransportError::Status` so callers can
/// inspect the status code of a failed call.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: HttpRequest,
    ) -> impl Future<Output = std::result::Result<HttpResponse, TransportError>> + Send;
}

/// Transport backed by a pooled reqwest client
#[derive(Clone)]
pub struct ReqwestTransport {
    /// Shared HTTP client with connection pooling
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport
    pub fn new(max_connections: usize, connect_timeout: u64, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        tracing::debug!(
            method = %method,
            url = %url,
            "Sending HTTP request"
        );

        let mut builder = self.client.request(method.clone(), &url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Err(classify_error(&e, &url)),
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify_error(&e, &url))?;

        tracing::debug!(
            status = %status,
            "Received HTTP response"
        );

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            tracing::warn!(
                status = status.as_u16(),
                method = %method,
                url = %url,
                response_body = %body,
                "HTTP request failed with error response"
            );
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

/// Categorize a reqwest error
fn classify_error(e: &reqwest::Error, url: &str) -> TransportError {
    let error_kind = if e.is_timeout() {
        "timeout"
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

    tracing::warn!(
        error_kind = error_kind,
        error = %e,
        url = %url,
        "HTTP request error"
    );

    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Network {
            kind: error_kind,
            message: e.to_string(),
        }
    }
}

/// Scripted in-process transport for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use dashmap::DashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    type Responder =
        dyn Fn(&HttpRequest) -> std::result::Result<HttpResponse, TransportError> + Send + Sync;

    /// Records every request and answers through a responder closure
    ///
    /// A URL can be gated: requests to it wait for a permit, which lets a test
    /// hold the refresh exchange open while other requests pile up.
    #[derive(Clone)]
    pub struct MockTransport {
        responder: Arc<Responder>,
        requests: Arc<Mutex<Vec<HttpRequest>>>,
        gates: Arc<DashMap<String, Arc<Semaphore>>>,
    }

    impl MockTransport {
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&HttpRequest) -> std::result::Result<HttpResponse, TransportError>
                + Send
                + Sync
                + 'static,
        {
            Self {
                responder: Arc::new(responder),
                requests: Arc::new(Mutex::new(Vec::new())),
                gates: Arc::new(DashMap::new()),
            }
        }

        /// Close a gate on `url`; add permits to let requests through
        pub fn gate(&self, url: &str) -> Arc<Semaphore> {
            let gate = Arc::new(Semaphore::new(0));
            self.gates.insert(url.to_string(), Arc::clone(&gate));
            gate
        }

        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }

        pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
            self.requests()
                .into_iter()
                .filter(|r| r.url == url)
                .collect()
        }

        pub fn count(&self, url: &str) -> usize {
            self.requests_to(url).len()
        }
    }

    impl Transport for MockTransport {
        async fn send(
            &self,
            request: HttpRequest,
        ) -> std::result::Result<HttpResponse, TransportError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(request.clone());
            }

            let gate = self.gates.get(&request.url).map(|g| Arc::clone(g.value()));
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            (self.responder)(&request)
        }
    }

    /// Shorthand for a status error
    pub fn status_error(status: u16, body: &str) -> TransportError {
        TransportError::Status {
            status,
            body: body.to_string(),
        }
    }

    /// Shorthand for a 200 response with a JSON body
    pub fn json_response(value: serde_json::Value) -> HttpResponse {
        HttpResponse::new(200, value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::AUTHORIZATION;

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(4, 5, 10).unwrap()
    }

    #[test]
    fn test_request_builders() {
        let req = HttpRequest::post("http://localhost/auth/login")
            .with_json(&serde_json::json!({"email": "a@b.c"}))
            .unwrap()
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));

        assert_eq!(req.method, Method::POST);
        assert_eq!(req.header("content-type"), Some("application/json"));
        assert_eq!(req.header("authorization"), Some("Bearer abc"));
        assert_eq!(req.body.as_deref(), Some(&br#"{"email":"a@b.c"}"#[..]));

        let req = HttpRequest::get("http://localhost/user");
        assert!(req.body.is_none());
        assert!(req.header("authorization").is_none());
    }

    #[test]
    fn test_response_helpers() {
        let res = HttpResponse::new(200, r#"{"id":7}"#);
        let value: serde_json::Value = res.json().unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(res.text(), r#"{"id":7}"#);
    }

    #[tokio::test]
    async fn test_success_passes_body_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/user")
            .match_header("authorization", "Bearer T1")
            .with_status(200)
            .with_header("x-request-id", "42")
            .with_body(r#"{"name":"ada"}"#)
            .create_async()
            .await;

        let req = HttpRequest::get(format!("{}/user", server.url()))
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer T1"));
        let res = transport().send(req).await.unwrap();

        assert_eq!(res.status, 200);
        assert_eq!(res.text(), r#"{"name":"ada"}"#);
        assert_eq!(
            res.headers.get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("42")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_becomes_transport_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/user")
            .with_status(401)
            .with_body("token expired")
            .create_async()
            .await;

        let err = transport()
            .send(HttpRequest::get(format!("{}/user", server.url())))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TransportError::Status {
                status: 401,
                body: "token expired".to_string()
            }
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_body_is_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh-token")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({"refreshToken": "R1"}),
            ))
            .with_status(201)
            .with_body(r#"{"accessToken":"T2","refreshToken":"R2"}"#)
            .create_async()
            .await;

        let req = HttpRequest::post(format!("{}/auth/refresh-token", server.url()))
            .with_json(&serde_json::json!({"refreshToken": "R1"}))
            .unwrap();
        let res = transport().send(req).await.unwrap();

        assert_eq!(res.status, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_connection_failure_is_network_error() {
        // Port 9 (discard) is not expected to be listening locally
        let err = transport()
            .send(HttpRequest::get("http://127.0.0.1:9/user"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransportError::Network { .. } | TransportError::Timeout(_)
        ));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn test_mock_transport_gate_holds_requests() {
        let transport = mock::MockTransport::new(|_| Ok(HttpResponse::new(200, "ok")));
        let gate = transport.gate("http://mock/slow");

        let t = transport.clone();
        let handle =
            tokio::spawn(async move { t.send(HttpRequest::get("http://mock/slow")).await });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        gate.add_permits(1);
        let res = handle.await.unwrap().unwrap();
        assert_eq!(res.text(), "ok");
        assert_eq!(transport.count("http://mock/slow"), 1);
    }
}
