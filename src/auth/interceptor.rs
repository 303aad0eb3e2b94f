// Outbound credential attach and inbound expiry detection

use reqwest::header::{HeaderName, HeaderValue};

use super::store::CredentialStore;
use crate::config::AuthConfig;
use crate::error::{ApiError, TransportError};
use crate::http_client::{HttpRequest, HttpResponse};

/// HTTP status signalling an expired access token
pub const EXPIRY_STATUS: u16 = 401;

/// What to do with a completed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Hand the outcome to the caller unchanged
    PassThrough,
    /// Access token expired: wait for a refresh and replay
    Refresh,
}

/// Attach the stored access token, if any, to `request`
///
/// Without a stored token the headers are left untouched. Returns the token
/// that was attached.
pub fn attach_credential<S: CredentialStore + ?Sized>(
    request: &mut HttpRequest,
    store: &S,
    config: &AuthConfig,
) -> Result<Option<String>, ApiError> {
    let token = store.get(&config.access_token_key)?;
    if let Some(ref token) = token {
        set_authorization(request, config, token)?;
    }
    Ok(token)
}

/// Overwrite the authorization header with `token`
pub(crate) fn set_authorization(
    request: &mut HttpRequest,
    config: &AuthConfig,
    token: &str,
) -> Result<(), ApiError> {
    let name = HeaderName::from_bytes(config.header_name.as_bytes())
        .map_err(|e| ApiError::ValidationError(format!("Invalid header name: {}", e)))?;
    let mut value = HeaderValue::from_str(&config.authorization_value(token))
        .map_err(|e| ApiError::ValidationError(format!("Invalid token for header: {}", e)))?;
    value.set_sensitive(true);

    request.headers.insert(name, value);
    Ok(())
}

/// Decide whether an outcome is an expiry signal
///
/// A 401 from the login endpoint means bad credentials, not an expired token,
/// and is passed through so login never loops into a refresh.
pub fn classify(
    outcome: &Result<HttpResponse, TransportError>,
    request: &HttpRequest,
    config: &AuthConfig,
) -> Disposition {
    match outcome {
        Err(e) if e.status() == Some(EXPIRY_STATUS) => {
            if config.is_login_endpoint(&request.url) {
                Disposition::PassThrough
            } else {
                Disposition::Refresh
            }
        }
        _ => Disposition::PassThrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;

    fn unauthorized() -> Result<HttpResponse, TransportError> {
        Err(TransportError::Status {
            status: 401,
            body: String::new(),
        })
    }

    #[test]
    fn test_no_token_leaves_headers_untouched() {
        let config = AuthConfig::default();
        let store = MemoryCredentialStore::new();
        let mut req = HttpRequest::get(config.protected_endpoint.clone());

        assert_eq!(attach_credential(&mut req, &store, &config).unwrap(), None);
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_token_is_attached_with_scheme() {
        let config = AuthConfig::default();
        let store = MemoryCredentialStore::with_tokens("T1", "R1");
        let mut req = HttpRequest::get(config.protected_endpoint.clone());

        let attached = attach_credential(&mut req, &store, &config).unwrap();
        assert_eq!(attached.as_deref(), Some("T1"));
        assert_eq!(req.header("authorization"), Some("Bearer T1"));

        // Attaching twice replaces rather than appends
        attach_credential(&mut req, &store, &config).unwrap();
        assert_eq!(req.headers.get_all("authorization").iter().count(), 1);
    }

    #[test]
    fn test_custom_header_and_scheme() {
        let mut config = AuthConfig::default();
        config.header_name = "X-Auth".to_string();
        config.token_type = "Token".to_string();
        let store = MemoryCredentialStore::with_tokens("T1", "R1");
        let mut req = HttpRequest::get(config.protected_endpoint.clone());

        attach_credential(&mut req, &store, &config).unwrap();
        assert_eq!(req.header("x-auth"), Some("Token T1"));
        assert!(req.header("authorization").is_none());
    }

    #[test]
    fn test_unencodable_token_is_rejected() {
        let config = AuthConfig::default();
        let store = MemoryCredentialStore::with_tokens("bad\ntoken", "R1");
        let mut req = HttpRequest::get(config.protected_endpoint.clone());

        let err = attach_credential(&mut req, &store, &config).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[test]
    fn test_classify() {
        let config = AuthConfig::default();
        let protected = HttpRequest::get(config.protected_endpoint.clone());
        let login = HttpRequest::post(config.login_endpoint.clone());

        assert_eq!(
            classify(&Ok(HttpResponse::new(200, "")), &protected, &config),
            Disposition::PassThrough
        );
        assert_eq!(classify(&unauthorized(), &protected, &config), Disposition::Refresh);
        assert_eq!(classify(&unauthorized(), &login, &config), Disposition::PassThrough);

        let forbidden = Err(TransportError::Status {
            status: 403,
            body: String::new(),
        });
        assert_eq!(classify(&forbidden, &protected, &config), Disposition::PassThrough);

        let timeout = Err(TransportError::Timeout("slow".to_string()));
        assert_eq!(classify(&timeout, &protected, &config), Disposition::PassThrough);
    }
}
