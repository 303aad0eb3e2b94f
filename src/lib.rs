// refresh-relay - authenticated HTTP client with single-flight token refresh

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod session;

pub use auth::{CredentialStore, MemoryCredentialStore, RefreshCoordinator, SqliteCredentialStore};
pub use config::AuthConfig;
pub use error::{ApiError, RefreshError, TransportError};
pub use http_client::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use session::Session;
