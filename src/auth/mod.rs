// Authentication module
// Credential storage, request interception and single-flight token refresh

mod coordinator;
mod credentials;
mod interceptor;
mod refresh;
mod store;
mod types;
mod waiters;

pub use coordinator::RefreshCoordinator;
pub use credentials::SqliteCredentialStore;
pub use interceptor::{attach_credential, classify, Disposition};
pub use store::{CredentialStore, MemoryCredentialStore};
pub use types::{CredentialPair, LoginRequest, TokenPairResponse};
pub use waiters::{Waiter, WaiterQueue};
