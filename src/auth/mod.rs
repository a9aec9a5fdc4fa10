// Authentication module
// Credential storage and single-flight token renewal

mod coordinator;
mod credentials;
mod refresh;
mod storage;
mod types;

pub use coordinator::{RenewalCoordinator, DEFAULT_RENEWAL_TIMEOUT};
pub use credentials::CredentialStore;
pub use refresh::{refresh_url, REFRESH_PATH};
pub use storage::{MemoryStorage, SqliteStorage, TokenStorage};
pub use types::{
    Envelope, RenewalError, SessionData, TokenPair, ACCESS_TOKEN_KEY, RENEWAL_TOKEN_KEY,
};
