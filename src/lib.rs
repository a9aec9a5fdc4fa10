// Marketplace client - library root

pub mod auth;
pub mod config;
pub mod error;
pub mod http_client;
pub mod request;
pub mod session;

pub use auth::{CredentialStore, RenewalCoordinator, TokenPair};
pub use config::ClientSettings;
pub use error::ClientError;
pub use http_client::ApiClient;
pub use request::{Attempt, FormPart, RequestBody, RequestOptions};
pub use session::{Registration, SessionApi};
