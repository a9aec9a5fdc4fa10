use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-call deadline
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Deadline for login and registration (slow password hashing, cold starts)
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 30_000;

/// Ceiling for the token refresh round-trip
pub const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Marketplace API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the marketplace API
    #[arg(short = 'u', long, env = "API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Default request timeout in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,

    /// Login/registration timeout in milliseconds
    #[arg(long, env = "AUTH_TIMEOUT_MS", default_value_t = DEFAULT_AUTH_TIMEOUT_MS)]
    pub auth_timeout_ms: u64,

    /// Token refresh timeout in milliseconds
    #[arg(long, env = "REFRESH_TIMEOUT_MS", default_value_t = DEFAULT_REFRESH_TIMEOUT_MS)]
    pub refresh_timeout_ms: u64,

    /// Path to the SQLite credential database
    #[arg(short = 'c', long, env = "CREDENTIALS_DB")]
    pub credentials_db: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Log in and store the session tokens
    Login {
        #[arg(short, long)]
        email: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Create an account and store the session tokens
    Register {
        #[arg(long)]
        name: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: Option<String>,
        /// Account role (customer or vendor)
        #[arg(long, default_value = "customer")]
        role: String,
    },

    /// End the session and forget the stored tokens
    Logout,

    /// Show whether a session is stored
    Status,

    /// Perform an API call and print the JSON response
    Request {
        /// HTTP method
        method: String,
        /// Endpoint path, relative to the base URL
        path: String,
        /// JSON body
        #[arg(short, long)]
        data: Option<String>,
        /// Per-call timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Send without credentials
        #[arg(long)]
        public: bool,
    },
}

/// Settings of the API client itself
#[derive(Clone, Debug, PartialEq)]
pub struct ClientSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub auth_timeout: Duration,
    pub renewal_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            auth_timeout: Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS),
            renewal_timeout: Duration::from_millis(DEFAULT_REFRESH_TIMEOUT_MS),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientSettings {
    /// Settings for a base URL with default timeouts
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub client: ClientSettings,
    pub credentials_db: PathBuf,
    pub log_level: String,
    pub command: Command,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let credentials_db = match args.credentials_db {
            Some(path) => expand_tilde(&path),
            None => default_credentials_db()
                .context("Cannot locate a data directory, set CREDENTIALS_DB")?,
        };

        let connect_timeout = std::env::var("HTTP_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        Ok(Config {
            client: ClientSettings {
                base_url: args.base_url,
                request_timeout: Duration::from_millis(args.request_timeout_ms),
                auth_timeout: Duration::from_millis(args.auth_timeout_ms),
                renewal_timeout: Duration::from_millis(args.refresh_timeout_ms),
                connect_timeout: Duration::from_secs(connect_timeout),
            },
            credentials_db,
            log_level: args.log_level,
            command: args.command,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base_url = &self.client.base_url;
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("API_BASE_URL must be an http(s) URL: {}", base_url);
        }

        let timeouts = [
            ("REQUEST_TIMEOUT_MS", self.client.request_timeout),
            ("AUTH_TIMEOUT_MS", self.client.auth_timeout),
            ("REFRESH_TIMEOUT_MS", self.client.renewal_timeout),
        ];
        for (name, timeout) in timeouts {
            if timeout.is_zero() {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }

        Ok(())
    }
}

/// `<data dir>/marketplace-client/credentials.sqlite3`
fn default_credentials_db() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("marketplace-client").join("credentials.sqlite3"))
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
