use anyhow::{Context, Result};
use dialoguer::Password;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

use marketplace_client::auth::{CredentialStore, SqliteStorage};
use marketplace_client::config::{Command, Config};
use marketplace_client::{ApiClient, ClientError, Registration, RequestOptions, SessionApi};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("API base URL: {}", config.client.base_url);

    let storage = SqliteStorage::open(&config.credentials_db)?;
    let credentials = Arc::new(CredentialStore::new(Arc::new(storage)));
    let client = ApiClient::new(&config.client, credentials)?;

    match run(&client, config.command.clone()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(ClientError::AuthExpired) = e.downcast_ref::<ClientError>() {
                eprintln!("Session expired. Run `marketplace-client login` to sign in again.");
            }
            Err(e)
        }
    }
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    let session = SessionApi::new(client);

    match command {
        Command::Login { email, password } => {
            let email = match email {
                Some(email) => email,
                None => dialoguer::Input::<String>::new()
                    .with_prompt("Email")
                    .interact_text()
                    .context("Failed to read email")?,
            };
            let password = prompt_password(password)?;

            session.login(&email, &password).await?;
            println!("✅ Logged in as {}", email);
        }

        Command::Register {
            name,
            email,
            password,
            role,
        } => {
            let registration = Registration {
                name,
                email,
                password: prompt_password(password)?,
                role,
                phone: None,
            };

            session.register(&registration).await?;
            println!("✅ Registered {}", registration.email);
        }

        Command::Logout => {
            session.logout().await;
            println!("👋 Logged out");
        }

        Command::Status => {
            if session.is_authenticated() {
                println!("Logged in ({})", client.base_url());
            } else {
                println!("Not logged in");
            }
        }

        Command::Request {
            method,
            path,
            data,
            timeout_ms,
            public,
        } => {
            let method: Method = method
                .to_uppercase()
                .parse()
                .with_context(|| format!("Invalid HTTP method: {}", method))?;

            let mut options = RequestOptions::new(method);
            if let Some(data) = data {
                let body = serde_json::from_str(&data).context("--data must be valid JSON")?;
                options = options.json(body);
            }
            if let Some(timeout_ms) = timeout_ms {
                options = options.timeout(Duration::from_millis(timeout_ms));
            }
            if public {
                options = options.public();
            }

            let response = client.call(&path, options).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

fn prompt_password(password: Option<String>) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => Password::new()
            .with_prompt("Password")
            .interact()
            .context("Failed to read password"),
    }
}
