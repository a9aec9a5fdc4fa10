// Renewal coordinator
// Collapses concurrent renewal demands into a single refresh round-trip

use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use super::credentials::CredentialStore;
use super::refresh;
use super::types::RenewalError;

/// Default ceiling for the refresh round-trip
pub const DEFAULT_RENEWAL_TIMEOUT: Duration = Duration::from_secs(10);

type Outcome = Result<String, RenewalError>;

/// Shared renewal state. `waiters` is only non-empty while `renewing` is set.
#[derive(Default)]
struct State {
    renewing: bool,
    waiters: Vec<oneshot::Sender<Outcome>>,
    episodes: u64,
}

struct Inner {
    state: Mutex<State>,
    credentials: Arc<CredentialStore>,
    client: Client,
    base_url: String,
    timeout: Duration,
}

/// Guarantees at most one in-flight credential renewal.
///
/// The first caller that needs a new token starts an episode on a spawned
/// task; every caller arriving while it runs waits on the same outcome.
/// The episode never depends on any single caller staying alive.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

impl RenewalCoordinator {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        credentials: Arc<CredentialStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                credentials,
                client,
                base_url: base_url.into(),
                timeout,
            }),
        }
    }

    /// Get a fresh access token, joining the running episode if there is one
    pub async fn renew(&self) -> Result<String, RenewalError> {
        self.renew_after(None).await
    }

    /// Like [`renew`](Self::renew), for a caller that was rejected with
    /// `stale_token`. If an episode settled since that token was read, the
    /// token it stored is returned without another round-trip.
    pub async fn renew_after(&self, stale_token: Option<&str>) -> Result<String, RenewalError> {
        let (tx, rx) = oneshot::channel();

        let start_episode = {
            let mut state = self.inner.state.lock();

            if !state.renewing {
                if let (Some(stale), Some(current)) =
                    (stale_token, self.inner.credentials.access_token())
                {
                    if stale != current {
                        tracing::debug!("Access token already renewed, skipping refresh");
                        return Ok(current);
                    }
                }
            }

            state.waiters.push(tx);
            if state.renewing {
                false
            } else {
                state.renewing = true;
                state.episodes += 1;
                true
            }
        };

        if start_episode {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                inner.run_episode().await;
            });
        } else {
            tracing::debug!("Renewal already in progress, waiting for its outcome");
        }

        rx.await.unwrap_or(Err(RenewalError::Aborted))
    }

    /// Whether an episode is currently running
    pub fn is_renewing(&self) -> bool {
        self.inner.state.lock().renewing
    }

    /// Number of callers waiting on the running episode
    pub fn waiting(&self) -> usize {
        self.inner.state.lock().waiters.len()
    }

    /// Number of episodes started since construction
    pub fn episodes(&self) -> u64 {
        self.inner.state.lock().episodes
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.inner.credentials
    }
}

impl Inner {
    async fn run_episode(self: Arc<Self>) {
        let mut guard = EpisodeGuard {
            inner: &self,
            renewal_token: None,
            settled: false,
        };

        tracing::info!("Refreshing access token...");
        guard.renewal_token = self.credentials.renewal_token();
        let outcome = self.exchange(guard.renewal_token.as_deref()).await;

        match &outcome {
            Ok(token) => tracing::info!(
                "Access token refreshed (token: {}...)",
                token.chars().take(8).collect::<String>()
            ),
            Err(e) => tracing::error!(error = %e, "Token refresh failed"),
        }

        guard.settle(outcome);
    }

    async fn exchange(&self, renewal_token: Option<&str>) -> Outcome {
        let renewal_token = renewal_token.ok_or(RenewalError::MissingRenewalToken)?;

        refresh::request_new_token(&self.client, &self.base_url, renewal_token, self.timeout)
            .await
    }

    /// Apply the outcome to the session it was computed for, reset the state
    /// and wake every waiter.
    /// A session replaced or cleared mid-episode is left untouched.
    fn settle(&self, renewal_token: Option<&str>, outcome: Outcome) {
        let waiters = {
            let mut state = self.state.lock();

            let applied = match &outcome {
                Ok(token) => renewal_token.is_some_and(|renewal| {
                    self.credentials.set_access_if_renewal(renewal, token)
                }),
                Err(_) => self.credentials.clear_if_renewal(renewal_token),
            };

            if !applied {
                tracing::debug!("Session changed during renewal, credentials left as they are");
            } else if outcome.is_err() {
                tracing::warn!("Credentials cleared after failed renewal");
            }

            state.renewing = false;
            std::mem::take(&mut state.waiters)
        };

        tracing::debug!(waiters = waiters.len(), "Settling renewal waiters");

        for waiter in waiters {
            // A waiter whose caller went away has nothing to receive
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Settles the episode as aborted if the task ends without settling
struct EpisodeGuard<'a> {
    inner: &'a Inner,
    /// Renewal token the episode exchanged, identifies its session
    renewal_token: Option<String>,
    settled: bool,
}

impl EpisodeGuard<'_> {
    fn settle(&mut self, outcome: Outcome) {
        self.settled = true;
        self.inner.settle(self.renewal_token.as_deref(), outcome);
    }
}

impl Drop for EpisodeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Renewal episode ended without an outcome");
            self.inner
                .settle(self.renewal_token.as_deref(), Err(RenewalError::Aborted));
        }
    }
}
