//! AuthGate: make sure the shared control session is authenticated.
//!
//! Consulted once per query rather than once per job, since the relay can
//! drop a session at any time. Authentication is retried under
//! [`RetryPolicy::tor_auth`]; once the budget is spent the call fails with
//! [`Error::AuthExhausted`] and the caller skips its tick.

use std::sync::Arc;

use tracing::debug;

use crate::control::{ControlClient, Credential};
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, with_retry_outcome};

#[derive(Clone)]
pub struct AuthGate {
    client: Arc<dyn ControlClient>,
    credential: Credential,
    policy: RetryPolicy,
}

impl AuthGate {
    #[must_use]
    pub fn new(client: Arc<dyn ControlClient>, credential: Credential) -> Self {
        Self::with_policy(client, credential, RetryPolicy::tor_auth())
    }

    #[must_use]
    pub fn with_policy(
        client: Arc<dyn ControlClient>,
        credential: Credential,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            credential,
            policy,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Authenticate, retrying with backoff until success or the attempt
    /// budget is exhausted.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        let outcome = with_retry_outcome(&self.policy, || {
            self.client.authenticate(&self.credential)
        })
        .await;

        match outcome.result {
            Ok(()) => {
                debug!(
                    attempts = outcome.attempts,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Control session authenticated"
                );
                Ok(())
            }
            Err(err) => Err(Error::AuthExhausted {
                attempts: outcome.attempts,
                last_error: err.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("credential", &self.credential)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
