//! QueryRouter: authenticate, ask the relay, normalize the answer.

use std::sync::Arc;

use tracing::debug;

use crate::auth::AuthGate;
use crate::control::ControlClient;
use crate::error::Result;
use crate::normalize::{self, Normalized, RouterStatus, Value};

#[derive(Clone)]
pub struct QueryRouter {
    auth: AuthGate,
    client: Arc<dyn ControlClient>,
}

impl QueryRouter {
    #[must_use]
    pub fn new(auth: AuthGate, client: Arc<dyn ControlClient>) -> Self {
        Self { auth, client }
    }

    /// Run one GETINFO query and normalize the reply by the key's kind.
    pub async fn query(&self, key: &str) -> Result<Normalized> {
        self.auth.ensure_authenticated().await?;
        let raw = self.client.get_info(key).await?;
        debug!(query = key, bytes = raw.len(), "GETINFO reply");
        Ok(normalize::normalize(key, &raw)?)
    }

    /// Query a key whose reply is a single field value.
    pub async fn query_value(&self, key: &str) -> Result<Value> {
        Ok(self.query(key).await?.into_value(key)?)
    }

    /// Router status entry for `fingerprint` (`ns/id/<fingerprint>`).
    pub async fn router_status(&self, fingerprint: &str) -> Result<RouterStatus> {
        let key = format!("ns/id/{fingerprint}");
        Ok(self.query(&key).await?.into_router_status(&key)?)
    }
}

impl std::fmt::Debug for QueryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRouter")
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}
