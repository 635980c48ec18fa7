//! External append-only ledger interface.
//!
//! The ledger is an opaque collaborator: the batcher hands it a Merkle
//! root with its ordered leaves and receives a transaction reference
//! back. Anchoring failures leave proofs unbatched; they are retried on
//! the next cycle.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    digest,
    error::{AttestationError, Result},
};

/// Append-only commitment store for batch roots.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Records a batch root with its ordered leaves, returning the
    /// ledger transaction reference.
    async fn anchor_batch(
        &self,
        root: [u8; 32],
        count: u32,
        leaves: &[[u8; 32]],
    ) -> Result<String>;

    /// Checks whether a digest has been anchored.
    async fn lookup(&self, digest: [u8; 32]) -> Result<bool>;
}

/// HTTP ledger client.
///
/// Speaks a minimal JSON protocol against the configured endpoint,
/// authenticating with the deployer key.
#[derive(Debug, Clone)]
pub struct HttpLedger {
    client: reqwest::Client,
    endpoint: String,
    deployer_key: String,
}

#[derive(Debug, Deserialize)]
struct AnchorResponse {
    tx: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    anchored: bool,
}

impl HttpLedger {
    /// Creates a client for the given endpoint and deployer key.
    pub fn new(endpoint: impl Into<String>, deployer_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            deployer_key: deployer_key.into(),
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn anchor_batch(
        &self,
        root: [u8; 32],
        count: u32,
        leaves: &[[u8; 32]],
    ) -> Result<String> {
        let body = json!({
            "root": digest::to_hex(&root),
            "count": count,
            "leaves": leaves.iter().map(digest::to_hex).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(format!("{}/anchor", self.endpoint))
            .bearer_auth(&self.deployer_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AttestationError::ledger(format!("anchor request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AttestationError::ledger(format!(
                "ledger rejected anchor with status {}",
                response.status()
            )));
        }

        let anchor: AnchorResponse = response
            .json()
            .await
            .map_err(|e| AttestationError::ledger(format!("malformed anchor response: {e}")))?;

        debug!(tx = %anchor.tx, count, "batch anchored on ledger");
        Ok(anchor.tx)
    }

    async fn lookup(&self, digest: [u8; 32]) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/lookup/{}", self.endpoint, digest::to_hex(&digest)))
            .send()
            .await
            .map_err(|e| AttestationError::ledger(format!("lookup request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AttestationError::ledger(format!(
                "ledger rejected lookup with status {}",
                response.status()
            )));
        }

        let lookup: LookupResponse = response
            .json()
            .await
            .map_err(|e| AttestationError::ledger(format!("malformed lookup response: {e}")))?;

        Ok(lookup.anchored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trailing_slash_is_normalized() {
        let ledger = HttpLedger::new("https://ledger.example.com/", "key");
        assert_eq!(ledger.endpoint, "https://ledger.example.com");
    }
}
