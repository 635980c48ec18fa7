//! Recording mock ledger for batcher tests.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Mutex,
};

use async_trait::async_trait;
use sigil_attestation::{AttestationError, Ledger};

/// One anchored batch as seen by the mock ledger.
#[derive(Debug, Clone)]
pub struct AnchoredBatch {
    /// Merkle root of the batch.
    pub root: [u8; 32],

    /// Declared leaf count.
    pub count: u32,

    /// Ordered leaves as submitted.
    pub leaves: Vec<[u8; 32]>,

    /// Transaction reference handed back.
    pub tx: String,
}

/// In-memory ledger that records anchors and can simulate outages.
#[derive(Debug, Default)]
pub struct MockLedger {
    anchored: Mutex<Vec<AnchoredBatch>>,
    sequence: AtomicU64,
    failing: AtomicBool,
}

impl MockLedger {
    /// Creates an empty, healthy mock ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until restored.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Batches anchored so far, in order.
    pub fn anchored(&self) -> Vec<AnchoredBatch> {
        self.anchored.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn anchor_batch(
        &self,
        root: [u8; 32],
        count: u32,
        leaves: &[[u8; 32]],
    ) -> Result<String, AttestationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AttestationError::ledger("simulated outage"));
        }

        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        let tx = format!("0xmocktx{n:04}");

        self.anchored.lock().unwrap_or_else(|p| p.into_inner()).push(AnchoredBatch {
            root,
            count,
            leaves: leaves.to_vec(),
            tx: tx.clone(),
        });

        Ok(tx)
    }

    async fn lookup(&self, digest: [u8; 32]) -> Result<bool, AttestationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AttestationError::ledger("simulated outage"));
        }

        let anchored = self.anchored.lock().unwrap_or_else(|p| p.into_inner());
        Ok(anchored.iter().any(|batch| batch.leaves.contains(&digest)))
    }
}
