//! Attestation pipeline: canonical encoding, Keccak-256 digests,
//! secp256k1 signing, envelope encryption, and Merkle batching.
//!
//! The issuer coordinates one atomic step per attestation; the batcher
//! aggregates committed proofs into ledger-anchored Merkle batches.

#![warn(missing_docs)]

pub mod batcher;
pub mod canonical;
pub mod digest;
pub mod envelope;
pub mod error;
pub mod issuer;
pub mod ledger;
pub mod merkle;
pub mod signing;

pub use batcher::{BatchConfig, BatchService, BatchSummary};
pub use canonical::{canonicalize, ProofPayload, PAYLOAD_VERSION};
pub use envelope::EnvelopeCipher;
pub use error::{AttestationError, Result};
pub use issuer::{CryptoMaterials, IssuedProof, IssuerService};
pub use ledger::{HttpLedger, Ledger};
pub use merkle::{verify_inclusion, MerkleTree, MAX_BATCH_LEAVES};
pub use signing::{recover_verifying_key, CompactSignature, ProofSigner};
