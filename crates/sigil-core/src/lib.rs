//! Core domain models, rule engine, and storage layer.
//!
//! Provides strongly-typed domain primitives, the condition evaluation
//! engine, the error taxonomy, and repository-based database access for
//! the attestation service. All other crates depend on these foundational
//! types for type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod rules;
pub mod storage;
pub mod time;

pub use error::{CoreError, ErrorCode, Result, SigilError};
pub use models::{
    Agent, AgentId, AgentStatus, Batch, BatchId, Principal, PrincipalId, Proof, ProofId, Rule,
    RuleId, RuleStatus,
};
pub use rules::{Condition, ConditionResult, Evaluation, Operator};
pub use time::Clock;
