//! HTTP request handlers.

pub mod health;
pub mod issue;
pub mod rules;
pub mod verify;

pub use health::{health_check, liveness_check, readiness_check};
pub use issue::issue_proof;
pub use rules::{archive_rule, create_rule, get_rule, update_rule};
pub use verify::verify_proof;
