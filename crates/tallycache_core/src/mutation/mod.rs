//! Validated, locked mutations with cache write-through.

mod orchestrator;
mod request;
mod validate;

pub use orchestrator::MutationOrchestrator;
pub use request::{EntityRequest, EntityUpdate, MutationReport, MutationWarning, TransactionRequest};
