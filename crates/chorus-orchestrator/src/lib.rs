//! # chorus-orchestrator
//!
//! Execution side of the Chorus coordination engine.
//!
//! This crate provides:
//! - The coordination protocol: message catalog, payload validation and
//!   constructors
//! - A shared state store with versioned entries, subscriptions, an event log
//!   and snapshot persistence
//! - The orchestration layer, which runs a sub-agent dependency graph layer by
//!   layer with bounded concurrency
//! - The `PhaseRunner` seam through which phases are actually executed

pub mod orchestrator;
pub mod policy;
pub mod protocol;
pub mod runner;
pub mod shared_state;

pub use orchestrator::{OrchestrationLayer, OrchestrationResult, OrchestratorConfig};
pub use policy::failure_escalates;
pub use protocol::{
    CompletionStatus, CoordinationMessage, CoordinationProtocol, FieldType, MessageSchema,
    MessageType, Severity, ValidationReport,
};
pub use runner::{EchoRunner, PhaseContext, PhaseOutput, PhaseRunner};
pub use shared_state::{
    SharedStateEntry, SharedStateManager, StateEvent, StateSnapshot, SubscriptionId,
};
