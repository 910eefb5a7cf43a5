//! Unified error types for Chorus

use std::time::Duration;

use thiserror::Error;

/// Unified error type for all Chorus operations
#[derive(Error, Debug)]
pub enum ChorusError {
    // Protocol errors
    #[error("Invalid {message_type} payload: {}", errors.join("; "))]
    Validation {
        message_type: String,
        errors: Vec<String>,
    },

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    // Execution errors
    #[error("Phase '{phase}' is missing output of dependency '{dependency}'")]
    Dependency { phase: String, dependency: String },

    #[error("Agent {agent} failed in phase '{phase}': {message}")]
    AgentExecution {
        agent: String,
        phase: String,
        message: String,
    },

    #[error("Orchestration timed out after {0:?}")]
    OrchestrationTimeout(Duration),

    #[error("Dependency cycle detected among {total} agents")]
    CycleDetected { total: usize },

    // Model errors
    #[error("Invalid dependency graph: {0}")]
    InvalidGraph(String),

    #[error("Invalid coordination strategy: {0}")]
    InvalidStrategy(String),

    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using ChorusError
pub type Result<T> = std::result::Result<T, ChorusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_joins_errors() {
        let err = ChorusError::Validation {
            message_type: "PhaseCompleted".to_string(),
            errors: vec![
                "Missing required field: success".to_string(),
                "Missing required field: timestamp".to_string(),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Invalid PhaseCompleted payload: Missing required field: success; Missing required field: timestamp"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ChorusError = io.into();
        assert!(matches!(err, ChorusError::Io(_)));
    }
}
