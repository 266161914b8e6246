//! Error types for Warden.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Catalog parse error: {0}")]
    CatalogParse(String),

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Remediation request not found: {0}")]
    RequestNotFound(String),

    #[error("Invalid transition: cannot {action} a request in state {state}")]
    InvalidTransition { action: &'static str, state: String },

    #[error("Auto-execution blocked: {0}")]
    UnsafeCommandBlocked(String),

    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    #[error("History corruption: {0}")]
    HistoryCorruption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WardenError {
    /// Short stable identifier, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            WardenError::CatalogParse(_) => "catalog_parse",
            WardenError::UnknownPattern(_) => "unknown_pattern",
            WardenError::RequestNotFound(_) => "request_not_found",
            WardenError::InvalidTransition { .. } => "invalid_transition",
            WardenError::UnsafeCommandBlocked(_) => "unsafe_command_blocked",
            WardenError::CommandExecution(_) => "command_execution",
            WardenError::HistoryCorruption(_) => "history_corruption",
            WardenError::Config(_) => "config",
            WardenError::Io(_) => "io",
            WardenError::Json(_) => "json",
        }
    }

    pub fn catalog(msg: impl Into<String>) -> Self {
        WardenError::CatalogParse(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
