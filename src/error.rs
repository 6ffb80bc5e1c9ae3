//! Error types for the weft platform

use std::io;

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Platform errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown transformation operator
    #[error("Unknown operator: {0}")]
    UnknownOperator(String),

    /// Operator received an argument it cannot work with
    #[error("Invalid argument for operator '{operator}': {message}")]
    InvalidOperatorArgument {
        /// Operator name
        operator: String,
        /// What was wrong with the argument
        message: String,
    },

    /// Script definition has no name
    #[error("Script definition is missing a name")]
    MissingName,

    /// Script definition has no steps
    #[error("Script '{0}' has no steps")]
    MissingSteps(String),

    /// Jump target does not exist in the script
    #[error("Script '{script}' has no label '{label}'")]
    UnknownLabel {
        /// Script name
        script: String,
        /// Missing label
        label: String,
    },

    /// Script executed more steps than its budget allows
    #[error("Script '{script}' exceeded its budget of {budget} steps")]
    StepBudgetExceeded {
        /// Script name
        script: String,
        /// Configured maximum
        budget: u64,
    },

    /// Script activation rejected because one is already running
    #[error("Script '{0}' is already running")]
    ConcurrentRun(String),

    /// Query string could not be parsed
    #[error("Query parse error: {0}")]
    ParseError(String),

    /// Query referenced an entity no model provides
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Model does not support the requested operation
    #[error("Entity '{entity}' does not support operation '{operation}'")]
    UnsupportedOperation {
        /// Entity name
        entity: String,
        /// Requested operation
        operation: String,
    },

    /// Query requested a field the model does not declare
    #[error("Entity '{entity}' has no field '{field}'")]
    UnknownField {
        /// Entity name
        entity: String,
        /// Missing field
        field: String,
    },

    /// Access predicate rejected the operation
    #[error("Permission denied on '{entity}' for operation '{operation}'")]
    PermissionDenied {
        /// Entity name
        entity: String,
        /// Rejected operation
        operation: String,
        /// Field, when the denial is field-level
        field: Option<String>,
    },

    /// Token request carried an unusable grant
    #[error("Invalid grant: {0}")]
    InvalidGrant(String),

    /// Username/password or token did not check out
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Cron expression could not be parsed
    #[error("Invalid schedule: {0}")]
    Schedule(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Outbound HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidOperatorArgument`]
    pub fn invalid_argument(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOperatorArgument {
            operator: operator.into(),
            message: message.into(),
        }
    }

    /// HTTP status code this error surfaces as at the boundary
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::PermissionDenied { .. } => 403,
            Self::InvalidCredentials => 401,
            Self::InvalidGrant(_)
            | Self::ParseError(_)
            | Self::UnknownEntity(_)
            | Self::UnsupportedOperation { .. }
            | Self::UnknownField { .. }
            | Self::UnknownOperator(_)
            | Self::InvalidOperatorArgument { .. } => 400,
            _ => 500,
        }
    }
}
