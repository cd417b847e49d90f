//! Error types for inbox-rules.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox service errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Mailbox request {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },

    #[error("Mailbox API returned {status} for {operation}: {body}")]
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response for {operation}: {reason}")]
    InvalidResponse { operation: String, reason: String },

    #[error("Label not found: {0}")]
    LabelNotFound(String),
}

impl MailboxError {
    pub fn request(operation: &str, e: impl std::fmt::Display) -> Self {
        Self::RequestFailed {
            operation: operation.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn invalid(operation: &str, e: impl std::fmt::Display) -> Self {
        Self::InvalidResponse {
            operation: operation.to_string(),
            reason: e.to_string(),
        }
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Decision oracle errors.
///
/// Always recoverable: callers fall back to the safe decision.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("LLM call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Invalid oracle response: {reason}")]
    InvalidResponse { reason: String, raw: String },
}

/// Rejected input to a rule management operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("Invalid domain format: {0}")]
    InvalidDomain(String),

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Rule must be {max} characters or less (got {len})")]
    RuleTooLong { len: usize, max: usize },

    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error("Label name is empty after sanitization: '{0}'")]
    EmptyLabel(String),

    #[error("Forward action requires a destination address")]
    MissingForwardTarget,

    #[error("Rule '{0}' has no {1}")]
    EmptyRule(String, &'static str),

    #[error("Message {0} has no body to reply to")]
    EmptyMessage(String),
}

/// Failure following an unsubscribe link.
#[derive(Debug, thiserror::Error)]
#[error("Unsubscribe request to {url} failed: {reason}")]
pub struct LinkError {
    pub url: String,
    pub reason: String,
}

/// Static rules file errors.
#[derive(Debug, thiserror::Error)]
pub enum RuleFileError {
    #[error("Failed to read rules file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write rules file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed rules file {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Rule '{name}' is invalid: {source}")]
    InvalidRule {
        name: String,
        source: ValidationError,
    },
}

/// Errors from rule management operations.
#[derive(Debug, thiserror::Error)]
pub enum ManageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    RuleFile(#[from] RuleFileError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}
