//! Error types for the quest pipeline.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Response shape error: {0}")]
    ResponseShape(#[from] ResponseShapeError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl Error {
    /// True for upstream network/HTTP failures, as opposed to configuration
    /// or model-output problems.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Llm(_))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Model registry is empty")]
    EmptyRegistry,

    #[error("No client configured for provider {provider}")]
    MissingProviderClient { provider: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Model output that could not be turned into a JSON object or array.
#[derive(Debug, thiserror::Error)]
pub enum ResponseShapeError {
    #[error("Could not parse model output as JSON: {reason}")]
    Malformed { reason: String, cleaned: String },

    #[error("Model output parsed to a {kind}, expected an object or array")]
    InvalidShape { kind: &'static str },
}

impl ResponseShapeError {
    /// The cleaned text that failed to parse, if any.
    pub fn cleaned(&self) -> Option<&str> {
        match self {
            Self::Malformed { cleaned, .. } => Some(cleaned),
            Self::InvalidShape { .. } => None,
        }
    }
}

/// Job queue errors.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue {name} is closed")]
    Closed { name: String },

    #[error("Unknown queue: {name}")]
    UnknownQueue { name: String },

    #[error("Invalid payload on queue {name}: {reason}")]
    InvalidPayload { name: String, reason: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
