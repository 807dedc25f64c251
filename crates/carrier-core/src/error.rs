use thiserror::Error;

/// Shared error type for the Carrier service bus
#[derive(Error, Debug)]
pub enum Error {
    /// No destination mapping exists for a message type
    #[error("No destination mapping for message type '{message_type}'")]
    Routing { message_type: String },

    /// The bus was assembled with a missing or contradictory option
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A transport-level send or receive failed
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A message handler raised an error while processing
    #[error("Handler error: {message}")]
    Handler { message: String },

    /// A saga operation failed (lookup, persistence, or a conflict)
    #[error("Saga error: {message}")]
    Saga { message: String },

    /// An operation was attempted in a transaction-context state that
    /// forbids it
    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    /// A header carried a value that could not be interpreted
    #[error("Header error: {message}")]
    Header { message: String },

    /// A transaction callback failed
    #[error("Callback error: {message}")]
    Callback { message: String },

    /// Message body serialization or deserialization failed
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create a routing error for a message type without a destination
    pub fn routing(message_type: impl Into<String>) -> Self {
        Self::Routing {
            message_type: message_type.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a saga error
    pub fn saga(message: impl Into<String>) -> Self {
        Self::Saga {
            message: message.into(),
        }
    }

    /// Create an illegal-state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a header error
    pub fn header(message: impl Into<String>) -> Self {
        Self::Header {
            message: message.into(),
        }
    }

    /// Create a callback error
    pub fn callback(message: impl Into<String>) -> Self {
        Self::Callback {
            message: message.into(),
        }
    }

    /// Check whether redelivering the message may resolve this error
    pub fn is_retryable(&self) -> bool {
        match self {
            // Failures of the message itself or of downstream collaborators
            Error::Transport { .. }
            | Error::Handler { .. }
            | Error::Saga { .. }
            | Error::Callback { .. }
            | Error::Serialization { .. } => true,

            // Failures of the endpoint assembly; redelivery cannot help
            Error::Routing { .. }
            | Error::Configuration { .. }
            | Error::IllegalState { .. }
            | Error::Header { .. } => false,
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Error::Routing { .. } => "routing",
            Error::Configuration { .. } => "configuration",
            Error::Transport { .. } => "transport",
            Error::Handler { .. } => "handler",
            Error::Saga { .. } => "saga",
            Error::IllegalState { .. } => "illegal_state",
            Error::Header { .. } => "header",
            Error::Callback { .. } => "callback",
            Error::Serialization { .. } => "serialization",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;
