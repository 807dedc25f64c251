use thiserror::Error;
use uuid::Uuid;

/// Result type for saga operations
pub type Result<T> = std::result::Result<T, SagaError>;

/// Saga subsystem error types
#[derive(Error, Debug)]
pub enum SagaError {
    /// The stored revision no longer matches the loaded one
    #[error(
        "Optimistic concurrency conflict on saga {id}: expected revision {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    /// A correlation property value is already claimed by another saga
    #[error(
        "Correlation conflict: {data_type}.{property} = {value} already belongs to another saga"
    )]
    CorrelationConflict {
        data_type: String,
        property: String,
        value: String,
    },

    /// The saga being updated or deleted does not exist
    #[error("Saga {id} not found")]
    NotFound { id: Uuid },

    /// Lock acquisition was cancelled by shutdown
    #[error("Saga lock acquisition was cancelled")]
    LockCancelled,

    /// Persistence failed
    #[error("Saga storage error: {message}")]
    Storage { message: String },
}

impl SagaError {
    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether redelivering the triggering message may resolve this error
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::ConcurrencyConflict { .. }
            | SagaError::CorrelationConflict { .. }
            | SagaError::Storage { .. } => true,
            SagaError::NotFound { .. } | SagaError::LockCancelled => false,
        }
    }
}

impl From<SagaError> for carrier_core::Error {
    fn from(error: SagaError) -> Self {
        carrier_core::Error::saga(error.to_string())
    }
}
