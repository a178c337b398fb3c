//! Error types for GroundQL.
//!
//! All errors in GroundQL are strongly typed using thiserror.
//! Sub-query failures are converted into `success: false` entries by the
//! execution engine; these types only escape the crate for batch-level
//! problems (malformed input, configuration) and drafter failures.

use chrono::NaiveDate;
use thiserror::Error;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// More sub-queries than the batch cap allows.
    #[error("Batch holds {actual} sub-queries, maximum is {max}")]
    BatchTooLarge {
        /// Sub-queries submitted.
        actual: usize,
        /// Configured cap.
        max: usize,
    },

    /// A batch with no sub-queries.
    #[error("Batch is empty")]
    EmptyBatch,

    /// Two sub-queries share an id.
    #[error("Duplicate sub-query id '{id}'")]
    DuplicateId {
        /// The repeated id.
        id: String,
    },

    /// A required field is empty.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A text field is too long.
    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        /// Field name.
        field: String,
        /// Maximum accepted length.
        max_length: usize,
    },

    /// An explicit range ending before it starts.
    #[error("Invalid date range: start ({start}) must not be after end ({end})")]
    InvalidDateRange {
        /// First day.
        start: NaiveDate,
        /// Last day.
        end: NaiveDate,
    },

    /// A search limit of zero or above the configured maximum.
    #[error("Limit {limit} is out of range [1, {max}]")]
    LimitOutOfRange {
        /// Requested limit.
        limit: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A configuration value that cannot work.
    #[error("Invalid configuration '{field}': {reason}")]
    InvalidConfig {
        /// Dotted configuration path.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Execution errors that occur while running a single sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// No schema matches the entity name.
    #[error("Unknown entity '{name}'")]
    UnknownEntity {
        /// Name as given.
        name: String,
    },

    /// The operation lacks something it needs, such as a group-by field.
    #[error("Operation '{operation}' requires {requirement}")]
    UnsupportedOperation {
        /// Operation name.
        operation: String,
        /// What is missing.
        requirement: String,
    },

    /// The data service did not answer in time.
    #[error("Data service call timed out after {duration_ms}ms")]
    Timeout {
        /// Configured timeout.
        duration_ms: u64,
    },

    /// The data service answered with an error.
    #[error("Data service error: {0}")]
    Service(#[from] ServiceError),
}

/// Errors reported by a data-service backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Transport-level failure.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        /// Transport error text.
        message: String,
    },

    /// The service rejected the call.
    #[error("Remote fault (code {code}): {message}")]
    RemoteFault {
        /// Remote error code.
        code: i64,
        /// Remote error text.
        message: String,
    },

    /// The reply did not have the expected shape.
    #[error("Malformed response: {message}")]
    MalformedResponse {
        /// What could not be decoded.
        message: String,
    },

    /// The service does not know the model.
    #[error("Unknown model '{model}'")]
    UnknownModel {
        /// Model name.
        model: String,
    },
}

/// Errors reported by the answer-drafting capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrafterError {
    /// The model could not be reached or refused the request.
    #[error("Drafter unavailable: {message}")]
    Unavailable {
        /// Provider error text.
        message: String,
    },

    /// Tool arguments that do not describe a batch.
    #[error("Malformed tool invocation: {message}")]
    MalformedToolCall {
        /// Decoding error text.
        message: String,
    },

    /// The drafter kept calling tools past the round limit.
    #[error("Tool round limit of {limit} reached without a final answer")]
    RoundLimit {
        /// Configured round limit.
        limit: usize,
    },
}

/// Top-level error type for GroundQL.
#[derive(Debug, Error)]
pub enum GroundError {
    /// Rejected input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A failure while executing.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// The drafter failed.
    #[error("Drafter error: {0}")]
    Drafter(#[from] DrafterError),

    /// Anything else, such as an unreadable configuration file.
    #[error("Internal error: {message}")]
    Internal {
        /// Error text.
        message: String,
    },
}

impl From<ServiceError> for GroundError {
    fn from(err: ServiceError) -> Self {
        Self::Execution(ExecutionError::Service(err))
    }
}

impl GroundError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a drafter error.
    #[must_use]
    pub const fn is_drafter(&self) -> bool {
        matches!(self, Self::Drafter(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Internal { .. } => false,
            Self::Execution(e) => e.is_retryable(),
            Self::Drafter(e) => matches!(e, DrafterError::Unavailable { .. }),
        }
    }
}

impl ExecutionError {
    /// Returns true if retrying the same sub-query may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Service(e) => match e {
                ServiceError::ConnectionFailed { .. } => true,
                ServiceError::RemoteFault { code, .. } => *code >= 500,
                _ => false,
            },
            Self::UnknownEntity { .. } | Self::UnsupportedOperation { .. } => false,
        }
    }
}

/// Result type alias for GroundQL operations.
pub type GroundResult<T> = Result<T, GroundError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_batch_too_large() {
        let err = ValidationError::BatchTooLarge { actual: 7, max: 5 };
        let msg = format!("{err}");
        assert!(msg.contains('7'));
        assert!(msg.contains("maximum is 5"));
    }

    #[test]
    fn test_validation_error_date_range() {
        let start = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let err = ValidationError::InvalidDateRange { start, end };
        assert!(format!("{err}").contains("Invalid date range"));
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout { duration_ms: 5000 };
        let msg = format!("{err}");
        assert!(msg.contains("5000ms"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_service_error_wraps_into_execution() {
        let err: GroundError = ServiceError::ConnectionFailed {
            message: "refused".to_string(),
        }
        .into();
        assert!(err.is_execution());
        assert!(err.is_retryable());
        assert!(format!("{err}").contains("refused"));
    }

    #[test]
    fn test_remote_fault_retryable_only_for_server_codes() {
        let client = ExecutionError::Service(ServiceError::RemoteFault {
            code: 400,
            message: "bad domain".to_string(),
        });
        let server = ExecutionError::Service(ServiceError::RemoteFault {
            code: 503,
            message: "busy".to_string(),
        });
        assert!(!client.is_retryable());
        assert!(server.is_retryable());
    }

    #[test]
    fn test_ground_error_from_validation() {
        let err: GroundError = ValidationError::EmptyBatch.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_ground_error_from_drafter() {
        let err: GroundError = DrafterError::Unavailable {
            message: "rate limited".to_string(),
        }
        .into();
        assert!(err.is_drafter());
        assert!(err.is_retryable());

        let err: GroundError = DrafterError::RoundLimit { limit: 3 }.into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_ground_error_internal() {
        let err = GroundError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
