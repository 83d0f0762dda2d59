pub mod testing;

/// Main error type for the indexing queue
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    // ============ Processor Errors (P1xxx) ============
    /// A processor rejected one collapsed operation
    #[error("Processor '{processor}' failed to {kind} '{target}': {reason}")]
    ProcessorFailed {
        processor: String,
        kind: String,
        target: String,
        reason: String,
    },

    /// A processor failed to make its batch durable
    #[error("Processor '{processor}' failed to commit: {reason}")]
    CommitFailed {
        processor: String,
        reason: String,
    },

    /// Catalog backend rejected an operation
    #[error("Catalog '{catalog}' error: {reason}")]
    CatalogError {
        catalog: String,
        reason: String,
    },

    // ============ Queue State Errors (Q2xxx) ============
    /// The queue is already borrowed, e.g. a processor tried to enqueue while
    /// the queue was being flushed
    #[error("Index queue is busy ({context}); re-entrant queue access is not supported")]
    QueueBusy {
        context: String,
    },

    /// Persisted queue refers to an object that can no longer be found
    #[error("Cannot resolve queued target at path '{path}'")]
    TargetNotResolved {
        path: String,
    },

    /// Target has no physical path and cannot be persisted
    #[error("Target {target} has no physical path and cannot be persisted")]
    TargetNotAddressable {
        target: String,
    },

    // ============ Transaction Errors (T3xxx) ============
    /// Operation attempted on a transaction that is no longer active
    #[error("Transaction {txn_id} is not active (status: {status})")]
    TransactionInactive {
        txn_id: u64,
        status: String,
    },

    /// Savepoint belongs to a finished transaction or was invalidated by an
    /// earlier rollback
    #[error("Savepoint {savepoint_id} is no longer valid")]
    InvalidSavepoint {
        savepoint_id: usize,
    },

    // ============ I/O and System Errors (X9xxx) ============
    /// Serialization/deserialization failed
    #[error("Serialization error: {message}")]
    SerializationError {
        message: String,
    },

    /// Unsupported persisted format version
    #[error("Unsupported queue format version {found} (expected {expected})")]
    VersionMismatch {
        found: u32,
        expected: u32,
    },

    /// Configuration error (invalid environment value)
    #[error("Configuration error for '{setting}': {reason} (value: {value})")]
    ConfigError {
        setting: String,
        value: String,
        reason: String,
    },
}

impl QueueError {
    /// Stable code for this error, used in logs and by callers that need to
    /// branch on the failure class without matching every field
    pub fn code(&self) -> &'static str {
        use QueueError::*;
        match self {
            ProcessorFailed { .. } => "P1001",
            CommitFailed { .. } => "P1002",
            CatalogError { .. } => "P1003",

            QueueBusy { .. } => "Q2001",
            TargetNotResolved { .. } => "Q2002",
            TargetNotAddressable { .. } => "Q2003",

            TransactionInactive { .. } => "T3001",
            InvalidSavepoint { .. } => "T3002",

            SerializationError { .. } => "X9001",
            VersionMismatch { .. } => "X9002",
            ConfigError { .. } => "X9003",
        }
    }

    /// Whether the enclosing transaction must be aborted after this error
    pub fn is_fatal_for_transaction(&self) -> bool {
        matches!(
            self,
            QueueError::ProcessorFailed { .. }
                | QueueError::CommitFailed { .. }
                | QueueError::CatalogError { .. }
                | QueueError::QueueBusy { .. }
        )
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Convert serde_json::Error to QueueError
impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::SerializationError {
            message: format!("JSON serialization error: {e}"),
        }
    }
}

/// Convert bincode::Error to QueueError
impl From<bincode::Error> for QueueError {
    fn from(e: bincode::Error) -> Self {
        QueueError::SerializationError {
            message: format!("Binary serialization error: {e}"),
        }
    }
}

/// Convert std::io::Error to QueueError
impl From<std::io::Error> for QueueError {
    fn from(e: std::io::Error) -> Self {
        QueueError::SerializationError {
            message: format!("I/O error: {e}"),
        }
    }
}

/// Helper macro for requiring a value or returning error
#[macro_export]
macro_rules! require {
    ($opt:expr, $err:expr) => {
        match $opt {
            Some(v) => v,
            None => return Err($err),
        }
    };
}
