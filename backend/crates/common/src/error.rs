use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProdsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("source system error: {0}")]
    Source(String),

    #[error("target system error: {0}")]
    Target(String),

    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },

    #[error("verification failed: {message} (expected {expected}, actual {actual})")]
    Verification {
        message: String,
        expected: String,
        actual: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProdsyncError {
    pub fn verification(
        message: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::Verification {
            message: message.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// A bounded wait ran out of time: the system was too slow, not wrong.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, Self::Verification { .. })
    }
}

pub type ProdsyncResult<T> = Result<T, ProdsyncError>;
