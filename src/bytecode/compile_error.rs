use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// A directive or unit header that cannot be parsed
    #[error("malformed format at offset {offset}: {reason}")]
    MalformedFormat { offset: usize, reason: String },

    /// A literal or jump displacement too large for its encoding
    #[error("value {value} out of range (limit {limit})")]
    OutOfRange { value: i64, limit: i64 },

    /// Code buffer full, or a directive left with no bytes to consume
    #[error("resource exhausted: {reason}")]
    ResourceExhausted { reason: String },
}

impl CompileError {
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        CompileError::MalformedFormat {
            offset,
            reason: reason.into(),
        }
    }

    pub fn out_of_range(value: i64, limit: i64) -> Self {
        CompileError::OutOfRange { value, limit }
    }

    pub fn exhausted(reason: impl Into<String>) -> Self {
        CompileError::ResourceExhausted {
            reason: reason.into(),
        }
    }
}
