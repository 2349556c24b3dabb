//! # Error Types
//!
//! One error enum covers every per-command failure the storage engine can
//! produce. Handlers map each variant onto its wire encoding at the reply
//! boundary; the variants here stay transport-agnostic.

use thiserror::Error;

/// Result alias used across the workspace.
pub type LkvResult<T> = Result<T, LkvError>;

/// Failure kinds surfaced by storage and command handling.
///
/// Per-command failures never abort the process; they travel up as one of
/// these and become an error reply.
#[derive(Debug, Error)]
pub enum LkvError {
    /// Key absent from the keyspace.
    #[error("no such key")]
    NotFound,
    /// The stored value kind does not admit this operation.
    #[error("operation to a key holding wrong type of value")]
    WrongType,
    /// Operand is not a canonical signed 64-bit decimal.
    #[error("index or value is not an integer")]
    NotAnInteger,
    /// Signed 64-bit arithmetic would wrap.
    #[error("integer overflow")]
    Overflow,
    /// List index beyond bounds on a write.
    #[error("index out of range")]
    OutOfRange,
    /// Wrong number of arguments for a verb.
    #[error("incorrect number of arguments for {0} command")]
    Syntax(&'static str),
    /// Verb not present in the dispatch table.
    #[error("unsupported command")]
    UnknownCommand,
    /// Verb is registered but has no implementation.
    #[error("command not supported yet")]
    NotSupported,
    /// Allocation or invariant failure.
    #[error("failed")]
    Internal,
    /// Filesystem or socket failure during persistence.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_match_wire_text() {
        assert_eq!(LkvError::Overflow.to_string(), "integer overflow");
        assert_eq!(LkvError::OutOfRange.to_string(), "index out of range");
        assert_eq!(LkvError::UnknownCommand.to_string(), "unsupported command");
        assert_eq!(
            LkvError::Syntax("hset").to_string(),
            "incorrect number of arguments for hset command"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: LkvError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, LkvError::Io(_)));
    }
}
