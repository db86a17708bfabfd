//! Protocol error types

use thiserror::Error;

/// Wire-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Byte count does not match the fixed size of the structure
    #[error("Malformed message: expected {expected} bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    /// Bus id does not fit the fixed-width wire field
    #[error("Invalid bus id {busid:?}: {reason}")]
    InvalidBusId { busid: String, reason: &'static str },

    /// I/O error while moving a structure over a link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_display() {
        let err = ProtocolError::Malformed {
            expected: 312,
            actual: 300,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Malformed message"));
        assert!(msg.contains("312"));
        assert!(msg.contains("300"));
    }

    #[test]
    fn test_invalid_busid_display() {
        let err = ProtocolError::InvalidBusId {
            busid: String::new(),
            reason: "empty",
        };
        assert!(format!("{}", err).contains("empty"));
    }
}
