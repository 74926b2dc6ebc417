//! Error types for the runtime placer

use std::time::Duration;
use thiserror::Error;

/// Result type for placer operations
pub type Result<T> = std::result::Result<T, PlacerError>;

/// Placer error types
#[derive(Debug, Error)]
pub enum PlacerError {
    /// Invalid operator input (bad coordinate triple, missing flag or file)
    #[error("Setup error: {0}")]
    Setup(String),

    /// Socket could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// No reply within the command window
    #[error("Command timed out after {0:?}")]
    CommandTimeout(Duration),

    /// Reply received but not parseable per the wire grammar
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Engine rejected a spawn command
    #[error("Spawn error: {0}")]
    Spawn(String),

    /// Engine rejected a transform update, or the object is unknown
    #[error("Update error: {0}")]
    Update(String),

    /// Command issued while no connection is open
    #[error("Not connected")]
    NotConnected,

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),
}

impl PlacerError {
    /// Whether this error means the wire is unusable and a reconnect is needed
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            PlacerError::Connection(_) | PlacerError::CommandTimeout(_) | PlacerError::NotConnected
        )
    }

    /// Process exit code reported by the CLI for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            PlacerError::Setup(_) => exit_codes::SETUP,
            PlacerError::Connection(_)
            | PlacerError::CommandTimeout(_)
            | PlacerError::NotConnected => exit_codes::CONNECTION,
            PlacerError::Protocol(_)
            | PlacerError::Spawn(_)
            | PlacerError::Update(_)
            | PlacerError::InvalidState(_) => exit_codes::PROTOCOL,
        }
    }
}

/// Process exit codes for the placer CLI
pub mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const SETUP: u8 = 1;
    pub const CONNECTION: u8 = 2;
    pub const PROTOCOL: u8 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_classification() {
        assert!(PlacerError::Connection("reset".into()).is_connection_loss());
        assert!(PlacerError::CommandTimeout(Duration::from_secs(1)).is_connection_loss());
        assert!(PlacerError::NotConnected.is_connection_loss());
        assert!(!PlacerError::Protocol("garbage".into()).is_connection_loss());
        assert!(!PlacerError::Spawn("no class".into()).is_connection_loss());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(PlacerError::Setup("x".into()).exit_code(), 1);
        assert_eq!(PlacerError::Connection("x".into()).exit_code(), 2);
        assert_eq!(PlacerError::Spawn("x".into()).exit_code(), 3);
        assert_ne!(exit_codes::CONNECTION, exit_codes::SETUP);
    }
}
