//! Error types for the swap orchestrator

use crate::session::ProtocolFamily;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for the orchestrator
///
/// Errors are cloned into run reports and shared between concurrent
/// `connect()` callers, so every payload is owned and cheap to clone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("Invalid pair: {0}")]
    InvalidPair(String),

    #[error("Invalid state: expected {expected}, found {found}")]
    InvalidState { expected: String, found: String },

    #[error("Amount {amount} exceeds the {scope} limit of {limit}")]
    LimitExceeded {
        scope: &'static str,
        amount: String,
        limit: String,
    },

    #[error("Unknown token {0}")]
    UnknownToken(String),

    #[error("Chain {0} not found")]
    ChainNotFound(String),

    #[error("Request rejected by user: {0}")]
    UserRejected(String),

    #[error("Protocol error for {family} session: {message}")]
    Protocol {
        family: ProtocolFamily,
        message: String,
    },

    #[error("Session for {family} was lost")]
    SessionLost { family: ProtocolFamily },

    #[error("No session manager registered for {family}")]
    NoSessionManager { family: ProtocolFamily },

    #[error("Account {address} on {chain_id} was not activated")]
    AccountNotActivated { chain_id: String, address: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Signer call {method} failed: {message}")]
    Signer { method: String, message: String },

    #[error("Indexer error for chain {chain_id}: {message}")]
    Indexer { chain_id: String, message: String },

    #[error("Bridge relay error: {0}")]
    Relay(String),

    #[error("Bridge relay reported failure for {tx_ref}: {reason}")]
    RelayFailed { tx_ref: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Taxonomy carried by every failed terminal run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidPair,
    InvalidState,
    UserRejected,
    ProtocolError,
    SessionLost,
    AccountNotActivated,
    Timeout,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidPair => "invalid_pair",
            FailureKind::InvalidState => "invalid_state",
            FailureKind::UserRejected => "user_rejected",
            FailureKind::ProtocolError => "protocol_error",
            FailureKind::SessionLost => "session_lost",
            FailureKind::AccountNotActivated => "account_not_activated",
            FailureKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrchestratorError {
    /// Check if error is retryable
    ///
    /// Used by the status poller: a retryable predicate error counts as an
    /// unsuccessful attempt instead of ending the poll.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Indexer { .. }
                | OrchestratorError::Relay(_)
                | OrchestratorError::Timeout { .. }
        )
    }

    /// Check if the error was produced by caller input before any I/O
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::InvalidPair(_)
                | OrchestratorError::InvalidState { .. }
                | OrchestratorError::LimitExceeded { .. }
                | OrchestratorError::UnknownToken(_)
                | OrchestratorError::ChainNotFound(_)
        )
    }

    /// Classify into the run failure taxonomy
    pub fn kind(&self) -> FailureKind {
        match self {
            OrchestratorError::InvalidPair(_)
            | OrchestratorError::LimitExceeded { .. }
            | OrchestratorError::UnknownToken(_)
            | OrchestratorError::ChainNotFound(_) => FailureKind::InvalidPair,
            OrchestratorError::InvalidState { .. } | OrchestratorError::NoSessionManager { .. } => {
                FailureKind::InvalidState
            }
            OrchestratorError::UserRejected(_) => FailureKind::UserRejected,
            OrchestratorError::SessionLost { .. } => FailureKind::SessionLost,
            OrchestratorError::AccountNotActivated { .. } => FailureKind::AccountNotActivated,
            OrchestratorError::Timeout { .. } => FailureKind::Timeout,
            OrchestratorError::Protocol { .. }
            | OrchestratorError::Signer { .. }
            | OrchestratorError::Indexer { .. }
            | OrchestratorError::Relay(_)
            | OrchestratorError::RelayFailed { .. }
            | OrchestratorError::Storage(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Cancelled
            | OrchestratorError::Internal(_) => FailureKind::ProtocolError,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        OrchestratorError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        OrchestratorError::Storage(e.to_string())
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_distinct_from_protocol_error() {
        let rejected = OrchestratorError::UserRejected("declined".into());
        let protocol = OrchestratorError::Protocol {
            family: ProtocolFamily::PairingUri,
            message: "relay closed".into(),
        };
        assert_eq!(rejected.kind(), FailureKind::UserRejected);
        assert_eq!(protocol.kind(), FailureKind::ProtocolError);
        assert!(!rejected.is_retryable());
        assert!(!protocol.is_retryable());
    }

    #[test]
    fn test_poll_errors_are_retryable() {
        let err = OrchestratorError::Indexer {
            chain_id: "stride-1".into(),
            message: "503".into(),
        };
        assert!(err.is_retryable());
        assert!(!OrchestratorError::RelayFailed {
            tx_ref: "0xab".into(),
            reason: "error".into(),
        }
        .is_retryable());
    }

    #[test]
    fn test_caller_errors() {
        assert!(OrchestratorError::InvalidPair("same family".into()).is_caller_error());
        assert!(!OrchestratorError::Cancelled.is_caller_error());
        assert_eq!(
            OrchestratorError::AccountNotActivated {
                chain_id: "stride-1".into(),
                address: "stride1xyz".into(),
            }
            .kind()
            .as_str(),
            "account_not_activated"
        );
    }
}
