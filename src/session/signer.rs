//! Signer capability consumed by the session manager
//!
//! A [`SignerProvider`] performs the protocol handshake for one family and
//! yields a [`SignerHandle`]; the handle carries signing requests for the
//! lifetime of the session.

use super::{ProtocolFamily, SessionArtifacts};
use crate::chain::ChainId;
use crate::events::{publish_session_event, SessionEvent};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Failures reported by a signer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignerError {
    /// The user declined in their wallet
    #[error("rejected: {0}")]
    Rejected(String),

    /// Transport or protocol failure
    #[error("protocol: {0}")]
    Protocol(String),

    /// The remote side dropped the session
    #[error("session disconnected")]
    Disconnected,
}

/// Live connection to a user's signer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignerHandle: Send + Sync {
    /// Chain the signer is currently pointed at
    fn chain_id(&self) -> ChainId;

    /// User account on that chain
    fn account(&self) -> String;

    /// Forward a signing/submission request; returns the signer's JSON result
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, SignerError>;

    /// Whether the user has approved the pairing
    async fn is_connected(&self) -> Result<bool, SignerError>;

    async fn disconnect(&self) -> Result<(), SignerError>;
}

/// Publishes pairing URIs while a handshake is in progress
#[derive(Clone)]
pub struct UriSink {
    family: ProtocolFamily,
    events: broadcast::Sender<SessionEvent>,
}

impl UriSink {
    pub(crate) fn new(family: ProtocolFamily, events: broadcast::Sender<SessionEvent>) -> Self {
        Self { family, events }
    }

    pub fn publish(&self, uri: &str) {
        debug!("Pairing URI available for {}", self.family);
        publish_session_event(
            &self.events,
            SessionEvent::UriAvailable {
                family: self.family,
                uri: uri.to_string(),
            },
        );
    }
}

/// Inputs to one handshake
pub struct HandshakeRequest {
    pub chain_id: ChainId,
    /// Artifacts restored from storage, if any survived the last purge
    pub restored: Option<SessionArtifacts>,
    /// Present only for pairing-URI families
    pub uri_sink: Option<UriSink>,
}

/// Result of a successful handshake
pub struct Handshake {
    pub handle: Arc<dyn SignerHandle>,
    /// Artifacts to persist for the next restore
    pub artifacts: SessionArtifacts,
}

/// Performs handshakes for one protocol family
#[async_trait]
pub trait SignerProvider: Send + Sync {
    fn family(&self) -> ProtocolFamily;

    async fn connect(&self, request: HandshakeRequest) -> Result<Handshake, SignerError>;
}
