//! Remote-signer session management
//!
//! One [`ConnectionSessionManager`] exists per protocol family. Managers are
//! owned instances held in a [`SessionRegistry`]; nothing here is global.

pub mod manager;
pub mod signer;
pub mod store;

pub use manager::{ConnectionSession, ConnectionSessionManager};
pub use signer::{Handshake, HandshakeRequest, SignerError, SignerHandle, SignerProvider, UriSink};
pub use store::{open_store, FileSessionStore, MemorySessionStore, SessionArtifacts, SessionStore};

use crate::chain::ChainFamily;
use crate::error::{OrchestratorError, OrchestratorResult};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// Wire protocol used to reach a user's signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolFamily {
    /// Relay-based pairing, the user approves from a mobile wallet (Theta/EVM)
    PairingUri,
    /// Browser-extension style signer injected into the page (Cosmos)
    Extension,
}

impl ProtocolFamily {
    pub fn for_chain(family: ChainFamily) -> Self {
        match family {
            ChainFamily::Evm => ProtocolFamily::PairingUri,
            ChainFamily::Cosmos => ProtocolFamily::Extension,
        }
    }

    pub fn uses_pairing_uri(&self) -> bool {
        matches!(self, ProtocolFamily::PairingUri)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolFamily::PairingUri => "pairing_uri",
            ProtocolFamily::Extension => "extension",
        }
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Absent,
    Connecting,
    Active,
    Error,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Absent => "absent",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Error => "error",
            SessionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session managers keyed by protocol family
#[derive(Default)]
pub struct SessionRegistry {
    managers: DashMap<ProtocolFamily, ConnectionSessionManager>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manager, replacing any previous one for the same family
    pub fn register(&self, manager: ConnectionSessionManager) {
        let family = manager.family();
        if self.managers.insert(family, manager).is_some() {
            info!("Replaced session manager for {}", family);
        } else {
            info!("Registered session manager for {}", family);
        }
    }

    pub fn get(&self, family: ProtocolFamily) -> OrchestratorResult<ConnectionSessionManager> {
        self.managers
            .get(&family)
            .map(|m| m.value().clone())
            .ok_or(OrchestratorError::NoSessionManager { family })
    }

    /// Manager responsible for signing on a chain family
    pub fn for_chain(&self, family: ChainFamily) -> OrchestratorResult<ConnectionSessionManager> {
        self.get(ProtocolFamily::for_chain(family))
    }

    pub fn contains(&self, family: ProtocolFamily) -> bool {
        self.managers.contains_key(&family)
    }

    pub fn families(&self) -> Vec<ProtocolFamily> {
        self.managers.iter().map(|entry| *entry.key()).collect()
    }
}
