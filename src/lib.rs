//! XFuel orchestrator - cross-chain swap coordination between Theta and Cosmos
//!
//! Plans routes between the two chain families, keeps remote-signer sessions
//! alive per protocol family, and drives each plan step by step while polling
//! bridge relays and account indexers.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod poller;
pub mod route;
pub mod session;

#[cfg(test)]
mod test_utils;

pub use error::{FailureKind, OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
