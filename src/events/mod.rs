//! Event types published to the presentation layer
//!
//! Session events come from the connection session managers; run events come
//! from the step executor. Both are delivered over `broadcast` channels with no
//! replay for late subscribers.

use crate::chain::ChainId;
use crate::error::FailureKind;
use crate::metrics;
use crate::session::ProtocolFamily;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Session lifecycle notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Pairing URI ready to be shown to the user (pairing-URI families only)
    UriAvailable { family: ProtocolFamily, uri: String },

    Connected {
        family: ProtocolFamily,
        chain_id: ChainId,
        account: String,
    },

    Disconnected { family: ProtocolFamily },

    ChainChanged {
        family: ProtocolFamily,
        chain_id: ChainId,
    },
}

impl SessionEvent {
    pub fn family(&self) -> ProtocolFamily {
        match self {
            SessionEvent::UriAvailable { family, .. } => *family,
            SessionEvent::Connected { family, .. } => *family,
            SessionEvent::Disconnected { family } => *family,
            SessionEvent::ChainChanged { family, .. } => *family,
        }
    }

    /// Event name used as the metrics label
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::UriAvailable { .. } => "uri_available",
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::Disconnected { .. } => "disconnected",
            SessionEvent::ChainChanged { .. } => "chain_changed",
        }
    }
}

/// Count the event and broadcast it. Nobody listening is fine.
pub(crate) fn publish_session_event(sender: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    metrics::record_session_event(event.family().as_str(), event.name());
    let _ = sender.send(event);
}

/// Run status reported alongside each run event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventStatus {
    Planning,
    StepStarted,
    /// Waiting on an externally observed condition
    Waiting,
    StepSucceeded,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEventStatus::Planning => "planning",
            RunEventStatus::StepStarted => "step_started",
            RunEventStatus::Waiting => "waiting",
            RunEventStatus::StepSucceeded => "step_succeeded",
            RunEventStatus::Succeeded => "succeeded",
            RunEventStatus::Failed => "failed",
            RunEventStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEventStatus::Succeeded | RunEventStatus::Failed | RunEventStatus::Cancelled
        )
    }
}

/// Presentation stream record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub step_index: Option<usize>,
    pub status: RunEventStatus,
    pub message: String,
    pub eta_seconds: Option<u64>,
    /// Set on failed terminal events
    pub failure: Option<FailureKind>,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn new(run_id: Uuid, status: RunEventStatus, message: impl Into<String>) -> Self {
        Self {
            run_id,
            step_index: None,
            status,
            message: message.into(),
            eta_seconds: None,
            failure: None,
            timestamp: Utc::now(),
        }
    }

    pub fn at_step(mut self, index: usize) -> Self {
        self.step_index = Some(index);
        self
    }

    pub fn with_eta(mut self, eta_seconds: u64) -> Self {
        self.eta_seconds = Some(eta_seconds);
        self
    }

    pub fn with_failure(mut self, kind: FailureKind) -> Self {
        self.failure = Some(kind);
        self
    }
}
