//! Run state tracked by the step executor

use crate::error::{FailureKind, OrchestratorError};
use crate::route::StepKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Run lifecycle: `idle -> planning -> executing(i) -> {succeeded | failed}`,
/// plus `cancelled` from any non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planning,
    Executing { step: usize },
    Succeeded,
    Failed { step: Option<usize>, kind: FailureKind },
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Planning => "planning",
            RunState::Executing { .. } => "executing",
            RunState::Succeeded => "succeeded",
            RunState::Failed { .. } => "failed",
            RunState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed { .. } | RunState::Cancelled
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Executing { step } => write!(f, "executing({})", step),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Pending => "pending",
            StepOutcome::InProgress => "in_progress",
            StepOutcome::Succeeded => "succeeded",
            StepOutcome::Failed => "failed",
        }
    }
}

/// Transaction submitted by a completed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub step_index: usize,
    pub kind: StepKind,
    pub tx_ref: String,
}

/// Progress of one run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionState {
    pub run_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub state: RunState,
    pub current_step: usize,
    pub outcomes: Vec<StepOutcome>,
    pub last_error: Option<OrchestratorError>,
    pub tx_refs: Vec<TxRecord>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            plan_id: None,
            state: RunState::Idle,
            current_step: 0,
            outcomes: Vec::new(),
            last_error: None,
            tx_refs: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn begin(&mut self, plan_id: Uuid, steps: usize) {
        self.plan_id = Some(plan_id);
        self.state = RunState::Planning;
        self.outcomes = vec![StepOutcome::Pending; steps];
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn enter_step(&mut self, index: usize) {
        self.state = RunState::Executing { step: index };
        self.current_step = index;
        self.outcomes[index] = StepOutcome::InProgress;
    }

    pub(crate) fn complete_step(&mut self, index: usize, kind: StepKind, tx_ref: String) {
        self.outcomes[index] = StepOutcome::Succeeded;
        self.tx_refs.push(TxRecord {
            step_index: index,
            kind,
            tx_ref,
        });
    }

    pub(crate) fn fail(&mut self, step: Option<usize>, error: OrchestratorError) {
        if let Some(index) = step {
            self.outcomes[index] = StepOutcome::Failed;
        }
        self.state = RunState::Failed {
            step,
            kind: error.kind(),
        };
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self, state: RunState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.state {
            RunState::Failed { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}
