//! Generic status poller
//!
//! Repeatedly evaluates an async predicate on a fixed interval until it
//! reports success, the attempt budget runs out, or the task is cancelled.
//! Every polling loop in the orchestrator (destination-account activation,
//! bridge relay delivery, signer pairing approval, transaction indexing) goes
//! through this one primitive.

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::metrics;

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval and attempt budget for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Lower bound for the advertised ETA
    pub eta_floor: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            eta_floor: Duration::ZERO,
        }
    }

    pub fn with_eta_floor(mut self, floor: Duration) -> Self {
        self.eta_floor = floor;
        self
    }

    /// Authoritative timeout for the task
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Remaining time estimate after `attempts` unsuccessful checks
    pub fn eta(&self, attempts: u32) -> Duration {
        let remaining = self.interval * self.max_attempts.saturating_sub(attempts);
        remaining.max(self.eta_floor)
    }
}

/// Destination-account activation: 5s x 60, ETA never below 10s
impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 60).with_eta_floor(Duration::from_secs(10))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Running,
    Succeeded,
    TimedOut,
    Cancelled,
    /// Predicate returned a non-retryable error
    Failed(String),
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Running => "running",
            PollStatus::Succeeded => "succeeded",
            PollStatus::TimedOut => "timed_out",
            PollStatus::Cancelled => "cancelled",
            PollStatus::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollStatus::Running)
    }
}

/// Snapshot published after every check
#[derive(Debug, Clone, PartialEq)]
pub struct PollProgress {
    pub attempts: u32,
    pub max_attempts: u32,
    pub eta: Duration,
    pub status: PollStatus,
}

/// Terminal result of a poll, keeping the predicate error when it failed
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded,
    TimedOut,
    Cancelled,
    Failed(OrchestratorError),
}

impl PollOutcome {
    fn status(&self) -> PollStatus {
        match self {
            PollOutcome::Succeeded => PollStatus::Succeeded,
            PollOutcome::TimedOut => PollStatus::TimedOut,
            PollOutcome::Cancelled => PollStatus::Cancelled,
            PollOutcome::Failed(e) => PollStatus::Failed(e.to_string()),
        }
    }
}

/// Cancellation handle, cloneable across tasks
#[derive(Debug, Clone)]
pub struct PollControl {
    cancel_tx: Arc<watch::Sender<bool>>,
}

impl PollControl {
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }
}

/// A running poll
pub struct PollTask {
    label: String,
    config: PollConfig,
    started_at: Instant,
    control: PollControl,
    progress: watch::Receiver<PollProgress>,
    handle: JoinHandle<PollOutcome>,
}

impl PollTask {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn control(&self) -> PollControl {
        self.control.clone()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Subscribe to progress snapshots
    pub fn progress(&self) -> watch::Receiver<PollProgress> {
        self.progress.clone()
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> PollOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => PollOutcome::Failed(OrchestratorError::Internal(format!(
                "Poll task {} aborted: {}",
                self.label, e
            ))),
        }
    }
}

/// Spawns poll tasks with a fixed configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusPoller {
    config: PollConfig,
}

impl StatusPoller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// Start polling `predicate`. The first check happens one full interval
    /// after the call.
    pub fn spawn<F, Fut>(&self, label: impl Into<String>, predicate: F) -> PollTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = OrchestratorResult<bool>> + Send + 'static,
    {
        let label = label.into();
        let config = self.config;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(PollProgress {
            attempts: 0,
            max_attempts: config.max_attempts,
            eta: config.eta(0),
            status: PollStatus::Running,
        });

        debug!(
            "Starting poll {} ({} x {:?})",
            label, config.max_attempts, config.interval
        );

        let handle = tokio::spawn(run_poll(
            label.clone(),
            config,
            predicate,
            cancel_rx,
            progress_tx,
        ));

        PollTask {
            label,
            config,
            started_at: Instant::now(),
            control: PollControl {
                cancel_tx: Arc::new(cancel_tx),
            },
            progress: progress_rx,
            handle,
        }
    }
}

async fn run_poll<F, Fut>(
    label: String,
    config: PollConfig,
    mut predicate: F,
    mut cancel_rx: watch::Receiver<bool>,
    progress_tx: watch::Sender<PollProgress>,
) -> PollOutcome
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = OrchestratorResult<bool>> + Send + 'static,
{
    let mut attempts = 0u32;

    let outcome = loop {
        if attempts >= config.max_attempts {
            break PollOutcome::TimedOut;
        }

        // A dropped control counts as cancellation: nobody is waiting anymore
        tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => break PollOutcome::Cancelled,
            _ = tokio::time::sleep(config.interval) => {}
        }

        attempts += 1;

        let result = tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => break PollOutcome::Cancelled,
            result = predicate() => result,
        };

        match result {
            Ok(true) => {
                if *cancel_rx.borrow() {
                    break PollOutcome::Cancelled;
                }
                break PollOutcome::Succeeded;
            }
            Ok(false) => {}
            Err(e) if e.is_retryable() => {
                warn!("Poll {} attempt {} failed: {}", label, attempts, e);
            }
            Err(e) => break PollOutcome::Failed(e),
        }

        progress_tx.send_replace(PollProgress {
            attempts,
            max_attempts: config.max_attempts,
            eta: config.eta(attempts),
            status: PollStatus::Running,
        });
    };

    let status = outcome.status();
    match &outcome {
        PollOutcome::Succeeded => info!("Poll {} succeeded after {} attempts", label, attempts),
        PollOutcome::Failed(e) => warn!("Poll {} failed: {}", label, e),
        _ => info!("Poll {} finished: {}", label, status.as_str()),
    }
    metrics::record_poll(&label, status.as_str(), attempts);

    progress_tx.send_replace(PollProgress {
        attempts,
        max_attempts: config.max_attempts,
        eta: if outcome == PollOutcome::Succeeded {
            Duration::ZERO
        } else {
            config.eta(attempts)
        },
        status,
    });

    outcome
}
