//! Step executor
//!
//! Drives one plan through its steps. Each step acquires a signer session
//! for its chain family, submits the signer call, and when completion is only
//! externally observable waits on a status poll. Failures are terminal; no
//! submitted step is ever reversed.

use super::state::{ExecutionState, RunState};
use crate::chain::{bridge_chain_name, AccountIndexer, BridgeTracker, ChainId, RelayStatus, TokenRegistry};
use crate::config::ExecutorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{RunEvent, RunEventStatus};
use crate::metrics;
use crate::poller::{PollConfig, PollControl, PollOutcome, StatusPoller};
use crate::route::{ChainRef, Plan, Step, StepKind, StepOwner, UserLimits};
use crate::session::{ConnectionSession, ProtocolFamily, SessionRegistry};

use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sessions held for the duration of a run, keyed by family
type HeldSessions = HashMap<ProtocolFamily, Arc<ConnectionSession>>;

/// Executes a single plan
pub struct StepExecutor {
    sessions: Arc<SessionRegistry>,
    registry: Arc<TokenRegistry>,
    indexer: Arc<dyn AccountIndexer>,
    tracker: Arc<dyn BridgeTracker>,
    config: ExecutorConfig,
    limits: Arc<UserLimits>,
    state: Arc<RwLock<ExecutionState>>,
    events: broadcast::Sender<RunEvent>,
    cancel_tx: watch::Sender<bool>,
    /// At most one poll is active per run
    active_poll: Mutex<Option<PollControl>>,
}

impl StepExecutor {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        registry: Arc<TokenRegistry>,
        indexer: Arc<dyn AccountIndexer>,
        tracker: Arc<dyn BridgeTracker>,
        config: ExecutorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            sessions,
            registry,
            indexer,
            tracker,
            config,
            limits: Arc::new(UserLimits::unlimited()),
            state: Arc::new(RwLock::new(ExecutionState::new())),
            events,
            cancel_tx,
            active_poll: Mutex::new(None),
        }
    }

    /// Enforce a cumulative allowance on the source signing account
    pub fn with_limits(mut self, limits: Arc<UserLimits>) -> Self {
        self.limits = limits;
        self
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub async fn snapshot(&self) -> ExecutionState {
        self.state.read().await.clone()
    }

    pub async fn run_state(&self) -> RunState {
        self.state.read().await.state
    }

    /// Execute `plan` to completion.
    ///
    /// Caller errors (executor not idle, no session manager for a family) are
    /// returned directly. Everything after that ends in a terminal state that
    /// is both returned and published on the event stream.
    pub async fn start(&self, plan: Plan) -> OrchestratorResult<ExecutionState> {
        let run_id = {
            let mut state = self.state.write().await;
            if state.state != RunState::Idle {
                return Err(OrchestratorError::InvalidState {
                    expected: RunState::Idle.to_string(),
                    found: state.state.to_string(),
                });
            }
            self.sessions.for_chain(plan.source.family)?;
            self.sessions.for_chain(plan.destination.family)?;

            state.begin(plan.id, plan.steps.len());
            state.run_id
        };

        info!(
            "Run {} started: {} {} -> {} in {} steps",
            run_id,
            plan.amount,
            plan.source.symbol,
            plan.destination.symbol,
            plan.steps.len()
        );
        self.emit(
            RunEvent::new(run_id, RunEventStatus::Planning, "Preparing route")
                .with_eta(plan.estimated_seconds),
        );

        let result = self.run_steps(run_id, &plan).await;
        self.finalize(run_id, result).await
    }

    /// Cancel the run from any task. Stops the in-flight poll; steps already
    /// submitted are left as they are.
    pub async fn cancel(&self) -> bool {
        let run_id = {
            let mut state = self.state.write().await;
            if state.state.is_terminal() {
                return false;
            }
            state.finish(RunState::Cancelled);
            state.run_id
        };

        self.cancel_tx.send_replace(true);
        if let Some(control) = self.active_poll.lock().await.as_ref() {
            control.cancel();
        }

        info!("Run {} cancelled", run_id);
        metrics::record_run("cancelled");
        self.emit(RunEvent::new(run_id, RunEventStatus::Cancelled, "Run cancelled"));
        true
    }

    async fn run_steps(&self, run_id: Uuid, plan: &Plan) -> Result<(), (Option<usize>, OrchestratorError)> {
        let mut held = HeldSessions::new();

        let account = if self.limits.is_enabled() {
            Some(self.check_allowance(plan, &mut held).await.map_err(|e| (None, e))?)
        } else {
            None
        };

        for (index, step) in plan.steps.iter().enumerate() {
            if *self.cancel_tx.borrow() {
                return Err((Some(index), OrchestratorError::Cancelled));
            }

            {
                let mut state = self.state.write().await;
                if state.state == RunState::Cancelled {
                    return Err((Some(index), OrchestratorError::Cancelled));
                }
                state.enter_step(index);
            }

            let remaining: u64 = plan.steps[index..].iter().map(|s| s.estimated_seconds).sum();
            self.emit(
                RunEvent::new(run_id, RunEventStatus::StepStarted, step.description.clone())
                    .at_step(index)
                    .with_eta(remaining),
            );

            let started = Instant::now();
            let tx_ref = self
                .cancellable(self.execute_step(run_id, index, step, plan, &mut held))
                .await
                .map_err(|e| {
                    metrics::record_step(step.kind.as_str(), "failed", started.elapsed());
                    (Some(index), e)
                })?;
            metrics::record_step(step.kind.as_str(), "succeeded", started.elapsed());

            {
                let mut state = self.state.write().await;
                if state.state == RunState::Cancelled {
                    return Err((Some(index), OrchestratorError::Cancelled));
                }
                state.complete_step(index, step.kind, tx_ref.clone());
            }

            info!("Run {} step {} ({}) done: {}", run_id, index, step.kind, tx_ref);
            self.emit(
                RunEvent::new(
                    run_id,
                    RunEventStatus::StepSucceeded,
                    format!("{} complete ({})", step.kind, tx_ref),
                )
                .at_step(index),
            );
        }

        if let Some(account) = account {
            self.limits.record(&account, plan.amount);
        }
        Ok(())
    }

    /// Connect the source side and check its account's remaining allowance
    async fn check_allowance(
        &self,
        plan: &Plan,
        held: &mut HeldSessions,
    ) -> OrchestratorResult<String> {
        let source = ChainRef {
            family: plan.source.family,
            chain_id: plan.source.chain_id.clone(),
        };
        let account = self
            .cancellable(self.session_for(&source, held))
            .await?
            .account();
        if let Some(remaining) = self.limits.check(&account, plan.amount)? {
            info!(
                "Account {} has {} left after this run",
                account, remaining
            );
        }
        Ok(account)
    }

    async fn finalize(
        &self,
        run_id: Uuid,
        result: Result<(), (Option<usize>, OrchestratorError)>,
    ) -> OrchestratorResult<ExecutionState> {
        let mut state = self.state.write().await;

        // cancel() already moved the run to its terminal state
        if state.state == RunState::Cancelled {
            return Ok(state.clone());
        }

        match result {
            Ok(()) => {
                state.finish(RunState::Succeeded);
                info!("Run {} succeeded", run_id);
                metrics::record_run("succeeded");
                self.emit(RunEvent::new(run_id, RunEventStatus::Succeeded, "Route complete"));
            }
            Err((step, e)) => {
                error!("Run {} failed at step {:?}: {}", run_id, step, e);
                let kind = e.kind();
                let message = e.to_string();
                state.fail(step, e);
                metrics::record_run("failed");

                let mut event =
                    RunEvent::new(run_id, RunEventStatus::Failed, message).with_failure(kind);
                if let Some(index) = step {
                    event = event.at_step(index);
                }
                self.emit(event);
            }
        }

        Ok(state.clone())
    }

    async fn execute_step(
        &self,
        run_id: Uuid,
        index: usize,
        step: &Step,
        plan: &Plan,
        held: &mut HeldSessions,
    ) -> OrchestratorResult<String> {
        match (&step.kind, &step.owner) {
            (StepKind::BridgeTransfer, StepOwner::Bridge { source, destination }) => {
                self.execute_bridge(run_id, index, step, plan, source, destination, held)
                    .await
            }
            (StepKind::BridgeTransfer, StepOwner::Chain(_)) => Err(OrchestratorError::Internal(
                "bridge step without a bridge owner".to_string(),
            )),
            (kind, _) => {
                let chain = step.signing_chain();
                let session = self.session_for(chain, held).await?;
                let method = signer_method(*kind);
                let params = json!({
                    "chain_id": chain.chain_id,
                    "from": session.account(),
                    "input": step.input,
                    "output": step.output,
                    "source_amount": plan.amount.to_string(),
                    "source_symbol": plan.source.symbol,
                });

                let result = session.request(method, params).await?;
                let tx_ref = extract_tx_ref(method, &result)?;
                debug!("Step {} submitted {} on {}: {}", index, method, chain.chain_id, tx_ref);

                let delayed = self.registry.chain(&chain.chain_id)?.delayed_indexing;
                if delayed && matches!(kind, StepKind::Stake | StepKind::Unstake) {
                    self.await_indexing(run_id, index, &chain.chain_id, &tx_ref)
                        .await?;
                }

                Ok(tx_ref)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_bridge(
        &self,
        run_id: Uuid,
        index: usize,
        step: &Step,
        plan: &Plan,
        source: &ChainRef,
        destination: &ChainRef,
        held: &mut HeldSessions,
    ) -> OrchestratorResult<String> {
        let sender = self.session_for(source, held).await?;
        let recipient = self.session_for(destination, held).await?.account();

        let params = json!({
            "source_chain": bridge_chain_name(&source.chain_id),
            "destination_chain": bridge_chain_name(&destination.chain_id),
            "asset": step.input,
            "from": sender.account(),
            "recipient": recipient,
            "source_amount": plan.amount.to_string(),
            "source_symbol": plan.source.symbol,
        });

        let method = signer_method(StepKind::BridgeTransfer);
        let result = sender.request(method, params).await?;
        let tx_ref = extract_tx_ref(method, &result)?;
        info!(
            "Bridge transfer {} -> {} submitted: {}",
            source.chain_id, destination.chain_id, tx_ref
        );

        self.await_relay(run_id, index, &tx_ref).await?;

        if destination.family.requires_activation() {
            self.await_activation(run_id, index, &destination.chain_id, &recipient)
                .await?;
        }

        Ok(tx_ref)
    }

    /// Reuse the run's session for a family, connecting on first use. A
    /// session lost mid-run is not replaced.
    async fn session_for(
        &self,
        chain: &ChainRef,
        held: &mut HeldSessions,
    ) -> OrchestratorResult<Arc<ConnectionSession>> {
        let family = ProtocolFamily::for_chain(chain.family);
        if let Some(session) = held.get(&family) {
            return Ok(session.clone());
        }

        let session = self
            .sessions
            .get(family)?
            .connect(&chain.chain_id, false)
            .await?;
        held.insert(family, session.clone());
        Ok(session)
    }

    async fn await_relay(&self, run_id: Uuid, index: usize, tx_ref: &str) -> OrchestratorResult<()> {
        let tracker = self.tracker.clone();
        let tx = tx_ref.to_string();
        let outcome = self
            .poll(run_id, index, "relay_delivery", self.config.relay_poll(), move || {
                let tracker = tracker.clone();
                let tx = tx.clone();
                async move {
                    match tracker.relay_status(&tx).await? {
                        RelayStatus::Executed => Ok(true),
                        RelayStatus::Failed { reason } => {
                            Err(OrchestratorError::RelayFailed { tx_ref: tx, reason })
                        }
                        RelayStatus::Pending | RelayStatus::Confirmed => Ok(false),
                    }
                }
            })
            .await;

        poll_result(outcome, || OrchestratorError::Timeout {
            operation: format!("bridge relay delivery of {}", tx_ref),
        })
    }

    async fn await_activation(
        &self,
        run_id: Uuid,
        index: usize,
        chain_id: &ChainId,
        address: &str,
    ) -> OrchestratorResult<()> {
        let indexer = self.indexer.clone();
        let chain = chain_id.clone();
        let account = address.to_string();
        let outcome = self
            .poll(run_id, index, "account_activation", self.config.activation_poll(), move || {
                let indexer = indexer.clone();
                let chain = chain.clone();
                let account = account.clone();
                async move { indexer.account_exists(&chain, &account).await }
            })
            .await;

        poll_result(outcome, || OrchestratorError::AccountNotActivated {
            chain_id: chain_id.to_string(),
            address: address.to_string(),
        })
    }

    async fn await_indexing(
        &self,
        run_id: Uuid,
        index: usize,
        chain_id: &ChainId,
        tx_ref: &str,
    ) -> OrchestratorResult<()> {
        let indexer = self.indexer.clone();
        let chain = chain_id.clone();
        let tx = tx_ref.to_string();
        let outcome = self
            .poll(run_id, index, "tx_indexing", self.config.indexing_poll(), move || {
                let indexer = indexer.clone();
                let chain = chain.clone();
                let tx = tx.clone();
                async move { indexer.is_indexed(&chain, &tx).await }
            })
            .await;

        poll_result(outcome, || OrchestratorError::Timeout {
            operation: format!("indexing of {} on {}", tx_ref, chain_id),
        })
    }

    /// Run one poll as the run's active poll, forwarding its ETA as events
    async fn poll<F, Fut>(
        &self,
        run_id: Uuid,
        index: usize,
        label: &'static str,
        config: PollConfig,
        predicate: F,
    ) -> PollOutcome
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = OrchestratorResult<bool>> + Send + 'static,
    {
        let task = StatusPoller::new(config).spawn(label, predicate);
        *self.active_poll.lock().await = Some(task.control());
        if *self.cancel_tx.borrow() {
            task.cancel();
        }

        let mut progress = task.progress();
        let message = poll_message(label);
        self.emit(
            RunEvent::new(run_id, RunEventStatus::Waiting, message)
                .at_step(index)
                .with_eta(progress.borrow().eta.as_secs()),
        );

        let forward = async {
            while progress.changed().await.is_ok() {
                let snapshot = progress.borrow().clone();
                if snapshot.status.is_terminal() {
                    break;
                }
                self.emit(
                    RunEvent::new(
                        run_id,
                        RunEventStatus::Waiting,
                        format!(
                            "{} ({}/{})",
                            message, snapshot.attempts, snapshot.max_attempts
                        ),
                    )
                    .at_step(index)
                    .with_eta(snapshot.eta.as_secs()),
                );
            }
        };

        let (outcome, ()) = tokio::join!(task.wait(), forward);
        *self.active_poll.lock().await = None;
        outcome
    }

    /// Race `fut` against cancellation
    async fn cancellable<T>(
        &self,
        fut: impl Future<Output = OrchestratorResult<T>>,
    ) -> OrchestratorResult<T> {
        let mut cancel_rx = self.cancel_tx.subscribe();
        tokio::select! {
            biased;
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => Err(OrchestratorError::Cancelled),
            result = fut => result,
        }
    }

    fn emit(&self, event: RunEvent) {
        debug!(
            "Run {} event {} step {:?}",
            event.run_id,
            event.status.as_str(),
            event.step_index
        );
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

fn signer_method(kind: StepKind) -> &'static str {
    match kind {
        StepKind::LocalSwap => "swap",
        StepKind::BridgeTransfer => "bridge_send",
        StepKind::Stake => "stake",
        StepKind::Unstake => "unstake",
    }
}

fn poll_message(label: &str) -> &'static str {
    match label {
        "relay_delivery" => "Waiting for bridge relay",
        "account_activation" => "Waiting for destination account activation",
        "tx_indexing" => "Waiting for transaction to be indexed",
        _ => "Waiting",
    }
}

/// Pull the transaction reference out of a signer result
fn extract_tx_ref(method: &str, result: &Value) -> OrchestratorResult<String> {
    let tx_ref = match result {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ["tx_hash", "txHash", "hash", "transactionHash"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str)),
        _ => None,
    };

    tx_ref
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| OrchestratorError::Signer {
            method: method.to_string(),
            message: format!("response carried no transaction reference: {}", result),
        })
}

fn poll_result(
    outcome: PollOutcome,
    on_timeout: impl FnOnce() -> OrchestratorError,
) -> OrchestratorResult<()> {
    match outcome {
        PollOutcome::Succeeded => Ok(()),
        PollOutcome::TimedOut => {
            let err = on_timeout();
            warn!("{}", err);
            Err(err)
        }
        PollOutcome::Cancelled => Err(OrchestratorError::Cancelled),
        PollOutcome::Failed(e) => Err(e),
    }
}
