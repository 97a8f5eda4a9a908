//! Component wiring from [`Settings`]
//!
//! Signer providers are supplied by the embedding host; families without a
//! provider simply have no session manager, and runs touching them are
//! rejected by the executor before any state change.

use crate::api::AppState;
use crate::chain::{
    AccountIndexer, AxelarscanTracker, BridgeTracker, LcdAccountIndexer, TokenRegistry,
};
use crate::config::{ExecutorConfig, Settings};
use crate::coordination::StepExecutor;
use crate::route::{FeeEstimator, RoutePlanner, StaticFeeEstimator, UserLimits};
use crate::session::{open_store, ConnectionSessionManager, SessionRegistry, SignerProvider};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub struct Orchestrator {
    pub registry: Arc<TokenRegistry>,
    pub planner: Arc<RoutePlanner>,
    pub estimator: Arc<dyn FeeEstimator>,
    pub sessions: Arc<SessionRegistry>,
    /// Shared by every executor so totals span runs
    pub limits: Arc<UserLimits>,
    indexer: Arc<dyn AccountIndexer>,
    tracker: Arc<dyn BridgeTracker>,
    executor_config: ExecutorConfig,
}

impl Orchestrator {
    pub fn from_settings(
        settings: &Settings,
        providers: Vec<Arc<dyn SignerProvider>>,
    ) -> Result<Self> {
        let indexer = LcdAccountIndexer::new(&settings.indexers)
            .context("Failed to build account indexer client")?;
        let tracker = AxelarscanTracker::new(&settings.bridge)
            .context("Failed to build bridge tracker client")?;
        Self::with_clients(settings, providers, Arc::new(indexer), Arc::new(tracker))
    }

    /// Same as [`Orchestrator::from_settings`] with caller-supplied chain clients
    pub fn with_clients(
        settings: &Settings,
        providers: Vec<Arc<dyn SignerProvider>>,
        indexer: Arc<dyn AccountIndexer>,
        tracker: Arc<dyn BridgeTracker>,
    ) -> Result<Self> {
        let registry = Arc::new(settings.token_registry()?);
        info!("Registry loaded with {} tokens", registry.tokens().len());

        let planner = Arc::new(RoutePlanner::new(registry.clone(), settings.planner.clone()));
        let estimator: Arc<dyn FeeEstimator> =
            Arc::new(StaticFeeEstimator::new(settings.planner.fees.clone()));
        let limits = Arc::new(UserLimits::new(settings.planner.max_user_total));

        // One store per manager; each only ever touches its own family's entry
        let sessions = Arc::new(SessionRegistry::new());
        for provider in providers {
            let store = open_store(&settings.sessions);
            sessions.register(ConnectionSessionManager::new(
                provider,
                store,
                &settings.sessions,
            ));
        }

        Ok(Self {
            registry,
            planner,
            estimator,
            sessions,
            limits,
            indexer,
            tracker,
            executor_config: settings.executor.clone(),
        })
    }

    /// Fresh executor for one plan; executors never run a second plan
    pub fn executor(&self) -> StepExecutor {
        StepExecutor::new(
            self.sessions.clone(),
            self.registry.clone(),
            self.indexer.clone(),
            self.tracker.clone(),
            self.executor_config.clone(),
        )
        .with_limits(self.limits.clone())
    }

    pub fn api_state(&self) -> AppState {
        AppState {
            planner: self.planner.clone(),
            estimator: self.estimator.clone(),
            limits: self.limits.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::indexer::MockAccountIndexer;
    use crate::chain::relay::MockBridgeTracker;
    use crate::chain::RelayStatus;
    use crate::config::StoreBackend;
    use crate::coordination::RunState;
    use crate::error::OrchestratorError;
    use crate::session::ProtocolFamily;
    use crate::test_utils::{dec, ScriptedSignerProvider};

    fn memory_settings() -> Settings {
        let mut settings = Settings::default();
        settings.sessions.store = StoreBackend::Memory;
        settings
    }

    #[tokio::test]
    async fn test_registers_one_manager_per_provider() {
        let providers: Vec<Arc<dyn SignerProvider>> = vec![
            Arc::new(ScriptedSignerProvider::new(ProtocolFamily::PairingUri)),
            Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension)),
        ];
        let orchestrator = Orchestrator::with_clients(
            &memory_settings(),
            providers,
            Arc::new(MockAccountIndexer::new()),
            Arc::new(MockBridgeTracker::new()),
        )
        .unwrap();

        assert!(orchestrator.sessions.contains(ProtocolFamily::PairingUri));
        assert!(orchestrator.sessions.contains(ProtocolFamily::Extension));
        assert_eq!(orchestrator.executor().run_state().await, RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limits_span_executors() {
        let mut settings = memory_settings();
        settings.planner.max_user_total = Some(dec("150"));
        let providers: Vec<Arc<dyn SignerProvider>> = vec![
            Arc::new(ScriptedSignerProvider::new(ProtocolFamily::PairingUri)),
            Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension)),
        ];
        let mut indexer = MockAccountIndexer::new();
        indexer.expect_is_indexed().returning(|_, _| Ok(true));
        let mut tracker = MockBridgeTracker::new();
        tracker
            .expect_relay_status()
            .returning(|_| Ok(RelayStatus::Executed));
        let orchestrator = Orchestrator::with_clients(
            &settings,
            providers,
            Arc::new(indexer),
            Arc::new(tracker),
        )
        .unwrap();
        let plan = || {
            orchestrator
                .planner
                .plan_symbols("stkATOM", "TFUEL", dec("100"))
                .unwrap()
        };

        let first = orchestrator.executor().start(plan()).await.unwrap();
        assert_eq!(first.state, RunState::Succeeded);

        let second = orchestrator.executor().start(plan()).await.unwrap();
        assert!(matches!(
            second.last_error,
            Some(OrchestratorError::LimitExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_without_providers_runs_are_rejected() {
        let orchestrator = Orchestrator::with_clients(
            &memory_settings(),
            Vec::new(),
            Arc::new(MockAccountIndexer::new()),
            Arc::new(MockBridgeTracker::new()),
        )
        .unwrap();

        let plan = orchestrator
            .planner
            .plan_symbols("TFUEL", "stkATOM", dec("10"))
            .unwrap();
        let err = orchestrator.executor().start(plan).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::NoSessionManager { .. }));
    }
}
