//! Connection session manager
//!
//! Owns the session lifecycle for one protocol family:
//! `absent -> connecting -> {active | error}`, `active -> closed` on
//! disconnect. Concurrent `connect()` calls share one in-flight handshake.
//! Consecutive protocol failures are counted per family; once the threshold
//! is reached the persisted artifacts are purged before the next handshake.

use super::signer::{Handshake, HandshakeRequest, SignerError, SignerHandle, SignerProvider, UriSink};
use super::store::{SessionArtifacts, SessionStore};
use super::{ProtocolFamily, SessionStatus};
use crate::chain::ChainId;
use crate::config::SessionConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::{publish_session_event, SessionEvent};
use crate::metrics;
use crate::poller::{PollOutcome, StatusPoller};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An established signer session
pub struct ConnectionSession {
    id: Uuid,
    family: ProtocolFamily,
    chain_id: RwLock<ChainId>,
    handle: Arc<dyn SignerHandle>,
    status: RwLock<SessionStatus>,
    connected_at: DateTime<Utc>,
}

impl ConnectionSession {
    fn new(family: ProtocolFamily, chain_id: ChainId, handle: Arc<dyn SignerHandle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            family,
            chain_id: RwLock::new(chain_id),
            handle,
            status: RwLock::new(SessionStatus::Active),
            connected_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    pub fn account(&self) -> String {
        self.handle.account()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub async fn chain_id(&self) -> ChainId {
        self.chain_id.read().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        *self.status.read().await
    }

    pub async fn is_active(&self) -> bool {
        self.status().await == SessionStatus::Active
    }

    /// Send a request through the signer. Fails with `SessionLost` once the
    /// session is no longer active.
    pub async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> OrchestratorResult<serde_json::Value> {
        if !self.is_active().await {
            return Err(OrchestratorError::SessionLost {
                family: self.family,
            });
        }

        debug!("Signer request {} via {} session {}", method, self.family, self.id);
        match self.handle.request(method, params).await {
            Ok(result) => Ok(result),
            Err(SignerError::Rejected(message)) => Err(OrchestratorError::UserRejected(message)),
            Err(SignerError::Protocol(message)) => Err(OrchestratorError::Signer {
                method: method.to_string(),
                message,
            }),
            Err(SignerError::Disconnected) => {
                *self.status.write().await = SessionStatus::Error;
                Err(OrchestratorError::SessionLost {
                    family: self.family,
                })
            }
        }
    }

    async fn set_chain(&self, chain_id: ChainId) {
        *self.chain_id.write().await = chain_id;
    }

    async fn close(&self) {
        *self.status.write().await = SessionStatus::Closed;
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("ConnectionSession");
        out.field("id", &self.id).field("family", &self.family);
        match self.status.try_read() {
            Ok(status) => out.field("status", &*status),
            Err(_) => out.field("status", &"<locked>"),
        };
        out.finish_non_exhaustive()
    }
}

type InflightConnect = Shared<BoxFuture<'static, OrchestratorResult<Arc<ConnectionSession>>>>;

struct ManagerState {
    status: SessionStatus,
    current: Option<Arc<ConnectionSession>>,
    consecutive_failures: u32,
    inflight: Option<InflightConnect>,
    /// Bumped by disconnect so a handshake that outlives it is discarded
    generation: u64,
}

/// Session manager for one protocol family
#[derive(Clone)]
pub struct ConnectionSessionManager {
    family: ProtocolFamily,
    provider: Arc<dyn SignerProvider>,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    state: Arc<Mutex<ManagerState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ConnectionSessionManager {
    pub fn new(
        provider: Arc<dyn SignerProvider>,
        store: Arc<dyn SessionStore>,
        config: &SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            family: provider.family(),
            provider,
            store,
            config: config.clone(),
            state: Arc::new(Mutex::new(ManagerState {
                status: SessionStatus::Absent,
                current: None,
                consecutive_failures: 0,
                inflight: None,
                generation: 0,
            })),
            events,
        }
    }

    pub fn family(&self) -> ProtocolFamily {
        self.family
    }

    /// Subscribe to session events. Events sent before subscribing are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    pub async fn current(&self) -> Option<Arc<ConnectionSession>> {
        self.state.lock().await.current.clone()
    }

    /// Obtain a session for `chain_id`.
    ///
    /// Returns the active session unchanged when the family has one, whatever
    /// chain it is on, joins an in-flight handshake when one is running, and otherwise starts
    /// a new handshake. `force_new` tears down any existing session first.
    pub async fn connect(
        &self,
        chain_id: &ChainId,
        force_new: bool,
    ) -> OrchestratorResult<Arc<ConnectionSession>> {
        if force_new {
            info!("Forcing new {} session", self.family);
            self.disconnect().await?;
        }

        let inflight = {
            let mut state = self.state.lock().await;

            // The signer reports its own chain moves via notify_chain_changed
            if let Some(session) = state.current.clone() {
                if session.is_active().await {
                    debug!(
                        "Reusing active {} session {} on {} (requested {})",
                        self.family,
                        session.id(),
                        session.chain_id().await,
                        chain_id
                    );
                    return Ok(session);
                }
            }

            match &state.inflight {
                Some(inflight) => {
                    debug!("Joining in-flight {} handshake", self.family);
                    inflight.clone()
                }
                None => {
                    let handshake = self
                        .clone()
                        .handshake(chain_id.clone(), state.generation)
                        .boxed()
                        .shared();
                    state.status = SessionStatus::Connecting;
                    state.inflight = Some(handshake.clone());
                    handshake
                }
            }
        };

        inflight.await
    }

    /// Close the session and clear persisted artifacts for the family. Clears
    /// storage even when no session ever became active.
    pub async fn disconnect(&self) -> OrchestratorResult<()> {
        let session = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.inflight = None;
            state.status = SessionStatus::Closed;
            state.current.take()
        };

        if let Some(session) = &session {
            self.retire(session).await;
        }

        self.store.purge(self.family).await?;
        metrics::record_session_purge(self.family.as_str(), "disconnect");
        Ok(())
    }

    /// The signer switched chains on its side
    pub async fn notify_chain_changed(&self, chain_id: ChainId) -> bool {
        let state = self.state.lock().await;
        match &state.current {
            Some(session) if session.is_active().await => {
                session.set_chain(chain_id.clone()).await;
                info!("{} session moved to chain {}", self.family, chain_id);
                publish_session_event(
                    &self.events,
                    SessionEvent::ChainChanged {
                        family: self.family,
                        chain_id,
                    },
                );
                true
            }
            _ => false,
        }
    }

    async fn retire(&self, session: &ConnectionSession) {
        session.close().await;
        if let Err(e) = session.handle.disconnect().await {
            warn!("Signer disconnect for {} failed: {}", self.family, e);
        }
        info!("{} session {} closed", self.family, session.id());
        publish_session_event(
            &self.events,
            SessionEvent::Disconnected {
                family: self.family,
            },
        );
    }

    async fn handshake(
        self,
        chain_id: ChainId,
        generation: u64,
    ) -> OrchestratorResult<Arc<ConnectionSession>> {
        let restored = self.restore_artifacts().await;
        let uri_sink = self
            .family
            .uses_pairing_uri()
            .then(|| UriSink::new(self.family, self.events.clone()));

        info!("Starting {} handshake for chain {}", self.family, chain_id);
        let result = match self
            .provider
            .connect(HandshakeRequest {
                chain_id: chain_id.clone(),
                restored,
                uri_sink,
            })
            .await
        {
            Ok(handshake) => self.await_approval(handshake).await,
            Err(e) => Err(signer_error(self.family, e)),
        };

        self.finish(chain_id, generation, result).await
    }

    /// Purge when the failure threshold was reached, otherwise restore
    async fn restore_artifacts(&self) -> Option<SessionArtifacts> {
        let purge = {
            let mut state = self.state.lock().await;
            if state.consecutive_failures >= self.config.failure_threshold {
                state.consecutive_failures = 0;
                true
            } else {
                false
            }
        };

        if purge {
            warn!(
                "{} reached {} consecutive failures, purging stored artifacts",
                self.family, self.config.failure_threshold
            );
            if let Err(e) = self.store.purge(self.family).await {
                warn!("Failed to purge {} artifacts: {}", self.family, e);
            }
            metrics::record_session_purge(self.family.as_str(), "failure_threshold");
            return None;
        }

        match self.store.load(self.family).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                warn!("Ignoring unreadable {} artifacts: {}", self.family, e);
                None
            }
        }
    }

    /// Pairing-URI handshakes may return before the user approves in their
    /// wallet; poll the handle until it reports connected.
    async fn await_approval(&self, handshake: Handshake) -> OrchestratorResult<Handshake> {
        if !self.family.uses_pairing_uri() {
            return Ok(handshake);
        }

        match handshake.handle.is_connected().await {
            Ok(true) => return Ok(handshake),
            Ok(false) => {}
            Err(e) => return Err(signer_error(self.family, e)),
        }

        let family = self.family;
        let handle = handshake.handle.clone();
        let task = StatusPoller::new(self.config.pairing_poll()).spawn("pairing_approval", move || {
            let handle = handle.clone();
            async move {
                handle
                    .is_connected()
                    .await
                    .map_err(|e| signer_error(family, e))
            }
        });

        match task.wait().await {
            PollOutcome::Succeeded => Ok(handshake),
            PollOutcome::TimedOut => Err(OrchestratorError::Protocol {
                family,
                message: "pairing approval timed out".to_string(),
            }),
            PollOutcome::Cancelled => Err(OrchestratorError::Protocol {
                family,
                message: "pairing approval cancelled".to_string(),
            }),
            PollOutcome::Failed(e) => Err(e),
        }
    }

    async fn finish(
        &self,
        chain_id: ChainId,
        generation: u64,
        result: OrchestratorResult<Handshake>,
    ) -> OrchestratorResult<Arc<ConnectionSession>> {
        let mut state = self.state.lock().await;

        if state.generation != generation {
            debug!("Discarding {} handshake that outlived a disconnect", self.family);
            if let Ok(handshake) = &result {
                let _ = handshake.handle.disconnect().await;
            }
            return Err(OrchestratorError::SessionLost {
                family: self.family,
            });
        }
        state.inflight = None;

        match result {
            Ok(handshake) => {
                if let Err(e) = self.store.save(self.family, &handshake.artifacts).await {
                    warn!("Failed to persist {} artifacts: {}", self.family, e);
                }

                let session = Arc::new(ConnectionSession::new(
                    self.family,
                    chain_id.clone(),
                    handshake.handle,
                ));
                state.current = Some(session.clone());
                state.status = SessionStatus::Active;
                state.consecutive_failures = 0;

                info!(
                    "{} session {} active on {} for {}",
                    self.family,
                    session.id(),
                    chain_id,
                    session.account()
                );
                publish_session_event(
                    &self.events,
                    SessionEvent::Connected {
                        family: self.family,
                        chain_id,
                        account: session.account(),
                    },
                );
                Ok(session)
            }
            Err(e) => {
                state.status = SessionStatus::Error;
                if matches!(e, OrchestratorError::Protocol { .. }) {
                    state.consecutive_failures += 1;
                    warn!(
                        "{} handshake failed ({} consecutive): {}",
                        self.family, state.consecutive_failures, e
                    );
                } else {
                    info!("{} handshake ended: {}", self.family, e);
                }
                metrics::record_session_failure(self.family.as_str(), e.kind().as_str());
                Err(e)
            }
        }
    }
}

fn signer_error(family: ProtocolFamily, e: SignerError) -> OrchestratorError {
    match e {
        SignerError::Rejected(message) => OrchestratorError::UserRejected(message),
        SignerError::Protocol(message) => OrchestratorError::Protocol { family, message },
        SignerError::Disconnected => OrchestratorError::Protocol {
            family,
            message: "signer disconnected during handshake".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use crate::test_utils::{FakeSignerHandle, ScriptedSignerProvider};
    use std::time::Duration;

    fn manager(
        provider: Arc<ScriptedSignerProvider>,
        store: Arc<MemorySessionStore>,
    ) -> ConnectionSessionManager {
        ConnectionSessionManager::new(provider, store, &SessionConfig::default())
    }

    fn theta() -> ChainId {
        ChainId::new("361")
    }

    #[tokio::test]
    async fn test_connect_reuses_active_session() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(provider.clone(), store);

        let first = manager.connect(&ChainId::new("stride-1"), false).await.unwrap();
        let second = manager.connect(&ChainId::new("stride-1"), false).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provider.handshake_count(), 1);
        assert_eq!(manager.status().await, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_connect_for_other_chain_keeps_active_session() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        let manager = manager(provider.clone(), Arc::new(MemorySessionStore::new()));

        let first = manager.connect(&ChainId::new("stride-1"), false).await.unwrap();
        let second = manager
            .connect(&ChainId::new("cosmoshub-4"), false)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.status().await, SessionStatus::Active);
        assert_eq!(first.chain_id().await, ChainId::new("stride-1"));
        assert_eq!(provider.handshake_count(), 1);
        assert_eq!(provider.handles()[0].disconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_session_debug_shows_status() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        let manager = manager(provider, Arc::new(MemorySessionStore::new()));
        let session = manager.connect(&ChainId::new("stride-1"), false).await.unwrap();

        let rendered = format!("{:?}", session);

        assert!(rendered.contains("Extension"));
        assert!(rendered.contains("Active"));
    }

    #[tokio::test]
    async fn test_purge_after_failure_threshold() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        provider.push_failure(SignerError::Protocol("relay closed".into()));
        provider.push_failure(SignerError::Protocol("relay closed".into()));
        provider.push_failure(SignerError::Protocol("relay closed".into()));
        let store = Arc::new(MemorySessionStore::new());
        let mut artifacts = SessionArtifacts::new();
        artifacts.insert("pairing".into(), vec![1, 2, 3]);
        store.save(ProtocolFamily::Extension, &artifacts).await.unwrap();
        let manager = manager(provider.clone(), store.clone());
        let chain = ChainId::new("stride-1");

        for expected in 1..=3 {
            let err = manager.connect(&chain, false).await.unwrap_err();
            assert!(matches!(err, OrchestratorError::Protocol { .. }));
            assert_eq!(manager.consecutive_failures().await, expected);
            assert_eq!(manager.status().await, SessionStatus::Error);
        }
        assert_eq!(store.purge_count(), 0);

        manager.connect(&chain, false).await.unwrap();

        assert_eq!(store.purge_count(), 1);
        assert_eq!(manager.consecutive_failures().await, 0);
        let restored = provider.restored_artifacts();
        assert_eq!(restored.len(), 4);
        assert!(restored[0].is_some());
        assert!(restored[3].is_none());
    }

    #[tokio::test]
    async fn test_rejection_does_not_count() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        provider.push_failure(SignerError::Rejected("user closed the prompt".into()));
        provider.push_failure(SignerError::Protocol("timeout".into()));
        provider.push_failure(SignerError::Protocol("timeout".into()));
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(provider.clone(), store.clone());
        let chain = ChainId::new("stride-1");

        let err = manager.connect(&chain, false).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::FailureKind::UserRejected);
        assert_eq!(manager.consecutive_failures().await, 0);

        manager.connect(&chain, false).await.unwrap_err();
        manager.connect(&chain, false).await.unwrap_err();

        assert_eq!(manager.consecutive_failures().await, 2);
        assert_eq!(store.purge_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_connects_share_one_handshake() {
        let provider = Arc::new(
            ScriptedSignerProvider::new(ProtocolFamily::Extension)
                .with_delay(Duration::from_millis(500)),
        );
        let manager = manager(provider.clone(), Arc::new(MemorySessionStore::new()));
        let chain = ChainId::new("stride-1");

        let (a, b, c) = tokio::join!(
            manager.connect(&chain, false),
            manager.connect(&chain, false),
            manager.connect(&chain, false)
        );

        let a = a.unwrap();
        assert!(Arc::ptr_eq(&a, &b.unwrap()));
        assert!(Arc::ptr_eq(&a, &c.unwrap()));
        assert_eq!(provider.handshake_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_purges_and_emits() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(provider.clone(), store.clone());
        let mut events = manager.subscribe();

        let session = manager.connect(&ChainId::new("stride-1"), false).await.unwrap();
        assert!(store.contains(ProtocolFamily::Extension));
        assert!(matches!(events.recv().await, Ok(SessionEvent::Connected { .. })));

        manager.disconnect().await.unwrap();

        assert_eq!(manager.status().await, SessionStatus::Closed);
        assert!(!store.contains(ProtocolFamily::Extension));
        assert!(matches!(events.recv().await, Ok(SessionEvent::Disconnected { .. })));
        assert!(matches!(
            session.request("stake", serde_json::json!({})).await,
            Err(OrchestratorError::SessionLost { .. })
        ));
        assert_eq!(provider.handles()[0].disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_without_session_still_purges() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::PairingUri));
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(provider, store.clone());

        manager.disconnect().await.unwrap();

        assert_eq!(store.purge_count(), 1);
    }

    #[tokio::test]
    async fn test_force_new_tears_down_existing() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        let store = Arc::new(MemorySessionStore::new());
        let manager = manager(provider.clone(), store.clone());
        let chain = ChainId::new("stride-1");

        let first = manager.connect(&chain, false).await.unwrap();
        let second = manager.connect(&chain, true).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.status().await, SessionStatus::Closed);
        assert_eq!(provider.handshake_count(), 2);
        assert_eq!(store.purge_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_uri_published_and_approval_polled() {
        let provider = Arc::new(
            ScriptedSignerProvider::new(ProtocolFamily::PairingUri).approved_after(3),
        );
        let manager = manager(provider.clone(), Arc::new(MemorySessionStore::new()));
        let mut events = manager.subscribe();

        let session = manager.connect(&theta(), false).await.unwrap();

        assert!(session.is_active().await);
        match events.recv().await {
            Ok(SessionEvent::UriAvailable { uri, .. }) => assert!(uri.starts_with("wc:")),
            other => panic!("expected pairing uri, got {:?}", other),
        }
        assert!(matches!(events.recv().await, Ok(SessionEvent::Connected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pairing_approval_timeout_is_protocol_error() {
        let provider = Arc::new(
            ScriptedSignerProvider::new(ProtocolFamily::PairingUri).approved_after(u32::MAX),
        );
        let manager = manager(provider, Arc::new(MemorySessionStore::new()));

        let err = manager.connect(&theta(), false).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Protocol { .. }));
        assert_eq!(manager.consecutive_failures().await, 1);
    }

    #[tokio::test]
    async fn test_chain_changed_event() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        let manager = manager(provider, Arc::new(MemorySessionStore::new()));
        let session = manager.connect(&ChainId::new("stride-1"), false).await.unwrap();
        let mut events = manager.subscribe();

        assert!(manager.notify_chain_changed(ChainId::new("core-1")).await);

        assert_eq!(session.chain_id().await, ChainId::new("core-1"));
        assert!(matches!(
            events.recv().await,
            Ok(SessionEvent::ChainChanged { chain_id, .. }) if chain_id.as_str() == "core-1"
        ));
    }

    #[tokio::test]
    async fn test_remote_disconnect_surfaces_as_session_lost() {
        let provider = Arc::new(ScriptedSignerProvider::new(ProtocolFamily::Extension));
        let manager = manager(provider.clone(), Arc::new(MemorySessionStore::new()));
        let session = manager.connect(&ChainId::new("stride-1"), false).await.unwrap();
        let handle: Arc<FakeSignerHandle> = provider.handles()[0].clone();

        handle.push_response(Err(SignerError::Disconnected));

        assert!(matches!(
            session.request("stake", serde_json::json!({})).await,
            Err(OrchestratorError::SessionLost { .. })
        ));
        assert_eq!(session.status().await, SessionStatus::Error);
    }
}
