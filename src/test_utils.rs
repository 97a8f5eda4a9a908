//! Shared fakes for unit tests

use crate::chain::ChainId;
use crate::session::{
    Handshake, HandshakeRequest, ProtocolFamily, SessionArtifacts, SignerError, SignerHandle,
    SignerProvider,
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Signer handle with scripted responses
pub struct FakeSignerHandle {
    chain_id: ChainId,
    account: String,
    approve_after: u32,
    connected_checks: AtomicU32,
    responses: Mutex<VecDeque<Result<Value, SignerError>>>,
    requests: Mutex<Vec<(String, Value)>>,
    disconnects: AtomicUsize,
}

impl FakeSignerHandle {
    pub fn new(chain_id: ChainId, account: &str, approve_after: u32) -> Self {
        Self {
            chain_id,
            account: account.to_string(),
            approve_after,
            connected_checks: AtomicU32::new(0),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Queue a response for the next request; unscripted requests succeed
    pub fn push_response(&self, response: Result<Value, SignerError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignerHandle for FakeSignerHandle {
    fn chain_id(&self) -> ChainId {
        self.chain_id.clone()
    }

    fn account(&self) -> String {
        self.account.clone()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, SignerError> {
        let n = {
            let mut requests = self.requests.lock().unwrap();
            requests.push((method.to_string(), params));
            requests.len()
        };
        match self.responses.lock().unwrap().pop_front() {
            Some(response) => response,
            None => Ok(json!({ "tx_hash": format!("0x{:064x}", n) })),
        }
    }

    async fn is_connected(&self) -> Result<bool, SignerError> {
        let checks = self.connected_checks.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(checks >= self.approve_after)
    }

    async fn disconnect(&self) -> Result<(), SignerError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Signer provider whose handshakes follow a script of failures, then succeed
pub struct ScriptedSignerProvider {
    family: ProtocolFamily,
    delay: Duration,
    approve_after: u32,
    failures: Mutex<VecDeque<SignerError>>,
    handshakes: AtomicUsize,
    restored: Mutex<Vec<Option<SessionArtifacts>>>,
    handles: Mutex<Vec<Arc<FakeSignerHandle>>>,
}

impl ScriptedSignerProvider {
    pub fn new(family: ProtocolFamily) -> Self {
        Self {
            family,
            delay: Duration::ZERO,
            approve_after: 0,
            failures: Mutex::new(VecDeque::new()),
            handshakes: AtomicUsize::new(0),
            restored: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Handles report connected from the nth connected-check on
    pub fn approved_after(mut self, checks: u32) -> Self {
        self.approve_after = checks;
        self
    }

    pub fn push_failure(&self, error: SignerError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    /// Artifacts handed to each handshake, in order
    pub fn restored_artifacts(&self) -> Vec<Option<SessionArtifacts>> {
        self.restored.lock().unwrap().clone()
    }

    pub fn handles(&self) -> Vec<Arc<FakeSignerHandle>> {
        self.handles.lock().unwrap().clone()
    }

    fn account_for(&self, chain_id: &ChainId) -> String {
        match self.family {
            ProtocolFamily::PairingUri => "0x00000000000000000000000000000000000000a1".to_string(),
            ProtocolFamily::Extension => {
                let prefix = chain_id.as_str().split('-').next().unwrap_or("cosmos");
                format!("{}1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu", prefix)
            }
        }
    }
}

#[async_trait]
impl SignerProvider for ScriptedSignerProvider {
    fn family(&self) -> ProtocolFamily {
        self.family
    }

    async fn connect(&self, request: HandshakeRequest) -> Result<Handshake, SignerError> {
        let n = self.handshakes.fetch_add(1, Ordering::SeqCst) + 1;
        self.restored.lock().unwrap().push(request.restored.clone());

        if let Some(sink) = &request.uri_sink {
            sink.publish(&format!("wc:{:08x}@2?relay-protocol=irn&symKey=00", n));
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let handle = Arc::new(FakeSignerHandle::new(
            request.chain_id.clone(),
            &self.account_for(&request.chain_id),
            self.approve_after,
        ));
        self.handles.lock().unwrap().push(handle.clone());

        let mut artifacts = SessionArtifacts::new();
        artifacts.insert("session".to_string(), format!("handshake-{}", n).into_bytes());
        Ok(Handshake { handle, artifacts })
    }
}
