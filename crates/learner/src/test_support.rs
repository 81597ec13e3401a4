use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use fleetlearn_config::LearnerConfig;
use fleetlearn_node::fixtures::NodeFixture;
use fleetlearn_node::{
    CertificateError, CertificateSink, NodeStore, PeerRecord, PeerTransport, Response,
    RestInterface, StoreError, TransportError,
};
use fleetlearn_peer::PeerIdentity;

use crate::{Learner, Role};

pub fn config() -> LearnerConfig {
    LearnerConfig {
        certificates_dir: PathBuf::from("/nonexistent/fleetlearn-certs"),
        ..LearnerConfig::default()
    }
}

pub fn learner_with(config: LearnerConfig, transport: Arc<MockTransport>) -> Learner {
    Learner::new(config, Role::Plain { identity: None }, transport)
        .unwrap()
        .with_certificate_sink(Arc::new(RecordingSink::default()))
        .with_rng_seed(42)
}

/// In-process stand-in for the network, keyed by REST interface.
#[derive(Default)]
pub struct MockTransport {
    peer_lists: Mutex<HashMap<RestInterface, Response>>,
    descriptions: Mutex<HashMap<RestInterface, PeerRecord>>,
    requested: Mutex<Vec<Vec<PeerIdentity>>>,
    announced: Mutex<Vec<Bytes>>,
    certificate_requests: Mutex<HashMap<RestInterface, usize>>,
}

impl MockTransport {
    /// Make `node` answer peer list requests with `records`, signed by itself.
    pub fn serve<'a>(&self, node: &NodeFixture, records: impl IntoIterator<Item = &'a PeerRecord>) {
        self.respond(node, Response::ok(node.signed_peer_list(records)));
    }

    pub fn respond(&self, node: &NodeFixture, response: Response) {
        self.peer_lists
            .lock()
            .unwrap()
            .insert(node.rest.clone(), response);
    }

    /// Make `node` describe itself with `record` and present a certificate.
    pub fn describe(&self, node: &NodeFixture, record: PeerRecord) {
        self.descriptions
            .lock()
            .unwrap()
            .insert(node.rest.clone(), record);
    }

    pub fn requested(&self) -> Vec<Vec<PeerIdentity>> {
        self.requested.lock().unwrap().clone()
    }

    pub fn announced(&self) -> Vec<PeerIdentity> {
        self.announced
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| PeerRecord::from_bytes(bytes.clone()).unwrap().identity())
            .collect()
    }

    pub fn certificate_requests(&self, node: &NodeFixture) -> usize {
        self.certificate_requests
            .lock()
            .unwrap()
            .get(&node.rest)
            .copied()
            .unwrap_or(0)
    }

    fn unreachable(rest: &RestInterface) -> TransportError {
        TransportError::Connection {
            rest: rest.clone(),
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn get_peer_list(
        &self,
        teacher: &RestInterface,
        wanted: &[PeerIdentity],
        announce: Option<Bytes>,
        _certificate_path: &Path,
    ) -> Result<Response, TransportError> {
        let response = self.peer_lists.lock().unwrap().get(teacher).cloned();
        let response = response.ok_or_else(|| Self::unreachable(teacher))?;

        self.requested.lock().unwrap().push(wanted.to_vec());
        self.announced.lock().unwrap().extend(announce);

        Ok(response)
    }

    async fn get_node_info(
        &self,
        rest: &RestInterface,
        _certificate_path: &Path,
    ) -> Result<Response, TransportError> {
        let record = self.descriptions.lock().unwrap().get(rest).cloned();
        let record = record.ok_or_else(|| Self::unreachable(rest))?;

        Ok(Response::ok(record.to_bytes().unwrap()))
    }

    async fn fetch_certificate(&self, rest: &RestInterface) -> Result<Bytes, TransportError> {
        *self
            .certificate_requests
            .lock()
            .unwrap()
            .entry(rest.clone())
            .or_default() += 1;

        let record = self.descriptions.lock().unwrap().get(rest).cloned();
        let record = record.ok_or_else(|| Self::unreachable(rest))?;

        Ok(record.certificate().clone())
    }
}

/// Certificate sink remembering writes instead of touching the filesystem.
#[derive(Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<(PathBuf, bool)>>,
    discards: Mutex<Vec<PathBuf>>,
}

impl RecordingSink {
    pub fn writes(&self) -> Vec<(PathBuf, bool)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn discards(&self) -> Vec<PathBuf> {
        self.discards.lock().unwrap().clone()
    }

    pub fn wrote(&self, path: &Path) -> bool {
        self.writes().iter().any(|(written, _)| written == path)
    }
}

impl CertificateSink for RecordingSink {
    fn write(&self, _certificate: &[u8], path: &Path, force: bool) -> Result<(), CertificateError> {
        self.writes.lock().unwrap().push((path.to_path_buf(), force));
        Ok(())
    }

    fn discard(&self, path: &Path) -> Result<(), CertificateError> {
        self.discards.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

/// Node store which is empty and cannot be written to.
pub struct FailingStore;

impl NodeStore for FailingStore {
    fn save(&self, _record: &PeerRecord) -> Result<PeerIdentity, StoreError> {
        Err(StoreError::Backend("disk full".to_string()))
    }

    fn load_all(&self) -> Result<Vec<PeerRecord>, StoreError> {
        Ok(Vec::new())
    }
}
