//! A simulated fleet of nodes reachable through [`PeerTransport`], and helpers
//! to run learners against it.

#![allow(unexpected_cfgs)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use fleetlearn_config::{LearnerConfig, SeedNode};
use fleetlearn_learner::{Learner, Role};
use fleetlearn_node::fixtures::NodeFixture;
use fleetlearn_node::{PeerRecord, PeerTransport, Response, RestInterface, TransportError};
use fleetlearn_peer::PeerIdentity;

pub use fleetlearn_node::fixtures;

/// Timestamp of the advertisements of simulated nodes.
pub const ADVERTISED_AT: u32 = 1_700_000_000;

struct SimNode {
    fixture: NodeFixture,
    advertisement: PeerRecord,
    /// Self-description served instead of the advertisement
    live: Option<PeerRecord>,
    known: BTreeMap<PeerIdentity, PeerRecord>,
    reachable: bool,
    status: Option<u16>,
    peer_list_requests: usize,
    node_info_requests: usize,
}

impl SimNode {
    fn peer_list(&self) -> Bytes {
        self.fixture.signed_peer_list(self.known.values())
    }
}

/// Simulated network of nodes, keyed by REST interface.
#[derive(Default)]
pub struct MockNetwork {
    nodes: Mutex<HashMap<RestInterface, SimNode>>,
    announcements: Mutex<Vec<PeerIdentity>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a reachable node advertising its genuine record.
    pub fn add_node(&self, fixture: &NodeFixture) -> PeerRecord {
        self.add_node_advertising(fixture, fixture.record(ADVERTISED_AT))
    }

    /// Add a reachable node at the address of `fixture`, advertising `advertisement`.
    pub fn add_node_advertising(&self, fixture: &NodeFixture, advertisement: PeerRecord) -> PeerRecord {
        let node = SimNode {
            fixture: fixture.clone(),
            advertisement: advertisement.clone(),
            live: None,
            known: BTreeMap::new(),
            reachable: true,
            status: None,
            peer_list_requests: 0,
            node_info_requests: 0,
        };

        self.lock().insert(fixture.rest.clone(), node);
        advertisement
    }

    /// Make `teacher` tell about `records` when asked for its peer list.
    pub fn teach<'a>(&self, teacher: &NodeFixture, records: impl IntoIterator<Item = &'a PeerRecord>) {
        self.with_node(teacher, |node| {
            for record in records {
                node.known.insert(record.identity(), record.clone());
            }
        });
    }

    pub fn set_reachable(&self, fixture: &NodeFixture, reachable: bool) {
        self.with_node(fixture, |node| node.reachable = reachable);
    }

    /// Make the node at the address of `fixture` describe itself with `live`.
    pub fn impersonate(&self, fixture: &NodeFixture, live: PeerRecord) {
        self.with_node(fixture, |node| node.live = Some(live));
    }

    /// Make peer list requests to `fixture` fail with `status`.
    pub fn fail_with(&self, fixture: &NodeFixture, status: u16) {
        self.with_node(fixture, |node| node.status = Some(status));
    }

    pub fn peer_list_requests(&self, fixture: &NodeFixture) -> usize {
        self.with_node(fixture, |node| node.peer_list_requests)
    }

    pub fn node_info_requests(&self, fixture: &NodeFixture) -> usize {
        self.with_node(fixture, |node| node.node_info_requests)
    }

    /// Nodes which were announced to any teacher, in order.
    pub fn announcements(&self) -> Vec<PeerIdentity> {
        self.announcements.lock().expect("poisoned lock").clone()
    }

    /// Identities `teacher` knows about.
    pub fn known_by(&self, teacher: &NodeFixture) -> Vec<PeerIdentity> {
        self.with_node(teacher, |node| node.known.keys().copied().collect())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RestInterface, SimNode>> {
        self.nodes.lock().expect("poisoned lock")
    }

    fn with_node<A>(&self, fixture: &NodeFixture, f: impl FnOnce(&mut SimNode) -> A) -> A {
        let mut nodes = self.lock();
        let node = nodes
            .get_mut(&fixture.rest)
            .unwrap_or_else(|| panic!("node {} is not part of the network", fixture.rest));
        f(node)
    }

    fn reach<A>(
        &self,
        rest: &RestInterface,
        f: impl FnOnce(&mut SimNode) -> A,
    ) -> Result<A, TransportError> {
        let mut nodes = self.lock();

        match nodes.get_mut(rest) {
            Some(node) if node.reachable => Ok(f(node)),
            _ => Err(TransportError::Connection {
                rest: rest.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

#[async_trait]
impl PeerTransport for MockNetwork {
    async fn get_peer_list(
        &self,
        teacher: &RestInterface,
        wanted: &[PeerIdentity],
        announce: Option<Bytes>,
        _certificate_path: &Path,
    ) -> Result<Response, TransportError> {
        let announced = announce.and_then(|bytes| PeerRecord::from_bytes(bytes).ok());

        let response = self.reach(teacher, |node| {
            node.peer_list_requests += 1;

            if let Some(record) = &announced {
                node.known.insert(record.identity(), record.clone());
            }

            match node.status {
                Some(status) => Response::new(status, Bytes::new()),
                None => Response::ok(node.peer_list()),
            }
        })?;

        if let Some(record) = announced {
            self.announcements
                .lock()
                .expect("poisoned lock")
                .push(record.identity());
        }

        debug!(%teacher, wanted = wanted.len(), status = response.status, "Served peer list");
        Ok(response)
    }

    async fn get_node_info(
        &self,
        rest: &RestInterface,
        _certificate_path: &Path,
    ) -> Result<Response, TransportError> {
        let record = self.reach(rest, |node| {
            node.node_info_requests += 1;
            node.live.clone().unwrap_or_else(|| node.advertisement.clone())
        })?;

        match record.to_bytes() {
            Ok(bytes) => Ok(Response::ok(bytes)),
            Err(_) => Ok(Response::new(500, Bytes::new())),
        }
    }

    async fn fetch_certificate(&self, rest: &RestInterface) -> Result<Bytes, TransportError> {
        self.reach(rest, |node| node.advertisement.certificate().clone())
    }
}

/// Seed node configuration pointing at `fixture`.
pub fn seed_of(fixture: &NodeFixture) -> SeedNode {
    SeedNode::new(Some(fixture.identity()), fixture.rest.host.clone(), fixture.rest.port)
}

/// Configuration suitable for learners in tests: certificates are kept under `certificates_dir`.
pub fn test_config(certificates_dir: &Path) -> LearnerConfig {
    LearnerConfig {
        certificates_dir: certificates_dir.to_path_buf(),
        ..LearnerConfig::default()
    }
}

/// A learner which is not part of the fleet, learning over `network`.
pub fn plain_learner(config: LearnerConfig, network: &Arc<MockNetwork>) -> Learner {
    Learner::new(config, Role::Plain { identity: None }, Arc::clone(network) as Arc<dyn PeerTransport>)
        .expect("plain learners have no local record")
        .with_rng_seed(7)
}

pub fn init_logging() {
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::builder()
        .parse("info,fleetlearn=debug")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_env_filter(filter)
        .with_test_writer()
        .with_thread_ids(false);

    let _ = builder.finish().try_init();
}
