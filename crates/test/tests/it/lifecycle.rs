use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use fleetlearn_learner::{LearningError, OnLearningError, WaitError};
use fleetlearn_node::{NodeStore, PeerRecord, StoreError};
use fleetlearn_peer::PeerIdentity;
use fleetlearn_test::fixtures::NodeFixture;
use fleetlearn_test::{init_logging, plain_learner, seed_of, test_config, MockNetwork};

/// Node store whose disk is always full.
struct FullDisk;

impl NodeStore for FullDisk {
    fn save(&self, _record: &PeerRecord) -> Result<PeerIdentity, StoreError> {
        Err(StoreError::Backend("no space left on device".to_string()))
    }

    fn load_all(&self) -> Result<Vec<PeerRecord>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn stopped_loop_ends_cleanly() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    network.add_node(&s1);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];

    let task = plain_learner(config, &network).spawn(true);
    let handle = task.handle().clone();

    handle
        .wait_until_count(1, Duration::from_secs(10))
        .await
        .unwrap();
    assert!(handle.is_running());

    task.stop();
    task.join().await.unwrap();

    assert!(!handle.is_running());
    assert_eq!(handle.crashed(), None);

    // The fleet outlives the loop
    assert_eq!(handle.known_nodes(), 1);
}

#[tokio::test(start_paused = true)]
async fn fatal_error_tears_the_loop_down() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    network.add_node(&s1);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];
    config.save_metadata = true;
    config.on_error = OnLearningError::Abort;

    let torn_down = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&torn_down);

    let learner = plain_learner(config, &network)
        .with_store(Arc::new(FullDisk))
        .with_teardown(move |error| {
            assert!(matches!(error, LearningError::Storage(_)));
            flag.store(true, Ordering::SeqCst);
        });

    let task = learner.spawn(true);
    let handle = task.handle().clone();

    let error = task.join().await.unwrap_err();

    assert!(matches!(error, LearningError::Storage(_)));
    assert!(error.is_fatal());
    assert!(torn_down.load(Ordering::SeqCst));
    assert_eq!(handle.crashed(), Some(error.clone()));
    assert!(!handle.is_running());

    match handle.wait_until_count(5, Duration::from_secs(1)).await {
        Err(WaitError::Crashed(crash)) => assert_eq!(crash, error),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn resume_policy_keeps_learning() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    network.add_node(&s1);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];
    config.save_metadata = true;
    config.on_error = OnLearningError::Resume;
    config.short_interval = Duration::from_secs(1);

    let task = plain_learner(config, &network)
        .with_store(Arc::new(FullDisk))
        .spawn(true);
    let handle = task.handle().clone();

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(handle.is_running());
    assert!(handle.learning_round() > 1);
    assert_eq!(handle.crashed(), None);
    assert!(network.peer_list_requests(&s1) > 1);

    task.stop();
    task.join().await.unwrap();
}

/// Node store whose disk is full until the first write is attempted.
#[derive(Default)]
struct FlakyDisk {
    failed: AtomicBool,
}

impl NodeStore for FlakyDisk {
    fn save(&self, record: &PeerRecord) -> Result<PeerIdentity, StoreError> {
        if self.failed.swap(true, Ordering::SeqCst) {
            Ok(record.identity())
        } else {
            Err(StoreError::Backend("no space left on device".to_string()))
        }
    }

    fn load_all(&self) -> Result<Vec<PeerRecord>, StoreError> {
        Ok(Vec::new())
    }
}

#[tokio::test(start_paused = true)]
async fn storage_error_while_seeding_spares_the_other_seeds() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    let s2 = NodeFixture::new(2);
    network.add_node(&s1);
    network.add_node(&s2);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1), seed_of(&s2)];
    config.save_metadata = true;
    config.on_error = OnLearningError::Resume;

    let task = plain_learner(config, &network)
        .with_store(Arc::new(FlakyDisk::default()))
        .spawn(true);
    let handle = task.handle().clone();

    handle
        .wait_until_count(2, Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(network.node_info_requests(&s1), 1);
    assert_eq!(network.node_info_requests(&s2), 1);
    assert_eq!(handle.crashed(), None);

    task.stop();
    task.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn learning_now_skips_the_wait() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    network.add_node(&s1);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];
    config.short_interval = Duration::from_secs(3600);
    config.long_interval = Duration::from_secs(3600);

    let task = plain_learner(config, &network).spawn(false);
    let handle = task.handle().clone();

    handle
        .wait_until_count(1, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(handle.learning_round(), 0);

    handle.learn_about_nodes_now();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(handle.learning_round(), 1);
    assert_eq!(network.peer_list_requests(&s1), 1);

    task.stop();
    task.join().await.unwrap();
}
