use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::{sleep, timeout};

use fleetlearn_learner::{NodeLookup, WaitError};
use fleetlearn_test::fixtures::NodeFixture;
use fleetlearn_test::{init_logging, plain_learner, seed_of, test_config, MockNetwork};

#[tokio::test(start_paused = true)]
async fn count_wait_reports_how_far_it_got() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    let p = NodeFixture::new(2);

    network.add_node(&s1);
    let p_record = network.add_node(&p);
    network.teach(&s1, [&p_record]);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];

    let mut learner = plain_learner(config, &network);
    learner.load_seed_nodes().await.unwrap();

    let error = learner
        .wait_until_count(3, Duration::from_secs(1))
        .await
        .unwrap_err();

    match &error {
        WaitError::NotEnoughNodes {
            known,
            wanted,
            rounds,
            ..
        } => {
            assert_eq!(*known, 2);
            assert_eq!(*wanted, 3);
            assert!(*rounds > 0);
        }
        other => panic!("unexpected error: {other}"),
    }

    let message = error.to_string();
    assert!(message.contains("2 nodes are known but 3 are wanted"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn identities_wait_tolerates_some_missing_nodes() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    let p = NodeFixture::new(2);
    let ghost = NodeFixture::new(3);

    network.add_node(&s1);
    let p_record = network.add_node(&p);
    network.teach(&s1, [&p_record]);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];

    let mut learner = plain_learner(config, &network);
    learner.load_seed_nodes().await.unwrap();

    let wanted = [p.identity(), ghost.identity()];

    let all_known = learner
        .wait_until_identities_known(&wanted, Duration::from_secs(1), 1)
        .await
        .unwrap();
    assert!(!all_known);

    match learner
        .wait_until_identities_known(&wanted, Duration::from_secs(1), 0)
        .await
    {
        Err(WaitError::MissingNodes { missing, .. }) => {
            assert_eq!(missing, vec![ghost.identity()]);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn listeners_hear_about_nodes_learned_in_the_background() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    let p = NodeFixture::new(2);

    network.add_node(&s1);
    let p_record = network.add_node(&p);
    network.teach(&s1, [&p_record]);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];

    let learner = plain_learner(config, &network);
    let mut learned = learner.handle().subscribe(&[p.identity()]);

    let task = learner.spawn(true);

    let heard = timeout(Duration::from_secs(60), learned.recv())
        .await
        .unwrap();
    assert_eq!(heard, Some(p.identity()));

    // Every identity was delivered, the channel is closed
    assert_eq!(learned.recv().await, None);

    task.stop();
    task.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn passive_wait_wakes_up_the_loop() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    let late = NodeFixture::new(2);

    network.add_node(&s1);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];
    config.short_interval = Duration::from_secs(30);
    config.long_interval = Duration::from_secs(300);

    let task = plain_learner(config, &network).spawn(true);
    let handle = task.handle().clone();

    handle
        .wait_until_count(1, Duration::from_secs(10))
        .await
        .unwrap();

    // The node only joins after the first rounds
    sleep(Duration::from_secs(1)).await;
    let late_record = network.add_node(&late);
    network.teach(&s1, [&late_record]);

    let all_known = handle
        .wait_until_identities_known(&[late.identity()], Duration::from_secs(10), 0)
        .await
        .unwrap();
    assert!(all_known);

    task.stop();
    task.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn resolve_known_and_unknown_nodes() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let s1 = NodeFixture::new(1);
    let p = NodeFixture::new(2);
    let ghost = NodeFixture::new(3);

    network.add_node(&s1);
    let p_record = network.add_node(&p);
    network.teach(&s1, [&p_record]);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&s1)];

    let task = plain_learner(config, &network).spawn(true);
    let handle = task.handle().clone();

    let resolved = handle
        .resolve_nodes(&[p.identity(), ghost.identity()], Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved[0].0, p.identity());
    assert_eq!(
        resolved[0].1.found().map(|record| record.identity()),
        Some(p.identity())
    );
    assert_eq!(resolved[1], (ghost.identity(), NodeLookup::NotKnownAnywhere));

    task.stop();
    task.join().await.unwrap();
}
