use std::collections::HashMap;
use std::time::Duration;

use pretty_assertions::assert_eq;

use fleetlearn_learner::{Eagerness, LearningError, Metrics};
use fleetlearn_metrics::{encode, Registry, SharedRegistry};
use fleetlearn_test::fixtures::NodeFixture;
use fleetlearn_test::{init_logging, plain_learner, seed_of, test_config, MockNetwork};

#[tokio::test]
async fn rounds_are_counted_without_teachers() {
    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let mut learner = plain_learner(test_config(dir.path()), &network);

    for expected in 1..=3 {
        let error = learner
            .learn_from_teacher_node(Eagerness::Lazy)
            .await
            .unwrap_err();

        assert!(matches!(error, LearningError::NotEnoughTeachers(_)));
        assert_eq!(learner.learning_round(), expected);
    }
}

#[tokio::test]
async fn teachers_take_turns() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let nodes = (1..=3).map(NodeFixture::new).collect::<Vec<_>>();
    let mut learner = plain_learner(test_config(dir.path()), &network);

    for node in &nodes {
        learner.remember_node(network.add_node(node)).unwrap();
    }

    let mut teachers = Vec::new();
    for _ in 0..9 {
        let report = learner.learn_from_teacher_node(Eagerness::Lazy).await.unwrap();
        teachers.push(report.teacher);
    }

    assert!(
        teachers.windows(2).all(|pair| pair[0] != pair[1]),
        "a teacher was asked twice in a row: {teachers:?}"
    );

    let mut turns = HashMap::new();
    for teacher in &teachers {
        *turns.entry(*teacher).or_insert(0) += 1;
    }

    for node in &nodes {
        assert_eq!(turns.get(&node.identity()), Some(&3));
        assert_eq!(network.peer_list_requests(node), 3);
    }
}

#[tokio::test]
async fn learning_slows_down_once_the_fleet_is_stable() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let teacher = NodeFixture::new(1);
    let newcomer = NodeFixture::new(2);
    network.add_node(&teacher);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&teacher)];
    config.short_interval = Duration::from_secs(1);
    config.long_interval = Duration::from_secs(30);
    config.rounds_before_slowdown = 2;

    let mut learner = plain_learner(config, &network);
    learner.load_seed_nodes().await.unwrap();

    learner.learn_from_teacher_node(Eagerness::Lazy).await.unwrap();
    assert_eq!(learner.current_interval(), Duration::from_secs(1));

    learner.learn_from_teacher_node(Eagerness::Lazy).await.unwrap();
    assert_eq!(learner.current_interval(), Duration::from_secs(30));
    assert_eq!(learner.handle().current_interval(), Duration::from_secs(30));

    let record = network.add_node(&newcomer);
    network.teach(&teacher, [&record]);

    let report = learner.learn_from_teacher_node(Eagerness::Lazy).await.unwrap();
    assert_eq!(report.new_nodes, vec![newcomer.identity()]);
    assert_eq!(learner.current_interval(), Duration::from_secs(1));
}

#[tokio::test]
async fn unreachable_teacher_fails_the_round() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let network = MockNetwork::new();

    let teacher = NodeFixture::new(1);
    network.add_node(&teacher);

    let mut config = test_config(dir.path());
    config.seed_nodes = vec![seed_of(&teacher)];

    let registry = SharedRegistry::new(Registry::default());
    let metrics = Metrics::register(&registry);

    let mut learner = plain_learner(config, &network).with_metrics(metrics.clone());
    learner.load_seed_nodes().await.unwrap();

    network.set_reachable(&teacher, false);

    let error = learner
        .learn_from_teacher_node(Eagerness::Lazy)
        .await
        .unwrap_err();

    assert!(matches!(error, LearningError::UnresponsiveTeacher { .. }));
    assert!(error.is_recoverable());
    assert_eq!(metrics.unresponsive_teachers.get(), 1);
    assert_eq!(metrics.failed_rounds.get(), 1);

    // Unreachable teachers are kept around, they may come back
    assert_eq!(learner.handle().known_nodes(), 1);

    let mut out = String::new();
    registry.read(|reg| encode(&mut out, reg)).unwrap();

    assert!(out.contains("fleetlearn_learner_rounds_total 1"), "{out}");
    assert!(out.contains("fleetlearn_learner_failed_rounds_total 1"), "{out}");
    assert!(out.contains("fleetlearn_learner_known_nodes 1"), "{out}");
}
