use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use twopc::{
    participant, Coordinator, CoordinatorConfig, Decision, FaultKind, Participant,
    ParticipantConfig, PeerConfig, TransactionRequest, TransactionStatus,
};

const PREPARE_TIMEOUT_MS: u64 = 300;
const FAULT_DELAY_MS: u64 = 1500;

struct Cluster {
    nodes: Vec<(SocketAddr, Arc<Participant>)>,
}

impl Cluster {
    async fn start(n: usize) -> Self {
        let config = ParticipantConfig {
            fault_delay_ms: FAULT_DELAY_MS,
            network_recovery_ms: None,
        };
        let mut nodes = Vec::with_capacity(n);
        for _ in 0..n {
            let (addr, node, _handle) = participant::spawn("127.0.0.1:0", config.clone())
                .await
                .expect("spawn participant");
            nodes.push((addr, node));
        }
        Self { nodes }
    }

    fn peers(&self) -> Vec<PeerConfig> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(id, (addr, _))| PeerConfig::new(id, addr.to_string()))
            .collect()
    }

    fn coordinator(&self) -> Coordinator {
        let config = CoordinatorConfig {
            prepare_timeout_ms: PREPARE_TIMEOUT_MS,
            decision_timeout_ms: 1000,
            worker_pool_size: 0,
        };
        Coordinator::new(config, self.peers()).expect("unique participant ids")
    }

    fn node(&self, id: usize) -> &Participant {
        &self.nodes[id].1
    }

    fn actual_statuses(&self) -> Vec<TransactionStatus> {
        self.nodes
            .iter()
            .map(|(_, node)| node.transaction().status())
            .collect()
    }
}

fn request(value: i64, pct: i64) -> TransactionRequest {
    TransactionRequest::new(value, pct).expect("valid request")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn all_participants_vote_ok_and_commit() {
    let cluster = Cluster::start(6).await;
    let coordinator = cluster.coordinator();

    let result = coordinator.run_transaction(request(20, 100)).await;

    assert!(result.committed);
    assert_eq!(result.decision, Decision::Commit);
    assert_eq!(result.participants.len(), 6);
    for record in result.participants.values() {
        assert_eq!(record.vote, Some(true));
        assert_eq!(record.status, TransactionStatus::Commit);
        assert!(record.decision_delivered);
    }
    for (_, node) in &cluster.nodes {
        assert_eq!(node.transaction().status(), TransactionStatus::Commit);
        assert_eq!(node.snapshot().value, Some(20));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_percent_rolls_everyone_back() {
    let cluster = Cluster::start(6).await;
    let coordinator = cluster.coordinator();

    let result = coordinator.run_transaction(request(20, 0)).await;

    assert!(!result.committed);
    assert_eq!(result.decision, Decision::Rollback);
    for record in result.participants.values() {
        assert_eq!(record.vote, Some(false));
        assert_eq!(record.status, TransactionStatus::Rollback);
    }
    assert!(cluster
        .actual_statuses()
        .iter()
        .all(|s| *s == TransactionStatus::Rollback));
    assert_eq!(coordinator.stats().refused_votes, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn data_fault_on_one_participant_rolls_back_all() {
    let cluster = Cluster::start(6).await;
    cluster.node(3).set_fault(FaultKind::Data);
    let coordinator = cluster.coordinator();

    let result = coordinator.run_transaction(request(20, 100)).await;

    assert!(!result.committed);
    for (id, record) in &result.participants {
        assert_eq!(record.vote, Some(*id != 3), "vote of participant {id}");
        assert_eq!(record.status, TransactionStatus::Rollback);
    }
    assert!(cluster
        .actual_statuses()
        .iter()
        .all(|s| *s == TransactionStatus::Rollback));
    for (_, node) in &cluster.nodes {
        assert!(!node.transaction().prepared());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_participant_votes_no() {
    let cluster = Cluster::start(6).await;
    cluster.node(0).set_fault(FaultKind::Network);
    // Let the server close its listening socket.
    sleep(Duration::from_millis(100)).await;
    let coordinator = cluster.coordinator();

    let result = coordinator.run_transaction(request(20, 100)).await;

    assert!(!result.committed);
    let unreachable = &result.participants[&0];
    assert!(!unreachable.reachable);
    assert_eq!(unreachable.vote, Some(false));
    assert!(!unreachable.decision_delivered);

    for id in 1..6 {
        assert!(result.participants[&id].reachable);
        assert_eq!(result.participants[&id].status, TransactionStatus::Rollback);
        assert_eq!(cluster.node(id).transaction().status(), TransactionStatus::Rollback);
    }
    // Never contacted, so it diverges from the decision.
    assert_eq!(cluster.node(0).transaction().status(), TransactionStatus::Idle);
    assert_eq!(coordinator.stats().unreachable, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_participant_times_out_and_late_reply_is_ignored() {
    let cluster = Cluster::start(6).await;
    cluster.node(1).set_fault(FaultKind::Timeout);
    let coordinator = cluster.coordinator();

    let started = Instant::now();
    let result = coordinator.run_transaction(request(20, 100)).await;
    let elapsed = started.elapsed();

    assert!(!result.committed);
    assert!(
        elapsed < Duration::from_millis(FAULT_DELAY_MS),
        "transaction waited for the stalled participant: {elapsed:?}"
    );
    assert_eq!(result.participants[&1].vote, Some(false));
    assert!(result.participants[&1].reachable);
    assert_eq!(coordinator.stats().timeouts, 1);
    assert!(cluster
        .actual_statuses()
        .iter()
        .all(|s| *s == TransactionStatus::Rollback));

    // Outlive the stall: nothing the slow participant does afterwards changes the outcome.
    sleep(Duration::from_millis(FAULT_DELAY_MS + 300)).await;
    assert_eq!(cluster.node(1).transaction().status(), TransactionStatus::Rollback);
    let statuses = coordinator.server_statuses();
    assert!(statuses
        .values()
        .all(|r| r.status == TransactionStatus::Rollback));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn prepare_phase_runs_participants_concurrently() {
    let cluster = Cluster::start(6).await;
    for (_, node) in &cluster.nodes {
        node.set_fault(FaultKind::Timeout);
    }
    let coordinator = cluster.coordinator();

    let started = Instant::now();
    let result = coordinator.run_transaction(request(1, 100)).await;
    let elapsed = started.elapsed();

    assert!(!result.committed);
    assert_eq!(coordinator.stats().timeouts, 6);
    // Sequential dispatch would take at least 6 x 300ms.
    assert!(
        elapsed < Duration::from_millis(PREPARE_TIMEOUT_MS * 4),
        "PREPARE phase was not concurrent: {elapsed:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reachable_participants_always_match_the_decision() {
    let cluster = Cluster::start(4).await;
    let coordinator = cluster.coordinator();

    for round in 0..10 {
        let result = coordinator.run_transaction(request(round, 50)).await;
        let expected = result.decision.status();
        for (id, status) in cluster.actual_statuses().into_iter().enumerate() {
            assert_eq!(status, expected, "round {round}, participant {id}");
        }
        assert_eq!(
            result.committed,
            result.participants.values().all(|r| r.vote == Some(true))
        );
    }

    let stats = coordinator.stats();
    assert_eq!(stats.commits + stats.rollbacks, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn consecutive_transactions_reuse_participants() {
    let cluster = Cluster::start(3).await;
    let coordinator = cluster.coordinator();

    assert!(coordinator.run_transaction(request(1, 100)).await.committed);
    assert!(!coordinator.run_transaction(request(2, 0)).await.committed);
    let last = coordinator.run_transaction(request(3, 100)).await;
    assert!(last.committed);

    for (_, node) in &cluster.nodes {
        assert_eq!(node.snapshot().value, Some(3));
        assert_eq!(node.transaction().status(), TransactionStatus::Commit);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shut_down_coordinator_fails_soft_without_contacting_anyone() {
    let cluster = Cluster::start(3).await;
    let coordinator = cluster.coordinator();
    coordinator.shutdown();

    let result = coordinator.run_transaction(request(1, 100)).await;

    assert!(!result.committed);
    assert!(result.participants.values().all(|r| r.vote.is_none()));
    assert!(cluster
        .actual_statuses()
        .iter()
        .all(|s| *s == TransactionStatus::Idle));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn status_registry_starts_idle_and_is_readable_anytime() {
    let cluster = Cluster::start(2).await;
    let coordinator = Arc::new(cluster.coordinator());

    let before = coordinator.server_statuses();
    assert!(before
        .values()
        .all(|r| r.status == TransactionStatus::Idle && r.vote.is_none()));

    let runner = Arc::clone(&coordinator);
    let txn = tokio::spawn(async move { runner.run_transaction(request(5, 100)).await });
    // Reads during the transaction never block on it.
    for _ in 0..10 {
        assert_eq!(coordinator.server_statuses().len(), 2);
        sleep(Duration::from_millis(5)).await;
    }

    let result = txn.await.unwrap();
    assert!(result.committed);
    assert_eq!(coordinator.server_statuses(), result.participants);
}
