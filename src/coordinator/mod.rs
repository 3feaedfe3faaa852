//! Coordinator side: drives PREPARE across every participant in parallel,
//! applies the unanimity rule and fans the decision back out.

mod error;
mod metrics;
mod registry;
mod transaction;

pub use self::error::CoordinatorError;
pub use self::metrics::{StatsSnapshot, TransactionStats};
pub use self::registry::{ParticipantRecord, StatusRegistry};
pub use self::transaction::{Decision, TransactionRequest, TransactionResult};

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use log::{error, info, warn};

use crate::config::{CoordinatorConfig, PeerConfig};
use crate::network::{ParticipantClient, PrepareOutcome};

pub struct Coordinator {
    config: CoordinatorConfig,
    peers: Vec<PeerConfig>,
    registry: Arc<StatusRegistry>,
    stats: TransactionStats,
    workers: Arc<Semaphore>,
    pool_size: usize,
    // Serializes whole transactions; participants within one are never serialized.
    transaction_lock: Mutex<()>,
}

impl Coordinator {
    /// Participant ids key the status registry, so they must be unique.
    pub fn new(config: CoordinatorConfig, peers: Vec<PeerConfig>) -> Result<Self, CoordinatorError> {
        if let Some(id) = PeerConfig::duplicate_id(&peers) {
            return Err(CoordinatorError::DuplicateParticipant(id));
        }
        let pool_size = config.worker_pool_size.max(peers.len()).max(1);
        Ok(Self {
            registry: Arc::new(StatusRegistry::new(&peers)),
            stats: TransactionStats::default(),
            workers: Arc::new(Semaphore::new(pool_size)),
            pool_size,
            transaction_lock: Mutex::new(()),
            config,
            peers,
        })
    }

    pub fn participants(&self) -> &[PeerConfig] {
        &self.peers
    }

    pub fn worker_pool_size(&self) -> usize {
        self.pool_size
    }

    /// Last observed state of every participant. Never blocks on the network.
    pub fn server_statuses(&self) -> BTreeMap<usize, ParticipantRecord> {
        self.registry.snapshot()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Closes the worker pool; later transactions fail soft without
    /// contacting any participant.
    pub fn shutdown(&self) {
        self.workers.close();
    }

    /// Runs one two-phase commit. Never returns an error: every failure ends
    /// up as a NO vote, and therefore as `committed == false`.
    pub async fn run_transaction(&self, request: TransactionRequest) -> TransactionResult {
        let _guard = self.transaction_lock.lock().await;

        info!(
            "Starting PREPARE phase for value {} (success_percentage={}) across {} participants",
            request.value(),
            request.success_percentage(),
            self.peers.len()
        );

        let outcomes = match self.prepare_phase(request).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!("Transaction failed before dispatch: {e}");
                self.stats.record_decision(Decision::Rollback);
                return TransactionResult {
                    committed: false,
                    decision: Decision::Rollback,
                    participants: self.registry.snapshot(),
                };
            }
        };

        let decision = Decision::from_votes(outcomes.iter().map(|(_, outcome)| outcome.vote()));
        info!("Starting {decision} phase");

        let reachable: Vec<&PeerConfig> = self
            .peers
            .iter()
            .zip(&outcomes)
            .filter(|(_, (_, outcome))| outcome.reachable())
            .map(|(peer, _)| peer)
            .collect();
        self.decision_phase(decision, &reachable).await;

        self.stats.record_decision(decision);
        info!("Transaction finished: {decision}");

        TransactionResult {
            committed: decision == Decision::Commit,
            decision,
            participants: self.registry.snapshot(),
        }
    }

    /// All permits are taken up front so either every participant is
    /// contacted or none is.
    async fn acquire_workers(&self, count: usize) -> Result<Vec<OwnedSemaphorePermit>, CoordinatorError> {
        let mut permits = Vec::with_capacity(count);
        for _ in 0..count {
            let permit = Arc::clone(&self.workers)
                .acquire_owned()
                .await
                .map_err(|_| CoordinatorError::PoolClosed)?;
            permits.push(permit);
        }
        Ok(permits)
    }

    async fn prepare_phase(
        &self,
        request: TransactionRequest,
    ) -> Result<Vec<(usize, PrepareOutcome)>, CoordinatorError> {
        let permits = self.acquire_workers(self.peers.len()).await?;
        let timeout = self.config.prepare_timeout();

        let handles: Vec<_> = self
            .peers
            .iter()
            .zip(permits)
            .map(|(peer, permit)| {
                let client = ParticipantClient::new(&peer.address, timeout);
                let registry = Arc::clone(&self.registry);
                let id = peer.id;
                let task = tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = client
                        .prepare(request.value(), request.success_percentage())
                        .await;
                    if !outcome.vote() {
                        warn!("Participant {id} ({}) did not prepare: {outcome:?}", client.address());
                    }
                    registry.record_vote(id, &outcome);
                    outcome
                });
                (id, task)
            })
            .collect();

        // Barrier: every outcome, vote or timeout, is in before deciding.
        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = PrepareOutcome::Closed(format!("prepare worker failed: {e}"));
                    self.registry.record_vote(id, &outcome);
                    outcome
                }
            };
            self.stats.record_outcome(&outcome);
            outcomes.push((id, outcome));
        }

        Ok(outcomes)
    }

    /// Best effort: failures are logged and recorded, never retried, and never
    /// change the decision.
    async fn decision_phase(&self, decision: Decision, targets: &[&PeerConfig]) {
        let permits = match self.acquire_workers(targets.len()).await {
            Ok(permits) => permits,
            Err(e) => {
                warn!("Could not dispatch {decision}: {e}");
                for peer in targets {
                    self.registry.record_decision(peer.id, decision, false);
                }
                return;
            }
        };
        let timeout = self.config.decision_timeout();
        let command = decision.command();

        let handles: Vec<_> = targets
            .iter()
            .zip(permits)
            .map(|(peer, permit)| {
                let client = ParticipantClient::new(&peer.address, timeout);
                let registry = Arc::clone(&self.registry);
                let id = peer.id;
                let task = tokio::spawn(async move {
                    let _permit = permit;
                    let delivered = match client.deliver(&command).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!("Failed to deliver {decision} to participant {id} ({}): {e}", client.address());
                            false
                        }
                    };
                    registry.record_decision(id, decision, delivered);
                });
                (id, task)
            })
            .collect();

        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!("Decision worker for participant {id} failed: {e}");
                self.registry.record_decision(id, decision, false);
            }
        }
    }
}
