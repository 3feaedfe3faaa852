use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

use super::Decision;
use crate::config::PeerConfig;
use crate::network::PrepareOutcome;
use crate::protocol::TransactionStatus;

/// The coordinator's last observation of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantRecord {
    pub id: usize,
    pub address: String,
    pub status: TransactionStatus,
    pub vote: Option<bool>,
    /// A connection was established during the last PREPARE.
    pub reachable: bool,
    /// The last decision was confirmed processed by the participant.
    pub decision_delivered: bool,
}

impl ParticipantRecord {
    fn new(peer: &PeerConfig) -> Self {
        Self {
            id: peer.id,
            address: peer.address.clone(),
            status: TransactionStatus::Idle,
            vote: None,
            reachable: false,
            decision_delivered: false,
        }
    }
}

/// Concurrent map of participant id to its last observed record.
///
/// Written once per completed phase per participant; read at any time
/// without touching the network.
pub struct StatusRegistry {
    records: DashMap<usize, ParticipantRecord>,
}

impl StatusRegistry {
    pub fn new(peers: &[PeerConfig]) -> Self {
        let records = DashMap::new();
        for peer in peers {
            records.insert(peer.id, ParticipantRecord::new(peer));
        }
        Self { records }
    }

    pub fn record_vote(&self, id: usize, outcome: &PrepareOutcome) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.vote = Some(outcome.vote());
            record.reachable = outcome.reachable();
            record.decision_delivered = false;
            record.status = if outcome.vote() {
                TransactionStatus::Prepare
            } else {
                TransactionStatus::Rollback
            };
        }
    }

    /// An undelivered decision leaves the PREPARE-phase status in place, so
    /// divergence stays visible.
    pub fn record_decision(&self, id: usize, decision: Decision, delivered: bool) {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.decision_delivered = delivered;
            if delivered {
                record.status = decision.status();
            }
        }
    }

    pub fn get(&self, id: usize) -> Option<ParticipantRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<usize, ParticipantRecord> {
        self.records
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}
