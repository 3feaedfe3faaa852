use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::Decision;
use crate::network::PrepareOutcome;

/// Running totals for one coordinator.
#[derive(Debug, Default)]
pub struct TransactionStats {
    commits: AtomicU64,
    rollbacks: AtomicU64,
    refused_votes: AtomicU64,
    timeouts: AtomicU64,
    unreachable: AtomicU64,
    protocol_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub commits: u64,
    pub rollbacks: u64,
    pub refused_votes: u64,
    pub timeouts: u64,
    pub unreachable: u64,
    pub protocol_errors: u64,
}

impl TransactionStats {
    pub fn record_decision(&self, decision: Decision) {
        match decision {
            Decision::Commit => self.commits.fetch_add(1, Ordering::Relaxed),
            Decision::Rollback => self.rollbacks.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_outcome(&self, outcome: &PrepareOutcome) {
        let counter = match outcome {
            PrepareOutcome::Prepared => return,
            PrepareOutcome::Refused => &self.refused_votes,
            PrepareOutcome::TimedOut => &self.timeouts,
            PrepareOutcome::Unreachable(_) => &self.unreachable,
            PrepareOutcome::Invalid(_) | PrepareOutcome::Closed(_) => &self.protocol_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            refused_votes: self.refused_votes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            unreachable: self.unreachable.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}
