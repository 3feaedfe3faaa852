use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::{CoordinatorError, ParticipantRecord};
use crate::protocol::{Command, TransactionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRequest {
    value: i64,
    success_percentage: u8,
}

impl TransactionRequest {
    pub fn new(value: i64, success_percentage: i64) -> Result<Self, CoordinatorError> {
        if !(0..=100).contains(&success_percentage) {
            return Err(CoordinatorError::InvalidPercentage(success_percentage));
        }
        Ok(Self {
            value,
            success_percentage: success_percentage as u8,
        })
    }

    pub fn value(&self) -> i64 {
        self.value
    }

    pub fn success_percentage(&self) -> u8 {
        self.success_percentage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Commit,
    Rollback,
}

impl Decision {
    /// Strict unanimity: a single missing or negative vote rolls everyone back.
    /// An empty set of votes commits vacuously.
    pub fn from_votes<I: IntoIterator<Item = bool>>(votes: I) -> Self {
        if votes.into_iter().all(|v| v) {
            Decision::Commit
        } else {
            Decision::Rollback
        }
    }

    pub fn command(&self) -> Command {
        match self {
            Decision::Commit => Command::Commit,
            Decision::Rollback => Command::Rollback,
        }
    }

    pub fn status(&self) -> TransactionStatus {
        match self {
            Decision::Commit => TransactionStatus::Commit,
            Decision::Rollback => TransactionStatus::Rollback,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionResult {
    pub committed: bool,
    pub decision: Decision,
    pub participants: BTreeMap<usize, ParticipantRecord>,
}
