use rand::Rng;
use log::{debug, info};

use crate::protocol::{Command, FaultKind, Response, StatusReport, TransactionStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultFlags {
    pub timeout_active: bool,
    pub network_active: bool,
    pub data_active: bool,
}

impl FaultFlags {
    pub fn set(&mut self, kind: FaultKind) {
        match kind {
            FaultKind::Timeout => self.timeout_active = true,
            FaultKind::Network => self.network_active = true,
            FaultKind::Data => self.data_active = true,
        }
    }

    pub fn clear(&mut self) {
        *self = FaultFlags::default();
    }

    pub fn any(&self) -> bool {
        self.timeout_active || self.network_active || self.data_active
    }
}

/// Invariant: `prepared` is only ever true while `status` is `Prepare`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionState {
    prepared: bool,
    status: TransactionStatus,
    current_value: Option<i64>,
}

impl TransactionState {
    pub fn prepared(&self) -> bool {
        self.prepared
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn current_value(&self) -> Option<i64> {
        self.current_value
    }

    fn vote_yes(&mut self, value: i64) {
        self.prepared = true;
        self.current_value = Some(value);
        self.status = TransactionStatus::Prepare;
    }

    fn roll_back(&mut self) {
        self.prepared = false;
        self.status = TransactionStatus::Rollback;
    }

    fn commit(&mut self) {
        self.prepared = false;
        self.status = TransactionStatus::Commit;
    }
}

/// What the connection handler should do after a command was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Reply(Response),
    /// Nothing to send back (COMMIT / ROLLBACK).
    Silent,
    /// Hold the connection for the fault delay, then close it without replying.
    Stall,
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantState {
    txn: TransactionState,
    faults: FaultFlags,
    network_epoch: u64,
}

impl ParticipantState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction(&self) -> TransactionState {
        self.txn
    }

    pub fn faults(&self) -> FaultFlags {
        self.faults
    }

    /// Bumped each time the network fault is raised.
    pub fn network_epoch(&self) -> u64 {
        self.network_epoch
    }

    pub fn report(&self) -> StatusReport {
        StatusReport {
            status: self.txn.status,
            timeout_active: self.faults.timeout_active,
            network_active: self.faults.network_active,
            data_active: self.faults.data_active,
            value: self.txn.current_value,
        }
    }

    pub fn set_fault(&mut self, kind: FaultKind) {
        self.faults.set(kind);
        if kind == FaultKind::Network {
            self.network_epoch += 1;
        }
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    /// Clears the network fault if it was raised at `epoch` and not since.
    pub fn recover_network(&mut self, epoch: u64) -> bool {
        if self.faults.network_active && self.network_epoch == epoch {
            self.faults.network_active = false;
            true
        } else {
            false
        }
    }

    /// The whole transition table. The network fault is enforced at accept
    /// time by the server, so PREPARE only looks at the timeout and data flags.
    pub fn apply<R: Rng>(&mut self, command: &Command, rng: &mut R) -> Action {
        match *command {
            Command::Prepare {
                value,
                success_percentage,
            } => self.prepare(value, success_percentage, rng),
            Command::Commit => {
                if self.txn.prepared && self.txn.status == TransactionStatus::Prepare && !self.faults.any() {
                    self.txn.commit();
                    info!("Committed value {:?}", self.txn.current_value);
                } else {
                    debug!(
                        "Ignoring COMMIT (status={}, prepared={}, faults={:?})",
                        self.txn.status, self.txn.prepared, self.faults
                    );
                }
                Action::Silent
            }
            Command::Rollback => {
                self.txn.roll_back();
                info!("Rolled back");
                Action::Silent
            }
            Command::GetStatus => Action::Reply(Response::Status(self.report())),
            Command::SetFault(kind) => {
                self.set_fault(kind);
                info!("Fault {kind} enabled");
                Action::Reply(Response::FaultSet(kind))
            }
            Command::ClearFaults => {
                self.clear_faults();
                info!("All faults cleared");
                Action::Reply(Response::FaultsCleared)
            }
        }
    }

    fn prepare<R: Rng>(&mut self, value: i64, success_percentage: u8, rng: &mut R) -> Action {
        if self.faults.timeout_active {
            info!("Timeout fault active, stalling PREPARE for value {value}");
            return Action::Stall;
        }

        if self.faults.data_active {
            self.txn.roll_back();
            info!("Data fault active, refusing to prepare value {value}");
            return Action::Reply(Response::No);
        }

        let roll: u8 = rng.random_range(0..100);
        if roll < success_percentage {
            self.txn.vote_yes(value);
            info!("Prepared for value {value} (roll={roll}, success_percentage={success_percentage})");
            Action::Reply(Response::Ok)
        } else {
            self.txn.roll_back();
            info!("Failed to prepare value {value} (roll={roll}, success_percentage={success_percentage})");
            Action::Reply(Response::No)
        }
    }
}
