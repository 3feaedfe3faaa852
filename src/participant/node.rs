use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use log::{info, warn};

use super::{Action, FaultFlags, ParticipantState, TransactionState};
use crate::config::ParticipantConfig;
use crate::protocol::{Command, FaultKind, Response, StatusReport};

/// One participant process: its transaction state, fault flags and the
/// reachability signal the server listens on.
pub struct Participant {
    name: String,
    config: ParticipantConfig,
    state: Mutex<ParticipantState>,
    reachable: watch::Sender<bool>,
}

impl Participant {
    pub fn new(name: impl Into<String>, config: ParticipantConfig) -> Self {
        let (reachable, _) = watch::channel(true);
        Self {
            name: name.into(),
            config,
            state: Mutex::new(ParticipantState::new()),
            reachable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fault_delay(&self) -> Duration {
        self.config.fault_delay()
    }

    // The guarded state is always left consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, ParticipantState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> StatusReport {
        self.lock().report()
    }

    pub fn transaction(&self) -> TransactionState {
        self.lock().transaction()
    }

    pub fn faults(&self) -> FaultFlags {
        self.lock().faults()
    }

    pub fn is_reachable(&self) -> bool {
        *self.reachable.borrow()
    }

    pub fn subscribe_reachability(&self) -> watch::Receiver<bool> {
        self.reachable.subscribe()
    }

    /// Raises a fault in-process. Unlike `ERROR2` over the wire this never
    /// schedules the automatic network recovery.
    pub fn set_fault(&self, kind: FaultKind) {
        let mut state = self.lock();
        state.set_fault(kind);
        self.publish_reachability(&state);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.clear_faults();
        self.publish_reachability(&state);
    }

    fn publish_reachability(&self, state: &ParticipantState) {
        let up = !state.faults().network_active;
        self.reachable.send_if_modified(|current| {
            if *current == up {
                false
            } else {
                *current = up;
                true
            }
        });
    }

    /// Decodes and applies one wire line. Malformed lines are answered with
    /// `NO` and leave the state untouched.
    pub fn handle_line(self: &Arc<Self>, line: &str) -> Action {
        match Command::decode(line) {
            Ok(command) => self.handle(&command),
            Err(e) => {
                warn!("[{}] Protocol violation on '{}': {e}", self.name, line.trim_end());
                Action::Reply(Response::No)
            }
        }
    }

    pub fn handle(self: &Arc<Self>, command: &Command) -> Action {
        let (action, armed_epoch) = {
            let mut state = self.lock();
            let action = state.apply(command, &mut rand::rng());
            self.publish_reachability(&state);

            let armed_epoch = match command {
                Command::SetFault(FaultKind::Network) => Some(state.network_epoch()),
                _ => None,
            };
            (action, armed_epoch)
        };

        if let (Some(epoch), Some(after)) = (armed_epoch, self.config.network_recovery()) {
            self.arm_network_recovery(epoch, after);
        }

        action
    }

    fn arm_network_recovery(self: &Arc<Self>, epoch: u64, after: Duration) {
        let participant = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let mut state = participant.lock();
            if state.recover_network(epoch) {
                participant.publish_reachability(&state);
                info!("[{}] Network fault expired after {after:?}", participant.name);
            }
        });
    }
}
