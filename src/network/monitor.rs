use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use super::ParticipantClient;
use crate::protocol::StatusReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No poll has completed yet.
    Unknown,
    Online(StatusReport),
    Offline,
}

/// Polls one participant with `GET_STATUS` on a fixed interval and publishes
/// the latest answer. Each poll uses its own connection and never changes
/// the participant's state.
pub struct StatusMonitor {
    state: Arc<RwLock<MonitorState>>,
    client: ParticipantClient,
    interval: Duration,
}

impl StatusMonitor {
    pub fn new(client: ParticipantClient, interval: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(MonitorState::Unknown)),
            client,
            interval,
        }
    }

    pub fn target(&self) -> &str {
        self.client.address()
    }

    pub fn state(&self) -> Arc<RwLock<MonitorState>> {
        Arc::clone(&self.state)
    }

    pub async fn run(self) {
        loop {
            let new_state = Self::check_once(&self.client).await;

            {
                let mut guard = self.state.write().await;
                *guard = new_state;
            }

            sleep(self.interval).await;
        }
    }

    pub async fn check_once(client: &ParticipantClient) -> MonitorState {
        match client.get_status().await {
            Ok(report) => MonitorState::Online(report),
            Err(e) => {
                log::debug!("Status poll of {} failed: {e}", client.address());
                MonitorState::Offline
            }
        }
    }
}
