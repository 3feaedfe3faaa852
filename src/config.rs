use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BASE_PORT: u16 = 5000;
pub const DEFAULT_PARTICIPANT_COUNT: usize = 6;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Duplicate participant id: {0}")]
    DuplicateParticipant(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub coordinator: CoordinatorConfig,
    pub participant: ParticipantConfig,
    pub participants: Vec<PeerConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: usize,
    pub address: String,
}

impl PeerConfig {
    pub fn new(id: usize, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }

    /// `count` local peers on consecutive ports starting at `base_port`.
    pub fn local_range(base_port: u16, count: usize) -> Vec<PeerConfig> {
        (0..count)
            .map(|i| PeerConfig::new(i, format!("127.0.0.1:{}", base_port as usize + i)))
            .collect()
    }

    /// First id that appears more than once in `peers`.
    pub fn duplicate_id(peers: &[PeerConfig]) -> Option<usize> {
        let mut seen = HashSet::new();
        peers.iter().map(|peer| peer.id).find(|id| !seen.insert(*id))
    }

    /// Comma-separated addresses; ids are assigned by position.
    pub fn parse_list(list: &str) -> Vec<PeerConfig> {
        list.split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .enumerate()
            .map(|(id, addr)| PeerConfig::new(id, addr))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bound on one PREPARE exchange (connect, send, read the vote).
    pub prepare_timeout_ms: u64,
    /// Bound on delivering COMMIT/ROLLBACK to one participant.
    pub decision_timeout_ms: u64,
    /// Worker pool size; anything below the participant count is raised to it.
    pub worker_pool_size: usize,
}

impl CoordinatorConfig {
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn decision_timeout(&self) -> Duration {
        Duration::from_millis(self.decision_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 5000,
            decision_timeout_ms: 5000,
            worker_pool_size: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    /// How long PREPARE stalls while the timeout fault is active.
    pub fault_delay_ms: u64,
    /// When set, the network fault clears itself after this long.
    pub network_recovery_ms: Option<u64>,
}

impl ParticipantConfig {
    pub fn fault_delay(&self) -> Duration {
        Duration::from_millis(self.fault_delay_ms)
    }

    pub fn network_recovery(&self) -> Option<Duration> {
        self.network_recovery_ms.map(Duration::from_millis)
    }
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            fault_delay_ms: 10_000,
            network_recovery_ms: Some(10_000),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match PeerConfig::duplicate_id(&self.participants) {
            Some(id) => Err(ConfigError::DuplicateParticipant(id)),
            None => Ok(()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            participant: ParticipantConfig::default(),
            participants: PeerConfig::local_range(DEFAULT_BASE_PORT, DEFAULT_PARTICIPANT_COUNT),
        }
    }
}
