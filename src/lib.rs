// Protocol engine
pub mod protocol;
pub mod participant;
pub mod coordinator;

// Transport and ambient modules
pub mod network;
pub mod config;

// Public exports
pub use config::{Config, CoordinatorConfig, ParticipantConfig, PeerConfig};
pub use coordinator::{Coordinator, Decision, TransactionRequest, TransactionResult};
pub use participant::{Participant, ParticipantServer};
pub use protocol::{Command, FaultKind, Response, StatusReport, TransactionStatus};
