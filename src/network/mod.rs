pub mod client;
pub mod error;
pub mod monitor;

pub use client::{ParticipantClient, PrepareOutcome};
pub use error::NetworkError;
pub use monitor::{MonitorState, StatusMonitor};
