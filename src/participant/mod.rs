//! Participant side of the protocol: the transaction state machine, the fault
//! injector and the TCP server that drives them.

mod error;
mod node;
mod server;
mod state;

pub use self::error::ParticipantError;
pub use self::node::Participant;
pub use self::server::{handle_connection, ParticipantServer};
pub use self::state::{Action, FaultFlags, ParticipantState, TransactionState};

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use log::error;

use crate::config::ParticipantConfig;

/// Binds a participant on `address` and serves it on a background task.
pub async fn spawn(
    address: &str,
    config: ParticipantConfig,
) -> Result<(SocketAddr, Arc<Participant>, JoinHandle<Result<(), ParticipantError>>), ParticipantError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ParticipantError::Bind {
            address: address.to_string(),
            source,
        })?;
    let local_addr = listener.local_addr()?;
    let participant = Arc::new(Participant::new(local_addr.to_string(), config));
    let server = ParticipantServer::from_listener(listener, Arc::clone(&participant))?;
    let handle = tokio::spawn(async move {
        let result = server.run().await;
        if let Err(e) = &result {
            error!("[{local_addr}] Participant server stopped: {e}");
        }
        result
    });
    Ok((local_addr, participant, handle))
}
