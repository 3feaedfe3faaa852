use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::sleep;
use log::{debug, error, info, warn};

use super::{Action, Participant, ParticipantError};
use crate::protocol;

const REBIND_BACKOFF: Duration = Duration::from_millis(200);

/// Accepts coordinator and observer connections for one participant.
///
/// While the network fault is active the listening socket is closed, so new
/// connection attempts are refused by the OS before any command is read. The
/// socket is re-bound on the same address once the fault clears.
pub struct ParticipantServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    participant: Arc<Participant>,
}

impl ParticipantServer {
    pub async fn bind(address: &str, participant: Arc<Participant>) -> Result<Self, ParticipantError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ParticipantError::Bind {
                address: address.to_string(),
                source,
            })?;
        Self::from_listener(listener, participant)
    }

    pub fn from_listener(
        listener: TcpListener,
        participant: Arc<Participant>,
    ) -> Result<Self, ParticipantError> {
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            participant,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> Result<(), ParticipantError> {
        let ParticipantServer {
            listener,
            local_addr,
            participant,
        } = self;
        let mut reachability = participant.subscribe_reachability();
        let mut listener = Some(listener);

        info!("[{}] Participant listening on {local_addr}", participant.name());

        loop {
            let active = match listener.take() {
                Some(l) => l,
                None => match Self::rebind(local_addr, &participant, &mut reachability).await {
                    Some(l) => l,
                    None => return Ok(()),
                },
            };

            Self::accept_until_unreachable(&active, &participant, &mut reachability).await;
            drop(active);
            info!("[{}] Network fault active, {local_addr} is offline", participant.name());
        }
    }

    /// Waits for the network fault to clear, then binds `local_addr` again.
    /// A failed bind is retried until it succeeds or the fault is raised
    /// again. Returns `None` once the participant is gone.
    async fn rebind(
        local_addr: SocketAddr,
        participant: &Arc<Participant>,
        reachability: &mut watch::Receiver<bool>,
    ) -> Option<TcpListener> {
        loop {
            reachability.wait_for(|up| *up).await.ok()?;

            match TcpListener::bind(local_addr).await {
                Ok(listener) => {
                    info!("[{}] Back online on {local_addr}", participant.name());
                    return Some(listener);
                }
                Err(e) => {
                    error!(
                        "[{}] Failed to re-bind {local_addr}: {e}, retrying in {REBIND_BACKOFF:?}",
                        participant.name()
                    );
                    sleep(REBIND_BACKOFF).await;
                }
            }
        }
    }

    async fn accept_until_unreachable(
        listener: &TcpListener,
        participant: &Arc<Participant>,
        reachability: &mut watch::Receiver<bool>,
    ) {
        loop {
            if !*reachability.borrow_and_update() {
                return;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if !participant.is_reachable() {
                            debug!("[{}] Dropping connection from {peer}: network fault", participant.name());
                            drop(stream);
                            continue;
                        }
                        let participant = Arc::clone(participant);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, Arc::clone(&participant)).await {
                                warn!("[{}] Connection from {peer} failed: {e}", participant.name());
                            }
                        });
                    }
                    Err(e) => {
                        error!("[{}] Accept error: {e}", participant.name());
                        sleep(Duration::from_millis(50)).await;
                    }
                },
                changed = reachability.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Processes the lines of one connection in order until the peer closes it.
pub async fn handle_connection(
    stream: TcpStream,
    participant: Arc<Participant>,
) -> Result<(), ParticipantError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        debug!("[{}] Received '{line}'", participant.name());

        match participant.handle_line(&line) {
            Action::Reply(response) => {
                writer
                    .write_all(protocol::frame(&response.encode()).as_bytes())
                    .await?;
                writer.flush().await?;
            }
            Action::Silent => {}
            Action::Stall => {
                sleep(participant.fault_delay()).await;
                debug!("[{}] Abandoning stalled PREPARE", participant.name());
                return Ok(());
            }
        }
    }

    Ok(())
}
