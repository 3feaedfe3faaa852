use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use log::{debug, info};

use super::NetworkError;
use crate::protocol::{self, Command, FaultKind, Response, StatusReport};

/// Upper bound on how long an abandoned PREPARE connection is kept around to
/// swallow a late reply.
const LATE_REPLY_DRAIN: Duration = Duration::from_secs(60);

/// How one PREPARE exchange ended, from the coordinator's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The participant answered `OK`.
    Prepared,
    /// The participant answered `NO`.
    Refused,
    /// The participant answered with something other than `OK`/`NO`.
    Invalid(String),
    /// The participant closed the connection (or it broke) without a vote.
    Closed(String),
    /// Connected, but no vote arrived before the deadline.
    TimedOut,
    /// The connection could not be established.
    Unreachable(String),
}

impl PrepareOutcome {
    pub fn vote(&self) -> bool {
        matches!(self, PrepareOutcome::Prepared)
    }

    /// Whether a connection was established during PREPARE.
    pub fn reachable(&self) -> bool {
        !matches!(self, PrepareOutcome::Unreachable(_))
    }
}

/// Talks to one participant, opening a fresh connection for every request.
#[derive(Debug, Clone)]
pub struct ParticipantClient {
    address: String,
    timeout: Duration,
}

impl ParticipantClient {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self, deadline: Instant) -> Result<TcpStream, NetworkError> {
        match timeout_at(deadline, TcpStream::connect(&self.address)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(NetworkError::ConnectionError {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(NetworkError::TimeoutError),
        }
    }

    /// Sends a command that expects a one-line reply and returns that reply.
    pub async fn request(&self, command: &Command) -> Result<Response, NetworkError> {
        let deadline = Instant::now() + self.timeout;
        let stream = self.connect(deadline).await?;
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let exchange = async {
            writer
                .write_all(protocol::frame(&command.encode()).as_bytes())
                .await?;
            let mut reply = String::new();
            let n = reader.read_line(&mut reply).await?;
            Ok::<_, NetworkError>((n, reply))
        };

        let (n, reply) = timeout_at(deadline, exchange)
            .await
            .map_err(|_| NetworkError::TimeoutError)??;
        if n == 0 {
            return Err(NetworkError::ConnectionClosed);
        }

        debug!("{} replied '{}' to {}", self.address, protocol::trim_line(&reply), command.encode());
        Ok(Response::decode(&reply)?)
    }

    /// Sends a fire-and-forget command, then half-closes and waits for the
    /// participant to close its end, which it does only after processing.
    pub async fn deliver(&self, command: &Command) -> Result<(), NetworkError> {
        let deadline = Instant::now() + self.timeout;
        let stream = self.connect(deadline).await?;
        let (mut reader, mut writer) = stream.into_split();

        let exchange = async {
            writer
                .write_all(protocol::frame(&command.encode()).as_bytes())
                .await?;
            writer.shutdown().await?;
            let mut rest = Vec::new();
            reader.read_to_end(&mut rest).await?;
            Ok::<_, NetworkError>(())
        };

        timeout_at(deadline, exchange)
            .await
            .map_err(|_| NetworkError::TimeoutError)?
    }

    /// Runs one PREPARE exchange under a single deadline covering connect,
    /// send and the vote. Never fails: every error is folded into the outcome.
    pub async fn prepare(&self, value: i64, success_percentage: u8) -> PrepareOutcome {
        let deadline = Instant::now() + self.timeout;
        let stream = match self.connect(deadline).await {
            Ok(stream) => stream,
            Err(e) => return PrepareOutcome::Unreachable(e.to_string()),
        };

        let command = Command::Prepare {
            value,
            success_percentage,
        };
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let exchange = async {
            writer
                .write_all(protocol::frame(&command.encode()).as_bytes())
                .await?;
            let mut reply = String::new();
            let n = reader.read_line(&mut reply).await?;
            Ok::<_, std::io::Error>((n, reply))
        };
        let result = timeout_at(deadline, exchange).await;

        match result {
            Ok(Ok((0, _))) => PrepareOutcome::Closed("closed without a vote".to_string()),
            Ok(Ok((_, reply))) => match Response::decode(&reply) {
                Ok(Response::Ok) => PrepareOutcome::Prepared,
                Ok(Response::No) => PrepareOutcome::Refused,
                Ok(other) => PrepareOutcome::Invalid(other.encode()),
                Err(e) => PrepareOutcome::Invalid(e.to_string()),
            },
            Ok(Err(e)) => PrepareOutcome::Closed(e.to_string()),
            Err(_) => {
                self.drain_late_reply(reader, writer);
                PrepareOutcome::TimedOut
            }
        }
    }

    // The vote has already been counted as NO; whatever still arrives is logged and dropped.
    fn drain_late_reply(&self, mut reader: BufReader<OwnedReadHalf>, writer: OwnedWriteHalf) {
        let address = self.address.clone();
        tokio::spawn(async move {
            let _writer = writer;
            let mut late = String::new();
            match timeout(LATE_REPLY_DRAIN, reader.read_line(&mut late)).await {
                Ok(Ok(0)) => debug!("{address} closed its timed-out PREPARE connection"),
                Ok(Ok(_)) => info!(
                    "Discarding late PREPARE reply '{}' from {address}",
                    protocol::trim_line(&late)
                ),
                Ok(Err(e)) => debug!("{address} timed-out PREPARE connection failed: {e}"),
                Err(_) => debug!("Giving up on late PREPARE reply from {address}"),
            }
        });
    }

    pub async fn get_status(&self) -> Result<StatusReport, NetworkError> {
        match self.request(&Command::GetStatus).await? {
            Response::Status(report) => Ok(report),
            other => Err(NetworkError::UnexpectedResponse(other)),
        }
    }

    pub async fn set_fault(&self, kind: FaultKind) -> Result<(), NetworkError> {
        match self.request(&Command::SetFault(kind)).await? {
            Response::FaultSet(acked) if acked == kind => Ok(()),
            other => Err(NetworkError::UnexpectedResponse(other)),
        }
    }

    pub async fn clear_faults(&self) -> Result<(), NetworkError> {
        match self.request(&Command::ClearFaults).await? {
            Response::FaultsCleared => Ok(()),
            other => Err(NetworkError::UnexpectedResponse(other)),
        }
    }
}
