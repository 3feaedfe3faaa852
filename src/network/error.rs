use thiserror::Error;

use crate::protocol::{ProtocolError, Response};

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection error to {address}: {source}")]
    ConnectionError {
        address: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Timeout error")]
    TimeoutError,

    #[error("Connection closed before a reply was received")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    #[error("Unexpected response: {}", .0.encode())]
    UnexpectedResponse(Response),
}
