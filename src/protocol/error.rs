use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty line")]
    Empty,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown response: {0}")]
    UnknownResponse(String),

    #[error("Wrong field count in '{line}': expected {expected}, got {actual}")]
    FieldCount {
        line: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("Success percentage out of range: {0}")]
    PercentageOutOfRange(i64),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid status field: {0}")]
    InvalidField(String),
}
