//! Line-oriented wire protocol spoken between the coordinator and participants.
//!
//! Every request is a single newline-terminated ASCII line; replies, when the
//! command has one, are a single line as well.

pub mod command;
pub mod error;
pub mod status;

pub use self::command::{Command, FaultKind, Response};
pub use self::error::ProtocolError;
pub use self::status::{StatusReport, TransactionStatus};

/// Strips the line terminator (`\n` or `\r\n`) and any trailing whitespace.
/// Leading whitespace is kept, so it makes the line malformed.
pub fn trim_line(line: &str) -> &str {
    line.trim_end()
}

/// Appends the line terminator used on the wire.
pub fn frame(line: &str) -> String {
    let mut framed = String::with_capacity(line.len() + 1);
    framed.push_str(line);
    framed.push('\n');
    framed
}
