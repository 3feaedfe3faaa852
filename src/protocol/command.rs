use std::fmt;

use super::{ProtocolError, StatusReport};
use super::status::STATUS_PREFIX;

/// Injectable participant faults, addressed on the wire as `ERROR1`..`ERROR3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// The participant stalls PREPARE past the coordinator's timeout.
    Timeout,
    /// The participant drops every new connection.
    Network,
    /// The participant votes NO without drawing.
    Data,
}

impl FaultKind {
    pub const ALL: [FaultKind; 3] = [FaultKind::Timeout, FaultKind::Network, FaultKind::Data];

    pub fn code(&self) -> u8 {
        match self {
            FaultKind::Timeout => 1,
            FaultKind::Network => 2,
            FaultKind::Data => 3,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(FaultKind::Timeout),
            "2" => Some(FaultKind::Network),
            "3" => Some(FaultKind::Data),
            _ => None,
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Timeout => f.write_str("timeout"),
            FaultKind::Network => f.write_str("network"),
            FaultKind::Data => f.write_str("data"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Prepare { value: i64, success_percentage: u8 },
    Commit,
    Rollback,
    GetStatus,
    SetFault(FaultKind),
    ClearFaults,
}

impl Command {
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = super::trim_line(line);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        if line.starts_with("PREPARE") {
            return decode_prepare(line);
        }

        match line {
            "COMMIT" => Ok(Command::Commit),
            "ROLLBACK" => Ok(Command::Rollback),
            "GET_STATUS" => Ok(Command::GetStatus),
            "ERROR_CLEAR" => Ok(Command::ClearFaults),
            other => other
                .strip_prefix("ERROR")
                .and_then(FaultKind::from_code)
                .map(Command::SetFault)
                .ok_or_else(|| ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Command::Prepare {
                value,
                success_percentage,
            } => format!("PREPARE:{value}:{success_percentage}"),
            Command::Commit => "COMMIT".to_string(),
            Command::Rollback => "ROLLBACK".to_string(),
            Command::GetStatus => "GET_STATUS".to_string(),
            Command::SetFault(kind) => format!("ERROR{}", kind.code()),
            Command::ClearFaults => "ERROR_CLEAR".to_string(),
        }
    }

    /// COMMIT and ROLLBACK are fire-and-forget; everything else gets one line back.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Command::Commit | Command::Rollback)
    }
}

fn decode_prepare(line: &str) -> Result<Command, ProtocolError> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts[0] != "PREPARE" {
        return Err(ProtocolError::UnknownCommand(line.to_string()));
    }
    if parts.len() != 3 {
        return Err(ProtocolError::FieldCount {
            line: line.to_string(),
            expected: 3,
            actual: parts.len(),
        });
    }

    let value = parse_int(parts[1])?;
    let pct = parse_int(parts[2])?;
    if !(0..=100).contains(&pct) {
        return Err(ProtocolError::PercentageOutOfRange(pct));
    }

    Ok(Command::Prepare {
        value,
        success_percentage: pct as u8,
    })
}

fn parse_int(raw: &str) -> Result<i64, ProtocolError> {
    raw.parse::<i64>()
        .map_err(|_| ProtocolError::InvalidInteger(raw.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    No,
    Status(StatusReport),
    FaultSet(FaultKind),
    FaultsCleared,
}

impl Response {
    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let line = super::trim_line(line);
        match line {
            "" => Err(ProtocolError::Empty),
            "OK" => Ok(Response::Ok),
            "NO" => Ok(Response::No),
            "ERRORS_CLEARED" => Ok(Response::FaultsCleared),
            status if status.starts_with(STATUS_PREFIX) => {
                StatusReport::decode(status).map(Response::Status)
            }
            other => other
                .strip_prefix("ERROR")
                .and_then(|rest| rest.strip_suffix("_SET"))
                .and_then(FaultKind::from_code)
                .map(Response::FaultSet)
                .ok_or_else(|| ProtocolError::UnknownResponse(other.to_string())),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Response::Ok => "OK".to_string(),
            Response::No => "NO".to_string(),
            Response::Status(report) => report.encode(),
            Response::FaultSet(kind) => format!("ERROR{}_SET", kind.code()),
            Response::FaultsCleared => "ERRORS_CLEARED".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransactionStatus;

    #[test]
    fn decode_prepare() {
        let cmd = Command::decode("PREPARE:20:100\n").unwrap();
        assert_eq!(
            cmd,
            Command::Prepare {
                value: 20,
                success_percentage: 100
            }
        );
        assert_eq!(cmd.encode(), "PREPARE:20:100");
    }

    #[test]
    fn decode_prepare_accepts_negative_value() {
        let cmd = Command::decode("PREPARE:-7:0").unwrap();
        assert_eq!(
            cmd,
            Command::Prepare {
                value: -7,
                success_percentage: 0
            }
        );
    }

    #[test]
    fn decode_prepare_rejects_wrong_field_count() {
        assert!(matches!(
            Command::decode("PREPARE:20"),
            Err(ProtocolError::FieldCount { actual: 2, .. })
        ));
        assert!(matches!(
            Command::decode("PREPARE:1:2:3"),
            Err(ProtocolError::FieldCount { actual: 4, .. })
        ));
    }

    #[test]
    fn decode_prepare_rejects_bad_integers() {
        assert_eq!(
            Command::decode("PREPARE:abc:50"),
            Err(ProtocolError::InvalidInteger("abc".to_string()))
        );
        assert_eq!(
            Command::decode("PREPARE:1:"),
            Err(ProtocolError::InvalidInteger(String::new()))
        );
    }

    #[test]
    fn decode_prepare_rejects_percentage_out_of_range() {
        assert_eq!(
            Command::decode("PREPARE:1:101"),
            Err(ProtocolError::PercentageOutOfRange(101))
        );
        assert_eq!(
            Command::decode("PREPARE:1:-1"),
            Err(ProtocolError::PercentageOutOfRange(-1))
        );
    }

    #[test]
    fn decode_control_commands() {
        assert_eq!(Command::decode("COMMIT").unwrap(), Command::Commit);
        assert_eq!(Command::decode("ROLLBACK\r\n").unwrap(), Command::Rollback);
        assert_eq!(Command::decode("GET_STATUS").unwrap(), Command::GetStatus);
        assert_eq!(
            Command::decode("ERROR2").unwrap(),
            Command::SetFault(FaultKind::Network)
        );
        assert_eq!(Command::decode("ERROR_CLEAR").unwrap(), Command::ClearFaults);
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert!(matches!(
            Command::decode("commit"),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            Command::decode("ERROR4"),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert!(matches!(
            Command::decode("PREPARED:1:1"),
            Err(ProtocolError::UnknownCommand(_))
        ));
        assert_eq!(Command::decode("   "), Err(ProtocolError::Empty));
    }

    #[test]
    fn only_decisions_are_fire_and_forget() {
        assert!(!Command::Commit.expects_reply());
        assert!(!Command::Rollback.expects_reply());
        assert!(Command::GetStatus.expects_reply());
        assert!(Command::SetFault(FaultKind::Data).expects_reply());
    }

    #[test]
    fn decode_responses() {
        assert_eq!(Response::decode("OK\n").unwrap(), Response::Ok);
        assert_eq!(Response::decode("NO").unwrap(), Response::No);
        assert_eq!(
            Response::decode("ERROR3_SET").unwrap(),
            Response::FaultSet(FaultKind::Data)
        );
        assert_eq!(
            Response::decode("ERRORS_CLEARED").unwrap(),
            Response::FaultsCleared
        );

        match Response::decode("STATUS:COMMIT;ERR1=false;ERR2=false;ERR3=false;VALUE=20").unwrap() {
            Response::Status(report) => {
                assert_eq!(report.status, TransactionStatus::Commit);
                assert_eq!(report.value, Some(20));
            }
            other => panic!("expected status response, got {other:?}"),
        }

        assert!(matches!(
            Response::decode("MAYBE"),
            Err(ProtocolError::UnknownResponse(_))
        ));
    }

    #[test]
    fn fault_acknowledgements_use_the_fault_code() {
        assert_eq!(Response::FaultSet(FaultKind::Timeout).encode(), "ERROR1_SET");
        assert_eq!(Command::SetFault(FaultKind::Data).encode(), "ERROR3");
    }
}
