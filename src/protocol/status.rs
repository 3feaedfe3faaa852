use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ProtocolError;

pub const STATUS_PREFIX: &str = "STATUS:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransactionStatus {
    #[default]
    Idle,
    Prepare,
    Commit,
    Rollback,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Idle => "IDLE",
            TransactionStatus::Prepare => "PREPARE",
            TransactionStatus::Commit => "COMMIT",
            TransactionStatus::Rollback => "ROLLBACK",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(TransactionStatus::Idle),
            "PREPARE" => Ok(TransactionStatus::Prepare),
            "COMMIT" => Ok(TransactionStatus::Commit),
            "ROLLBACK" => Ok(TransactionStatus::Rollback),
            other => Err(ProtocolError::InvalidStatus(other.to_string())),
        }
    }
}

/// Point-in-time view of a participant, as carried by the `GET_STATUS` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: TransactionStatus,
    pub timeout_active: bool,
    pub network_active: bool,
    pub data_active: bool,
    pub value: Option<i64>,
}

impl StatusReport {
    /// `STATUS:<state>;ERR1=<bool>;ERR2=<bool>;ERR3=<bool>;VALUE=<int|null>`
    pub fn encode(&self) -> String {
        let value = match self.value {
            Some(v) => v.to_string(),
            None => "null".to_string(),
        };
        format!(
            "{STATUS_PREFIX}{};ERR1={};ERR2={};ERR3={};VALUE={}",
            self.status, self.timeout_active, self.network_active, self.data_active, value
        )
    }

    pub fn decode(line: &str) -> Result<Self, ProtocolError> {
        let body = line
            .strip_prefix(STATUS_PREFIX)
            .ok_or_else(|| ProtocolError::UnknownResponse(line.to_string()))?;

        let fields: Vec<&str> = body.split(';').collect();
        if fields.len() != 5 {
            return Err(ProtocolError::FieldCount {
                line: line.to_string(),
                expected: 5,
                actual: fields.len(),
            });
        }

        let status = fields[0].parse::<TransactionStatus>()?;
        let timeout_active = parse_flag(fields[1], "ERR1")?;
        let network_active = parse_flag(fields[2], "ERR2")?;
        let data_active = parse_flag(fields[3], "ERR3")?;

        let value = match field_value(fields[4], "VALUE")? {
            "null" => None,
            raw => Some(
                raw.parse::<i64>()
                    .map_err(|_| ProtocolError::InvalidInteger(raw.to_string()))?,
            ),
        };

        Ok(Self {
            status,
            timeout_active,
            network_active,
            data_active,
            value,
        })
    }
}

fn field_value<'a>(field: &'a str, key: &str) -> Result<&'a str, ProtocolError> {
    match field.split_once('=') {
        Some((k, v)) if k == key => Ok(v),
        _ => Err(ProtocolError::InvalidField(field.to_string())),
    }
}

fn parse_flag(field: &str, key: &str) -> Result<bool, ProtocolError> {
    match field_value(field, key)? {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ProtocolError::InvalidField(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_report_encodes_null_value() {
        let report = StatusReport::default();
        assert_eq!(
            report.encode(),
            "STATUS:IDLE;ERR1=false;ERR2=false;ERR3=false;VALUE=null"
        );
    }

    #[test]
    fn decode_reads_flags_and_value() {
        let report =
            StatusReport::decode("STATUS:PREPARE;ERR1=true;ERR2=false;ERR3=true;VALUE=-20").unwrap();
        assert_eq!(report.status, TransactionStatus::Prepare);
        assert!(report.timeout_active);
        assert!(!report.network_active);
        assert!(report.data_active);
        assert_eq!(report.value, Some(-20));
    }

    #[test]
    fn decode_rejects_lowercase_state() {
        let err = StatusReport::decode("STATUS:commit;ERR1=false;ERR2=false;ERR3=false;VALUE=null")
            .unwrap_err();
        assert_eq!(err, ProtocolError::InvalidStatus("commit".to_string()));
    }

    #[test]
    fn decode_rejects_reordered_fields() {
        let err = StatusReport::decode("STATUS:IDLE;ERR2=false;ERR1=false;ERR3=false;VALUE=null")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField(_)));
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let err = StatusReport::decode("STATUS:IDLE;ERR1=false").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FieldCount {
                expected: 5,
                actual: 2,
                ..
            }
        ));
    }

    #[test]
    fn status_names_are_upper_case() {
        for status in [
            TransactionStatus::Idle,
            TransactionStatus::Prepare,
            TransactionStatus::Commit,
            TransactionStatus::Rollback,
        ] {
            assert_eq!(status.to_string().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("Commit".parse::<TransactionStatus>().is_err());
    }
}
