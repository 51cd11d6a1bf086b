//! Gateway acknowledgment decoding.

use std::fmt;

/// Leading byte of an accepting acknowledgment.
pub const ACK_BYTE: u8 = 0x06;

/// Why the gateway refused a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    InvalidTableType,
    InvalidProcessType,
    MissingRecordTags,
    EmptyRecordBody,
    /// Textual `ERROR` reply without a reason code.
    Unspecified,
}

impl RejectReason {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x0A => Some(RejectReason::InvalidTableType),
            0x0B => Some(RejectReason::InvalidProcessType),
            0x0C => Some(RejectReason::MissingRecordTags),
            0x0D => Some(RejectReason::EmptyRecordBody),
            _ => None,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RejectReason::InvalidTableType => "invalid table type",
            RejectReason::InvalidProcessType => "invalid process type",
            RejectReason::MissingRecordTags => "missing record tags",
            RejectReason::EmptyRecordBody => "empty record body",
            RejectReason::Unspecified => "error reported",
        })
    }
}

/// Decoded acknowledgment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckStatus {
    Accepted,
    Rejected(RejectReason),
    /// Anything else, including an empty read.
    Unknown(Vec<u8>),
}

impl AckStatus {
    /// Classifies the bytes read after a write. Never fails.
    pub fn parse(bytes: &[u8]) -> Self {
        let Some(&first) = bytes.first() else {
            return AckStatus::Unknown(Vec::new());
        };
        if first == ACK_BYTE {
            return AckStatus::Accepted;
        }
        if let Some(reason) = RejectReason::from_byte(first) {
            return AckStatus::Rejected(reason);
        }

        let text = String::from_utf8_lossy(bytes);
        let text = text.trim_start().to_ascii_uppercase();
        if text.starts_with("OK") {
            AckStatus::Accepted
        } else if text.starts_with("ERROR") {
            AckStatus::Rejected(RejectReason::Unspecified)
        } else {
            AckStatus::Unknown(bytes.to_vec())
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, AckStatus::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bytes() {
        assert_eq!(AckStatus::parse(&[0x06]), AckStatus::Accepted);
        assert_eq!(
            AckStatus::parse(&[0x0A]),
            AckStatus::Rejected(RejectReason::InvalidTableType)
        );
        assert_eq!(
            AckStatus::parse(&[0x0B, 0x00]),
            AckStatus::Rejected(RejectReason::InvalidProcessType)
        );
        assert_eq!(
            AckStatus::parse(&[0x0D]),
            AckStatus::Rejected(RejectReason::EmptyRecordBody)
        );
    }

    #[test]
    fn missing_record_tags_is_a_status_not_a_failure() {
        let status = AckStatus::parse(&[0x0C, b'x']);
        assert_eq!(status, AckStatus::Rejected(RejectReason::MissingRecordTags));
        assert_eq!(RejectReason::MissingRecordTags.to_string(), "missing record tags");
    }

    #[test]
    fn text_replies_are_case_insensitive() {
        assert!(AckStatus::parse(b"ok\r\n").is_accepted());
        assert_eq!(
            AckStatus::parse(b"Error: bad record"),
            AckStatus::Rejected(RejectReason::Unspecified)
        );
        assert!(matches!(AckStatus::parse(b"??"), AckStatus::Unknown(b) if b == b"??"));
        assert_eq!(AckStatus::parse(&[]), AckStatus::Unknown(Vec::new()));
    }
}
