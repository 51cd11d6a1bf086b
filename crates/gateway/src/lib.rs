//! # Gateway records
//!
//! Boundary crate for the downstream data-entry gateway. It owns everything about the
//! tagged-record format:
//! - [`field`]: field definitions with a maximum length and an operation-dependent required class
//! - [`record`]: the seven record kinds, their field tables and the set/clear/validate cycle
//! - [`payload`]: `<Record><Tag>value</Tag>...</Record>` serialization and re-parsing
//! - [`ack`]: decoding of the gateway's acknowledgment bytes
//! - [`queue`]: the type-ordered batch written to a [`rxbridge_transport::Transport`]
//!
//! Records never touch a socket directly; they are serialized into a [`WriteQueue`] which is
//! flushed once per inbound message.

pub mod ack;
pub mod field;
pub mod payload;
pub mod queue;
pub mod record;
mod tables;

pub use ack::{AckStatus, RejectReason};
pub use field::{Field, FieldSpec, RequiredClass};
pub use payload::{parse_payload, EOF_SENTINEL};
pub use queue::WriteQueue;
pub use record::{Operation, Record, RecordKind};

/// Errors returned by the gateway crate.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown field '{tag}' on {kind} record")]
    UnknownField { kind: &'static str, tag: String },

    #[error("value for {kind}.{tag} is {len} characters; maximum is {max}")]
    FieldOverflow {
        kind: &'static str,
        tag: String,
        len: usize,
        max: usize,
    },

    #[error("field validation failed: {0}")]
    FieldValidation(String),

    #[error("refusing to serialize empty {0} record")]
    EmptyRecord(&'static str),

    #[error("payload error: {0}")]
    Serialization(String),

    #[error("gateway REJECTED record: {0}")]
    Rejected(RejectReason),

    #[error(transparent)]
    Transport(#[from] rxbridge_transport::TransportError),
}

/// Type alias for Results that can fail with a [`GatewayError`].
pub type GatewayResult<T> = Result<T, GatewayError>;
