//! HL7 v2 boundary support.
//!
//! This crate turns pipe-delimited HL7 v2 text into an addressable element tree, groups the
//! segments of a message into patient and order aggregates, and builds ACK/NAK replies:
//! - [`Delimiters`] and the [`tokenizer`] read the header's in-band delimiter declaration
//! - [`ElementTree`] holds every value under a dotted path such as `PID.5.1`
//! - [`Message`] assembles a header, one patient group and repeating order groups
//! - [`ResponseBuilder`] produces framed ACK/NAK replies
//!
//! Only the message shapes actually exchanged with pharmacy and EHR senders are handled;
//! malformed or partial input is tolerated wherever a value can still be addressed.

pub mod delimiters;
pub mod escape;
pub mod message;
pub mod mllp;
pub mod response;
pub mod tokenizer;
pub mod tree;

pub use delimiters::Delimiters;
pub use message::{Header, Message, MessageShape, OrderGroup, PatientGroup};
pub use response::{Reply, ResponseBuilder};
pub use tree::{Element, ElementTree, Segment};

/// Errors returned by the `hl7` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum Hl7Error {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported message shape: {0}")]
    UnsupportedMessageShape(String),
}

/// Type alias for Results that can fail with an [`Hl7Error`].
pub type Hl7Result<T> = Result<T, Hl7Error>;
