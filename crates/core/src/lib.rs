//! # rxbridge core
//!
//! Business logic between an inbound HL7 feed and the downstream pharmacy gateway:
//! - [`CoreConfig`]: runtime configuration resolved once at startup
//! - [`Dialect`]: per-sender field layouts, looked up once per message
//! - [`schedule`]: dose-schedule pattern decoding
//! - [`Transformer`]: segments to gateway records, including duplicate prescriptions
//! - [`Engine`]: parse, transform, queue, flush and reply, one message at a time
//! - [`MessagePoller`]: the same pipeline fed from a staging table
//!
//! Sockets, TLS and framing live in `rxbridge-transport`; the record model and wire format
//! live in `gateway`.

pub mod collaborators;
pub mod config;
pub mod dea;
pub mod dialect;
mod error;
pub mod link;
pub mod pipeline;
pub mod poller;
pub mod schedule;
pub mod transform;

#[cfg(test)]
mod fixtures;

pub use collaborators::{GuidStore, IdAllocator, MemoryGuidStore, SqlExecutor, Table, UuidAllocator};
pub use config::CoreConfig;
pub use dialect::Dialect;
pub use error::{EngineError, EngineResult, NAK_PROCESSING_ERROR, NAK_REJECTED};
pub use link::GatewayLink;
pub use pipeline::Engine;
pub use poller::{MessagePoller, PollSummary};
pub use transform::{OrderAction, TransformOptions, Transformer};

/// Log target prefixes of the workspace crates. Binaries add one `EnvFilter` directive per
/// entry so events from `gateway` and `hl7` are not filtered out.
pub const LOG_TARGETS: [&str; 3] = ["rxbridge", "gateway", "hl7"];
