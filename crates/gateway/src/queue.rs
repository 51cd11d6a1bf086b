//! Dependency-ordered batch of serialized records.

use crate::ack::{AckStatus, RejectReason};
use crate::payload::EOF_SENTINEL;
use crate::record::Record;
use crate::{GatewayError, GatewayResult};
use rxbridge_transport::Transport;

/// Serialized records waiting to be written, kept sorted by type key.
#[derive(Debug, Default)]
pub struct WriteQueue {
    entries: Vec<(char, String)>,
    send_eof: bool,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes [`EOF_SENTINEL`] after every successful flush.
    pub fn with_eof_sentinel(mut self, send_eof: bool) -> Self {
        self.send_eof = send_eof;
        self
    }

    /// Appends a payload and restores type-key order. Equal keys keep insertion order.
    pub fn add(&mut self, type_key: char, payload: String) {
        self.entries.push((type_key, payload));
        self.entries.sort_by_key(|(key, _)| *key);
    }

    /// Serializes and queues `record`. Empty records are skipped and reported as `false`.
    pub fn enqueue(&mut self, record: &mut Record) -> GatewayResult<bool> {
        if record.is_empty() {
            tracing::debug!(record = %record.kind(), "skipping empty record");
            return Ok(false);
        }
        let payload = record.to_payload()?;
        self.add(record.kind().type_key(), payload);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Type keys in flush order.
    pub fn type_keys(&self) -> Vec<char> {
        self.entries.iter().map(|(key, _)| *key).collect()
    }

    pub fn payloads(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, payload)| payload.as_str())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Writes every queued payload in order, one acknowledgment per payload, then clears.
    ///
    /// The first failure stops the flush; payloads already acknowledged stay written. The
    /// queue is emptied either way.
    ///
    /// # Returns
    /// The number of payloads the gateway accepted.
    ///
    /// # Errors
    /// * [`GatewayError::Transport`] for I/O failures and timeouts.
    /// * [`GatewayError::Rejected`] when the gateway refuses a record.
    pub fn write(&mut self, transport: &dyn Transport) -> GatewayResult<usize> {
        let entries = std::mem::take(&mut self.entries);
        let total = entries.len();

        for (index, (type_key, payload)) in entries.into_iter().enumerate() {
            let response = transport.write(&payload).map_err(|e| {
                tracing::error!(error = %e, type_key = %type_key, index, total, "gateway write failed");
                GatewayError::from(e)
            })?;

            match AckStatus::parse(&response.bytes) {
                AckStatus::Accepted => {}
                AckStatus::Rejected(reason) => {
                    tracing::error!(%reason, type_key = %type_key, index, total, "gateway rejected record");
                    return Err(GatewayError::Rejected(reason));
                }
                AckStatus::Unknown(bytes) if response.accepted => {
                    tracing::warn!(ack = ?bytes, type_key = %type_key, "unrecognised acknowledgment; treating as accepted");
                }
                AckStatus::Unknown(bytes) => {
                    tracing::error!(ack = ?bytes, type_key = %type_key, "acknowledgment not accepted");
                    return Err(GatewayError::Rejected(RejectReason::Unspecified));
                }
            }
        }

        if self.send_eof && total > 0 {
            let response = transport.write(EOF_SENTINEL)?;
            tracing::debug!(ack = ?response.bytes, "sent end-of-message sentinel");
        }

        tracing::info!(records = total, "flushed write queue");
        Ok(total)
    }
}
