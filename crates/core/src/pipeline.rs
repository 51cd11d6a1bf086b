//! Message pipeline.
//!
//! One inbound message is handled start to finish before the next:
//! - parse and assemble the HL7 text
//! - transform it into gateway records and queue them by type key
//! - flush the queue through the gateway transport
//! - answer with exactly one ACK or NAK

use crate::collaborators::{GuidStore, IdAllocator, MemoryGuidStore, UuidAllocator};
use crate::config::CoreConfig;
use crate::transform::{TransformOptions, Transformer};
use crate::{EngineError, EngineResult};
use hl7::{mllp, Header, Message, Reply, ResponseBuilder};
use rxbridge_transport::{TextCallback, Transport};
use std::sync::Arc;

/// Turns inbound HL7 text into gateway writes and an HL7 reply.
pub struct Engine {
    config: Arc<CoreConfig>,
    transformer: Transformer,
    responses: ResponseBuilder,
    transport: Arc<dyn Transport>,
}

impl Engine {
    /// Creates an engine with random duplicate ids and an in-memory guid store.
    pub fn new(config: Arc<CoreConfig>, transport: Arc<dyn Transport>) -> Self {
        Self::with_collaborators(
            config,
            transport,
            Arc::new(UuidAllocator),
            Arc::new(MemoryGuidStore::new()),
        )
    }

    pub fn with_collaborators(
        config: Arc<CoreConfig>,
        transport: Arc<dyn Transport>,
        ids: Arc<dyn IdAllocator>,
        guids: Arc<dyn GuidStore>,
    ) -> Self {
        let transformer = Transformer::new(TransformOptions::from(config.as_ref()), ids, guids);
        let responses = ResponseBuilder::new(config.application.clone(), config.facility.clone());
        Self {
            config,
            transformer,
            responses,
            transport,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Handles one inbound message, framed or not.
    ///
    /// Never fails: every error becomes a NAK whose code comes from
    /// [`EngineError::nak_code`] and whose text is the error message.
    pub fn handle(&self, text: &str) -> Reply {
        let text = String::from_utf8_lossy(mllp::unframe(text.as_bytes())).into_owned();

        let message = match Message::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                let header = Header::salvage(&text);
                return self.refuse(&header, EngineError::from(e));
            }
        };

        match self.deliver(&message) {
            Ok(written) => {
                tracing::info!(
                    control_id = message.header.control_id(),
                    message_type = message.header.message_type(),
                    written,
                    "message delivered"
                );
                self.responses.ack(&message.header)
            }
            Err(e) => self.refuse(&message.header, e),
        }
    }

    /// Transforms an assembled message and flushes its records to the gateway.
    ///
    /// # Returns
    /// The number of records the gateway accepted.
    ///
    /// # Errors
    /// Returns the first transformation, validation, transport or rejection failure. Records
    /// written before that failure stay written.
    pub fn deliver(&self, message: &Message) -> EngineResult<usize> {
        let mut queue = self
            .transformer
            .translate(message)?
            .with_eof_sentinel(self.config.send_eof);
        Ok(queue.write(self.transport.as_ref())?)
    }

    /// Wraps the engine as a listener callback returning the framed reply.
    pub fn text_callback(self: Arc<Self>) -> TextCallback {
        Arc::new(move |text: String| self.handle(&text).wire)
    }

    fn refuse(&self, header: &Header, error: EngineError) -> Reply {
        let code = error.nak_code();
        tracing::error!(
            control_id = header.control_id(),
            code,
            error = %error,
            "message refused"
        );
        self.responses.nak(header, Some(code), Some(&error.to_string()))
    }
}
