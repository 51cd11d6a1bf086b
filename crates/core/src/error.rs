use gateway::GatewayError;
use hl7::Hl7Error;
use rxbridge_transport::TransportError;

/// NAK code for messages the engine could not process.
pub const NAK_PROCESSING_ERROR: &str = "AP";
/// NAK code for messages the downstream gateway refused.
pub const NAK_REJECTED: &str = "AR";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to read configuration file: {0}")]
    ConfigRead(std::io::Error),
    #[error("field validation failed: {0}")]
    FieldValidation(String),
    #[error("HL7 error: {0}")]
    Hl7(#[from] Hl7Error),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("database error: {0}")]
    Database(String),
}

impl EngineError {
    /// NAK code reported to the sender for this failure.
    pub fn nak_code(&self) -> &'static str {
        if self.to_string().contains("REJECTED") {
            NAK_REJECTED
        } else {
            NAK_PROCESSING_ERROR
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
