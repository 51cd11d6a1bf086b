//! ACK/NAK reply construction.
//!
//! Replies copy routing from the original header with sender and receiver swapped, stamp a
//! fresh timestamp and echo the control id. Each reply has a framed wire form and a readable
//! form with one segment per line.

use crate::escape::escape;
use crate::message::Header;
use crate::{mllp, Delimiters};

/// Default error code for negative acknowledgments.
pub const DEFAULT_NAK_CODE: &str = "AR";

/// Positive acknowledgment code.
pub const ACK_CODE: &str = "AA";

/// A built reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Acknowledgment code placed in `MSA.1`.
    pub code: String,
    /// MLLP-framed wire text.
    pub wire: String,
    /// Segments separated by newlines, for logs and operators.
    pub readable: String,
}

impl Reply {
    pub fn is_ack(&self) -> bool {
        self.code == ACK_CODE
    }
}

/// Builds replies on behalf of this engine.
#[derive(Clone, Debug)]
pub struct ResponseBuilder {
    application: String,
    facility: String,
}

impl ResponseBuilder {
    /// `application` and `facility` are used when the original header leaves its receiver
    /// fields blank.
    pub fn new(application: impl Into<String>, facility: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            facility: facility.into(),
        }
    }

    pub fn ack(&self, header: &Header) -> Reply {
        let msh = self.reply_header(header, "ACK", &now());
        let msa = format!("MSA|{}|{}|", ACK_CODE, header.control_id());
        Self::finish(ACK_CODE, msh, msa)
    }

    /// Builds a NAK with `code` (default [`DEFAULT_NAK_CODE`]) and optional free text.
    pub fn nak(&self, header: &Header, code: Option<&str>, reason: Option<&str>) -> Reply {
        let code = code
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_NAK_CODE);
        let reason = escape(reason.unwrap_or_default(), &Delimiters::default());
        let msh = self.reply_header(header, "NAK", &now());
        let msa = format!(
            "MSA|{}|{}|PROC ERROR|0|0|{}",
            code,
            header.control_id(),
            reason
        );
        Self::finish(code, msh, msa)
    }

    fn reply_header(&self, header: &Header, kind: &str, timestamp: &str) -> String {
        let or = |value: &str, fallback: &str| -> String {
            if value.trim().is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };

        format!(
            "MSH|^~\\&|{}|{}|{}|{}|{}||{}^{}|{}|{}|{}|",
            or(header.raw_field(5), &self.application),
            or(header.raw_field(6), &self.facility),
            header.raw_field(3),
            header.raw_field(4),
            timestamp,
            kind,
            header.trigger_event(),
            header.control_id(),
            header.processing_id(),
            header.version_id(),
        )
    }

    fn finish(code: &str, msh: String, msa: String) -> Reply {
        let message = format!("{msh}\r{msa}");
        Reply {
            code: code.to_string(),
            wire: mllp::frame_text(&message),
            readable: format!("{msh}\n{msa}"),
        }
    }
}

fn now() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S").to_string()
}
