//! Minimal Lower Layer Protocol framing: `0x0B <message> 0x1C 0x0D`.

/// Start-of-block byte.
pub const START_BLOCK: u8 = 0x0B;
/// End-of-block byte.
pub const END_BLOCK: u8 = 0x1C;
/// Trailing carriage return after the end-of-block byte.
pub const CARRIAGE_RETURN: u8 = 0x0D;

/// Wraps a message in MLLP framing.
pub fn frame(message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 3);
    out.push(START_BLOCK);
    out.extend_from_slice(message.as_bytes());
    out.push(END_BLOCK);
    out.push(CARRIAGE_RETURN);
    out
}

/// Text form of [`frame`].
pub fn frame_text(message: &str) -> String {
    format!(
        "{}{}{}{}",
        char::from(START_BLOCK),
        message,
        char::from(END_BLOCK),
        char::from(CARRIAGE_RETURN)
    )
}

/// Strips MLLP framing if present; unframed input (for example from files) is returned as is.
pub fn unframe(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_prefix(&[START_BLOCK]).unwrap_or(bytes);
    let bytes = bytes.strip_suffix(&[CARRIAGE_RETURN]).unwrap_or(bytes);
    bytes.strip_suffix(&[END_BLOCK]).unwrap_or(bytes)
}

/// Reassembles complete frames from a stream of reads.
#[derive(Debug, Default)]
pub struct MllpDecoder {
    buffer: Vec<u8>,
}

impl MllpDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes and returns the payload of every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let Some(start) = self.buffer.iter().position(|&b| b == START_BLOCK) else {
                if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
                    tracing::warn!(bytes = self.buffer.len(), "discarding data outside MLLP frame");
                }
                self.buffer.clear();
                break;
            };
            if start > 0 {
                tracing::warn!(bytes = start, "discarding data before MLLP start block");
                self.buffer.drain(..start);
            }

            let Some(end) = self.buffer.windows(2).position(|w| w == [END_BLOCK, CARRIAGE_RETURN])
            else {
                break;
            };

            let payload = self.buffer[1..end].to_vec();
            self.buffer.drain(..end + 2);
            frames.push(payload);
        }

        frames
    }

    /// Bytes received since the last complete frame.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Takes whatever partial data remains, for peers that close without a trailer.
    pub fn take_pending(&mut self) -> Vec<u8> {
        let pending = std::mem::take(&mut self.buffer);
        unframe(&pending).to_vec()
    }
}
