//! # Message Envelope
//!
//! Every frame is `messageId ++ payload`. The id is a hyphenated v4 UUID, so
//! it always occupies the first 36 bytes of the text.

use std::fmt;

use revive::ByteStream;
use uuid::Uuid;

/// Width of the message id prefix.
pub const MESSAGE_ID_LEN: usize = 36;

/// A framed message and the stream that travels with it, if any.
#[derive(Debug, Clone)]
pub struct Message {
    pub text: String,
    pub stream: Option<ByteStream>,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), stream: None }
    }

    /// Prefixes `payload` with `id`.
    pub fn compose(id: &str, payload: &str, stream: Option<ByteStream>) -> Self {
        let mut text = String::with_capacity(id.len() + payload.len());
        text.push_str(id);
        text.push_str(payload);
        Self { text, stream }
    }

    /// Splits the frame into its message id and payload.
    pub fn split(&self) -> Result<(&str, &str), EnvelopeError> {
        if self.text.len() < MESSAGE_ID_LEN || !self.text.is_char_boundary(MESSAGE_ID_LEN) {
            return Err(EnvelopeError { len: self.text.len() });
        }
        Ok(self.text.split_at(MESSAGE_ID_LEN))
    }
}

/// Generates a fresh message id.
pub fn message_id() -> String {
    Uuid::new_v4().to_string()
}

/// A frame too short to hold a message id.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeError {
    pub len: usize,
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame of {} bytes has no {}-byte message id", self.len, MESSAGE_ID_LEN)
    }
}

impl std::error::Error for EnvelopeError {}
