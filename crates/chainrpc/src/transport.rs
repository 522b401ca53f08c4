//! # Transport Abstraction
//!
//! A minimal, async interface for moving framed messages between sessions.
//!
//! ## Philosophy
//!
//! - **Text-Oriented**: The transport moves opaque message strings, plus at most
//!   one side-channel byte stream. It knows nothing about chains or payloads.
//! - **Duplex**: Either side may send at any time. Correlating replies is the
//!   session's job, not the transport's.

use std::fmt;

use crate::message::Message;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A bidirectional message pipe.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one message.
    ///
    /// # invariants
    /// - Must not interpret or rewrite `message.text`.
    /// - Must deliver `message.stream` together with the text it was sent with.
    async fn send(&self, message: Message) -> Result<()>;

    /// Waits for the next message. `Ok(None)` means the peer closed the connection.
    async fn recv(&self) -> Result<Option<Message>>;
}
