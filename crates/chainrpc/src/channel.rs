//! In-process duplex transport over tokio channels.
//!
//! Used to connect a client and server living in the same process, and by the tests.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::message::Message;
use crate::transport;
use crate::transport::Transport;

/// A duplex channel transport using tokio mpsc channels.
///
/// Messages sent via `send()` appear on the peer's `recv()` and vice versa.
pub struct DuplexChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl DuplexChannelTransport {
    /// Creates a transport from separate tx and rx channels.
    pub fn new(
        tx: mpsc::UnboundedSender<Message>,
        rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Creates a pair of transports connected to each other.
    ///
    /// Messages sent on `a` are received by `b` and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (Self::new(tx_a, rx_b), Self::new(tx_b, rx_a))
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, message: Message) -> transport::Result<()> {
        self.tx
            .send(message)
            .map_err(|_| transport::Error::ConnectionLost("Channel closed".into()))
    }

    async fn recv(&self) -> transport::Result<Option<Message>> {
        let mut rx = self.rx.lock().await;
        Ok(rx.recv().await)
    }
}
