//! # RPC Server
//!
//! The server session answers requests against an exposed root value and a
//! heap of promoted stubs.
//!
//! ## Requests
//!
//! - `{ chain, targetHeapId? }`: evaluate `chain` against the heap entry or the root.
//! - `{ release: targetHeapId }`: drop a heap entry.
//!
//! ## Replies
//!
//! - `{ data }` on success.
//! - `{ error }` when the chain threw. The error travels as a structured value.
//! - `{ error, kind: "protocol" }` when the request itself was unusable.
//!
//! Every request is answered independently; no failure ends the session.

use std::fmt;
use std::sync::Arc;

use revive::ByteStream;
use revive::Encoded;
use revive::ErrorValue;
use revive::Reducers;
use revive::Revivers;
use revive::Value;

use crate::capability;
use crate::capability::Promotions;
use crate::chain::ChainRef;
use crate::heap::Heap;
use crate::message::EnvelopeError;
use crate::message::Message;
use crate::resolver;
use crate::resolver::Resolver;
use crate::transport;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The frame had no message id to reply to.
    Envelope(EnvelopeError),
    Transport(transport::Error),
    Serialization(revive::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Envelope(e) => write!(f, "Envelope error: {}", e),
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<EnvelopeError> for Error {
    fn from(e: EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<revive::Error> for Error {
    fn from(e: revive::Error) -> Self {
        Self::Serialization(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A decoded request.
enum Request {
    Call(ChainRef),
    Release(String),
}

impl Request {
    fn parse(value: Value) -> std::result::Result<Self, String> {
        match value.get("release") {
            Value::String(id) => return Ok(Request::Release(id)),
            Value::Undefined => {}
            other => return Err(format!("release target must be a string, found {}", other.kind())),
        }
        ChainRef::from_value(value).map(Request::Call).map_err(|e| e.to_string())
    }
}

/// What a request produced.
enum Outcome {
    Data(Value),
    Failed(ErrorValue),
    Protocol(String),
}

/// Configures a [`Server`].
pub struct ServerBuilder {
    name: String,
    root: Value,
    reducers: Reducers,
    revivers: Revivers,
}

impl ServerBuilder {
    pub fn new(root: impl Into<Value>) -> Self {
        Self {
            name: "server".into(),
            root: root.into(),
            reducers: Reducers::new(),
            revivers: Revivers::new(),
        }
    }

    /// Session name, used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Extra reducers, merged over the built-in ones.
    pub fn reducers(mut self, reducers: Reducers) -> Self {
        self.reducers = reducers;
        self
    }

    /// Extra revivers, merged over the built-in ones.
    pub fn revivers(mut self, revivers: Revivers) -> Self {
        self.revivers = revivers;
        self
    }

    pub fn build(self, transport: impl Transport) -> Server {
        let heap = Arc::new(Heap::new());
        let reducers = revive::structured_reducers()
            .merge(revive::http_reducers())
            .merge(self.reducers);
        let revivers = revive::structured_revivers()
            .merge(revive::http_revivers())
            .merge(self.revivers)
            .merge(capability::server_revivers());
        Server {
            inner: Arc::new(Inner {
                name: self.name,
                root: self.root,
                heap,
                transport: Arc::new(transport),
                reducers,
                revivers,
            }),
        }
    }
}

struct Inner {
    name: String,
    root: Value,
    heap: Arc<Heap>,
    transport: Arc<dyn Transport>,
    reducers: Reducers,
    revivers: Revivers,
}

/// RPC server session. Clones share the session and its heap.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl Server {
    /// A server with default settings exposing `root`.
    pub fn new(root: impl Into<Value>, transport: impl Transport) -> Self {
        ServerBuilder::new(root).build(transport)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn heap(&self) -> &Heap {
        &self.inner.heap
    }

    /// Reads requests until the transport closes, answering each on its own task.
    pub async fn serve(self) -> transport::Result<()> {
        while let Some(message) = self.inner.transport.recv().await? {
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.receive(message).await {
                    tracing::warn!(session = %server.inner.name, error = %e, "request dropped");
                }
            });
        }
        tracing::debug!(session = %self.inner.name, "transport closed");
        Ok(())
    }

    /// Answers one request frame.
    pub async fn receive(&self, message: Message) -> Result<()> {
        let (id, payload) = message.split()?;
        tracing::debug!(session = %self.inner.name, message_id = %id, "request");

        let outcome = self.respond(payload, message.stream.clone()).await;
        let reply = self.reply(outcome).await?;
        self.inner
            .transport
            .send(Message::compose(id, &reply.value, reply.unbuffered_stream))
            .await?;
        Ok(())
    }

    async fn respond(&self, payload: &str, stream: Option<ByteStream>) -> Outcome {
        let request = match revive::decode(payload, stream, &self.inner.revivers) {
            Ok(value) => value,
            Err(e) => return Outcome::Protocol(format!("Undecodable request: {}", e)),
        };
        let target = match Request::parse(request) {
            Ok(Request::Call(target)) => target,
            Ok(Request::Release(id)) => {
                let released = self.inner.heap.release(&id);
                tracing::debug!(session = %self.inner.name, heap_id = %id, released, "release");
                return Outcome::Data(Value::Bool(released));
            }
            Err(reason) => return Outcome::Protocol(format!("Malformed chain: {}", reason)),
        };

        let resolver = Resolver::new(&self.inner.heap);
        let result = match resolver.start(target.target_heap_id.as_deref(), &self.inner.root) {
            Ok(start) => resolver.resolve(start, &target.chain).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(data) => Outcome::Data(data),
            Err(resolver::Error::Application(e)) => Outcome::Failed(e),
            Err(e @ resolver::Error::UnknownHeapId(_)) => Outcome::Protocol(e.to_string()),
        }
    }

    async fn reply(&self, outcome: Outcome) -> Result<Encoded> {
        let failure = match outcome {
            Outcome::Data(data) => match self.encode(Value::object([("data", data)]), true).await {
                Ok(encoded) => return Ok(encoded),
                Err(e) => {
                    tracing::warn!(
                        session = %self.inner.name,
                        error = %e,
                        "result is not serializable"
                    );
                    ErrorValue::new(format!("DataCloneError: {}", e))
                }
            },
            Outcome::Failed(e) => e,
            Outcome::Protocol(reason) => {
                tracing::warn!(session = %self.inner.name, reason = %reason, "protocol error");
                let body = Value::object([
                    ("error", Value::from(reason)),
                    ("kind", Value::from("protocol")),
                ]);
                return Ok(self.encode(body, false).await?);
            }
        };

        match self.encode(Value::object([("error", Value::Error(failure.clone()))]), true).await {
            Ok(encoded) => Ok(encoded),
            Err(_) => {
                // cause or stack could not be encoded; keep name and message
                let bare = ErrorValue::named(failure.name, failure.message);
                Ok(self.encode(Value::object([("error", Value::Error(bare))]), false).await?)
            }
        }
    }

    /// Encodes a reply body. Stubs in it reach the heap only if the encode succeeds.
    async fn encode(&self, body: Value, allow_unbuffered: bool) -> revive::Result<Encoded> {
        let promotions = Arc::new(Promotions::new(self.inner.heap.clone()));
        let reducers = self
            .inner
            .reducers
            .clone()
            .merge(capability::server_reducers(promotions.clone()));
        let encoded = revive::encode(&body, &reducers, allow_unbuffered).await?;
        promotions.commit();
        Ok(encoded)
    }
}
