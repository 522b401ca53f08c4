//! # RPC Client with Async Pump
//!
//! The client session dispatches chains and correlates replies by message id.
//! A background pump task demultiplexes incoming frames to pending calls.
//!
//! ## Lifecycle of a call
//!
//! 1. Encode `{chain, targetHeapId}` and pick a fresh message id.
//! 2. Register a pending entry, then send `messageId ++ payload`.
//! 3. The pump (or the host, for a detached client) hands the reply frame to the entry.
//! 4. The caller decodes `{data}` or `{error}`.
//!
//! The pending entry is removed when the reply arrives, when the deadline
//! passes, or when the caller drops the future, whichever happens first.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use revive::ErrorValue;
use revive::Reducers;
use revive::Revivers;
use revive::Value;
use tokio::sync::oneshot;

use crate::builder::ChainBuilder;
use crate::capability;
use crate::chain::ChainRef;
use crate::message::EnvelopeError;
use crate::message::Message;
use crate::message::message_id;
use crate::transport;
use crate::transport::Transport;

/// Deadline applied to every call unless configured otherwise.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Transport(transport::Error),
    Serialization(revive::Error),
    Envelope(EnvelopeError),
    /// The remote call threw.
    Remote(ErrorValue),
    /// The server could not interpret the request (unknown heap id, malformed chain).
    Protocol(String),
    MalformedResponse(String),
    Timeout,
    ChannelClosed,
    /// A reply arrived for a message id with no pending call.
    UnmatchedResponse(String),
    /// `release` on a builder that is not rooted at a heap entry.
    NoHeapTarget,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Envelope(e) => write!(f, "Envelope error: {}", e),
            Self::Remote(e) => write!(f, "Remote failure: {}", e),
            Self::Protocol(reason) => write!(f, "Protocol error: {}", reason),
            Self::MalformedResponse(reason) => write!(f, "Malformed response: {}", reason),
            Self::Timeout => write!(f, "Request timed out"),
            Self::ChannelClosed => write!(f, "Response channel closed"),
            Self::UnmatchedResponse(id) => write!(f, "No pending call for message {}", id),
            Self::NoHeapTarget => write!(f, "Chain is not rooted at a heap entry"),
        }
    }
}

impl std::error::Error for Error {}

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

impl From<EnvelopeError> for Error {
    fn from(e: EnvelopeError) -> Self {
        Self::Envelope(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

type Pending = DashMap<String, oneshot::Sender<Result<Message>>>;

/// Removes a pending entry when the waiting call goes away.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

/// Configures a [`Client`].
pub struct ClientBuilder {
    name: String,
    deadline: Option<Duration>,
    reducers: Reducers,
    revivers: Revivers,
}

impl ClientBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            deadline: Some(DEFAULT_DEADLINE),
            reducers: Reducers::new(),
            revivers: Revivers::new(),
        }
    }

    /// Per-call deadline. `None` waits forever.
    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
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

    /// Builds the client and spawns the pump task that reads replies from `transport`.
    pub fn connect(self, transport: impl Transport) -> Client {
        let client = self.build(Arc::new(transport));
        client.spawn_pump();
        client
    }

    /// Builds a client whose host feeds replies through [`Client::receive`].
    pub fn detached(self, transport: impl Transport) -> Client {
        self.build(Arc::new(transport))
    }

    fn build(self, transport: Arc<dyn Transport>) -> Client {
        let reducers = revive::structured_reducers()
            .merge(revive::http_reducers())
            .merge(self.reducers)
            .merge(capability::client_reducers());
        let revivers = revive::structured_revivers()
            .merge(revive::http_revivers())
            .merge(self.revivers);
        Client {
            inner: Arc::new(Inner {
                name: self.name,
                transport,
                pending: Arc::new(DashMap::new()),
                reducers,
                revivers,
                deadline: self.deadline,
            }),
        }
    }
}

struct Inner {
    name: String,
    transport: Arc<dyn Transport>,
    pending: Arc<Pending>,
    reducers: Reducers,
    revivers: Revivers,
    deadline: Option<Duration>,
}

/// RPC client session. Clones share the session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// A client with default settings and a running pump.
    pub fn connect(name: impl Into<String>, transport: impl Transport) -> Self {
        ClientBuilder::new(name).connect(transport)
    }

    /// A client with default settings and no pump.
    pub fn detached(name: impl Into<String>, transport: impl Transport) -> Self {
        ClientBuilder::new(name).detached(transport)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// A chain builder rooted at the server's exposed root.
    pub fn root(&self) -> ChainBuilder {
        self.proxy(None)
    }

    /// A chain builder rooted at `target_heap_id`, or at the exposed root if `None`.
    pub fn proxy(&self, target_heap_id: Option<String>) -> ChainBuilder {
        ChainBuilder::new(self.clone(), ChainRef::new(Default::default(), target_heap_id))
    }

    /// Delivers one reply frame to its pending call.
    pub fn receive(&self, message: Message) -> Result<()> {
        deliver(&self.inner.pending, message).inspect_err(|e| {
            tracing::warn!(session = %self.inner.name, error = %e, "dropped reply");
        })
    }

    fn spawn_pump(&self) {
        let transport = self.inner.transport.clone();
        let pending = self.inner.pending.clone();
        let name = self.inner.name.clone();

        tokio::spawn(async move {
            let error = loop {
                match transport.recv().await {
                    Ok(Some(message)) => {
                        if let Err(e) = deliver(&pending, message) {
                            tracing::warn!(session = %name, error = %e, "dropped reply");
                        }
                    }
                    Ok(None) => break transport::Error::ConnectionLost("Stream closed".into()),
                    Err(e) => {
                        tracing::warn!(session = %name, error = %e, "transport error in pump");
                        break e;
                    }
                }
            };
            tracing::debug!(session = %name, pending = pending.len(), "pump stopped");
            notify_all_pending(&pending, Error::Transport(error));
        });
    }

    /// Sends `request` and waits for its reply.
    pub(crate) async fn dispatch(&self, request: Value) -> Result<Value> {
        let inner = &self.inner;
        let encoded = revive::encode(&request, &inner.reducers, true).await?;

        let id = message_id();
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id.clone(), tx);
        let _guard = PendingGuard { pending: &inner.pending, id: &id };

        tracing::debug!(session = %inner.name, message_id = %id, "dispatch");
        let message = Message::compose(&id, &encoded.value, encoded.unbuffered_stream);
        inner.transport.send(message).await?;

        let reply = match inner.deadline {
            Some(deadline) => tokio::time::timeout(deadline, rx).await.map_err(|_| {
                tracing::warn!(session = %inner.name, message_id = %id, "call timed out");
                Error::Timeout
            })?,
            None => rx.await,
        };
        let reply = reply.map_err(|_| Error::ChannelClosed)??;
        self.settle(reply)
    }

    /// Decodes a reply frame into the call's outcome.
    fn settle(&self, reply: Message) -> Result<Value> {
        let (id, payload) = reply.split()?;
        tracing::debug!(session = %self.inner.name, message_id = %id, "reply");

        let revivers = self.inner.revivers.clone().merge(capability::client_revivers(self));
        let response = revive::decode(payload, reply.stream.clone(), &revivers)?;
        let Value::Object(mut fields) = response else {
            let reason = format!("expected an object, found {}", response.kind());
            return Err(Error::MalformedResponse(reason));
        };

        if let Some(error) = fields.remove("error") {
            if fields.get("kind").and_then(Value::as_str) == Some("protocol") {
                let reason = match error.as_str() {
                    Some(reason) => reason.to_string(),
                    None => format!("{:?}", error),
                };
                return Err(Error::Protocol(reason));
            }
            return Err(Error::Remote(match error {
                Value::Error(e) => e,
                other => ErrorValue::new(format!("{:?}", other)),
            }));
        }
        fields
            .remove("data")
            .ok_or_else(|| Error::MalformedResponse("neither data nor error".into()))
    }

    /// Asks the server to drop heap entry `id`.
    pub(crate) async fn release(&self, id: &str) -> Result<bool> {
        let released = self.dispatch(Value::object([("release", id)])).await?;
        released.as_bool().ok_or_else(|| {
            Error::MalformedResponse(format!("release answered with {}", released.kind()))
        })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

/// Hands a reply frame to the call waiting for it.
fn deliver(pending: &Pending, message: Message) -> Result<()> {
    let id = message.split()?.0.to_string();
    let Some((_, tx)) = pending.remove(&id) else {
        return Err(Error::UnmatchedResponse(id));
    };
    // the caller may have given up already
    let _ = tx.send(Ok(message));
    Ok(())
}

/// Fails every pending call with `error`.
fn notify_all_pending(pending: &Pending, error: Error) {
    let keys: Vec<String> = pending.iter().map(|e| e.key().clone()).collect();
    for key in keys {
        if let Some((_, tx)) = pending.remove(&key) {
            let _ = tx.send(Err(error.clone()));
        }
    }
}
