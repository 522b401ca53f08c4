//! # Chain Builder
//!
//! The client-side handle on a remote value. `get` and `call` record steps
//! and return a new builder; nothing is sent until the chain is resolved,
//! either with [`ChainBuilder::resolve`] or by awaiting the builder.
//!
//! ```ignore
//! let name = client.root().get("users").get("get").call(["42"]).get("name").await?;
//! ```

use std::fmt;
use std::future::IntoFuture;

use futures::FutureExt;
use futures::future::BoxFuture;
use revive::Value;

use crate::chain::Chain;
use crate::chain::ChainItem;
use crate::chain::ChainRef;
use crate::client::Client;
use crate::client::Error;
use crate::client::Result;

#[derive(Clone)]
pub struct ChainBuilder {
    client: Client,
    target: ChainRef,
}

impl ChainBuilder {
    pub(crate) fn new(client: Client, target: ChainRef) -> Self {
        Self { client, target }
    }

    /// Records a property read.
    pub fn get(&self, property: impl Into<String>) -> Self {
        self.then(ChainItem::get(property))
    }

    /// Records a call.
    pub fn call<I>(&self, arguments: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.apply(arguments.into_iter().map(Into::into).collect())
    }

    /// Records a call. Builders among `arguments` are replaced by their chain reference.
    pub fn apply(&self, arguments: Vec<Value>) -> Self {
        let arguments = arguments
            .into_iter()
            .map(|argument| match ChainBuilder::from_value(&argument) {
                Some(builder) => Value::from(builder.reveal()),
                None => argument,
            })
            .collect();
        self.then(ChainItem::apply(arguments))
    }

    fn then(&self, item: ChainItem) -> Self {
        Self {
            client: self.client.clone(),
            target: ChainRef::new(self.target.chain.then(item), self.target.target_heap_id.clone()),
        }
    }

    /// The recorded chain and its heap target. Never touches the network.
    pub fn reveal(&self) -> ChainRef {
        self.target.clone()
    }

    pub fn chain(&self) -> &Chain {
        &self.target.chain
    }

    pub fn target_heap_id(&self) -> Option<&str> {
        self.target.target_heap_id.as_deref()
    }

    /// Sends the chain in one round trip and returns its result.
    pub async fn resolve(&self) -> Result<Value> {
        tracing::trace!(
            steps = self.target.chain.len(),
            heap_id = ?self.target.target_heap_id,
            "resolve"
        );
        self.client.dispatch(self.target.to_value()).await
    }

    /// Drops the heap entry this builder is rooted at. Returns whether the server had it.
    pub async fn release(&self) -> Result<bool> {
        let id = self.target.target_heap_id.as_deref().ok_or(Error::NoHeapTarget)?;
        self.client.release(id).await
    }

    /// Reads a builder carried as a host value, as found in decoded results.
    pub fn from_value(value: &Value) -> Option<ChainBuilder> {
        value.as_host::<ChainBuilder>().cloned()
    }
}

impl IntoFuture for ChainBuilder {
    type Output = Result<Value>;
    type IntoFuture = BoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.resolve().await }.boxed()
    }
}

impl From<ChainBuilder> for Value {
    fn from(builder: ChainBuilder) -> Self {
        Value::from(builder.reveal())
    }
}

impl fmt::Debug for ChainBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainBuilder")
            .field("client", &self.client.name())
            .field("chain", &self.target.chain)
            .field("target_heap_id", &self.target.target_heap_id)
            .finish()
    }
}
