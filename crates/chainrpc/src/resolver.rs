//! # Resolver
//!
//! Executes a chain against a starting value on the server.
//!
//! ## Semantics
//!
//! - **Get** reads a property. A function read from an object is bound to that
//!   object so a following **Apply** sees the right receiver. Functions wrapped
//!   in a `Stub` are left as they are.
//! - **Apply** first evaluates every `ChainRef` argument (against the heap entry
//!   it names, or the outer starting value), then invokes the current value.
//! - A final `Stub` is promoted into the heap and replaced by a `ChainRef` to it.
//!   Nested chain arguments are evaluated but never promoted.
//!
//! Any failing step aborts the whole chain.

use std::fmt;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::try_join_all;
use revive::ErrorValue;
use revive::Value;

use crate::chain::Chain;
use crate::chain::ChainItem;
use crate::chain::ChainRef;
use crate::heap::Heap;
use crate::stub::Stub;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A step threw. Sent back to the caller as data.
    Application(ErrorValue),
    /// The chain names a heap entry this server never created, or already released.
    UnknownHeapId(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Application(e) => write!(f, "{}", e),
            Error::UnknownHeapId(id) => write!(f, "Unknown heap id {}", id),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorValue> for Error {
    fn from(e: ErrorValue) -> Self {
        Error::Application(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Resolver<'a> {
    heap: &'a Heap,
}

impl<'a> Resolver<'a> {
    pub fn new(heap: &'a Heap) -> Self {
        Self { heap }
    }

    /// The value a `ChainRef` starts from: its heap entry, or `root`.
    pub fn start(&self, target_heap_id: Option<&str>, root: &Value) -> Result<Value> {
        match target_heap_id {
            Some(id) => self.heap.lookup(id).ok_or_else(|| Error::UnknownHeapId(id.to_string())),
            None => Ok(root.clone()),
        }
    }

    /// Evaluates `chain` and promotes a final stub into the heap.
    pub async fn resolve(&self, start: Value, chain: &Chain) -> Result<Value> {
        let result = self.evaluate(start, chain).await?;
        match Stub::from_value(&result) {
            Some(stub) => {
                let id = self.heap.promote(stub);
                tracing::trace!(heap_id = %id, "promoted result stub");
                Ok(Value::from(ChainRef::heap(id)))
            }
            None => Ok(result),
        }
    }

    /// Evaluates `chain` against `start` without promotion.
    pub fn evaluate<'b>(&'b self, start: Value, chain: &'b Chain) -> BoxFuture<'b, Result<Value>> {
        async move {
            let mut result = start.clone();
            for item in chain.items() {
                result = match item {
                    ChainItem::Get { property } => {
                        tracing::trace!(property = %property, "get");
                        read(&result, property)?
                    }
                    ChainItem::Apply { arguments } => {
                        tracing::trace!(arguments = arguments.len(), "apply");
                        let arguments = self.arguments(arguments, &start).await?;
                        invoke(&result, arguments).await?
                    }
                };
            }
            Ok(result)
        }
        .boxed()
    }

    async fn arguments(&self, arguments: &[Value], outer: &Value) -> Result<Vec<Value>> {
        try_join_all(arguments.iter().map(|argument| async move {
            match ChainRef::from_host(argument) {
                Some(nested) => {
                    let start = self.start(nested.target_heap_id.as_deref(), outer)?;
                    self.evaluate(start, &nested.chain).await
                }
                None => Ok(argument.clone()),
            }
        }))
        .await
    }
}

fn read(target: &Value, property: &str) -> Result<Value> {
    let target = Stub::from_value(target).map(Stub::value).unwrap_or(target);
    if target.is_nullish() {
        return Err(Error::Application(ErrorValue::type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            target.kind(),
            property
        ))));
    }
    match target.get(property) {
        Value::Function(f) => Ok(Value::Function(f.bind(target.clone()))),
        value => Ok(value),
    }
}

async fn invoke(target: &Value, arguments: Vec<Value>) -> Result<Value> {
    let callee = Stub::from_value(target).map(Stub::value).unwrap_or(target);
    match callee {
        Value::Function(f) => Ok(f.invoke(arguments).await?),
        other => {
            let reason = format!("{} is not a function", other.kind());
            Err(Error::Application(ErrorValue::type_error(reason)))
        }
    }
}
