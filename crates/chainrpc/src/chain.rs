//! # Chains
//!
//! A chain is a recorded remote expression: property reads and calls, in
//! order, not yet executed. A `ChainRef` pairs a chain with the heap entry it
//! starts from, or with the session root when no heap id is given.
//!
//! ## Wire shape
//!
//! - `{ "type": "get", "property": "<name>" }`
//! - `{ "type": "apply", "arguments": [ ... ] }`
//! - `ChainRef`: `{ "chain": [ ... ], "targetHeapId": "<id>" }` (id omitted for the root)
//!
//! ## Invariants
//!
//! - Chains are immutable. `then` returns a new chain and leaves the receiver untouched.

use std::fmt;
use std::sync::Arc;

use revive::Value;

/// Malformed chain errors.
#[derive(Debug, Clone, PartialEq)]
pub struct Error(pub String);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Malformed chain: {}", self.0)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainItem {
    Get { property: String },
    /// Arguments are values; a pending remote call appears as a `ChainRef` host value.
    Apply { arguments: Vec<Value> },
}

impl ChainItem {
    pub fn get(property: impl Into<String>) -> Self {
        ChainItem::Get { property: property.into() }
    }

    pub fn apply(arguments: Vec<Value>) -> Self {
        ChainItem::Apply { arguments }
    }

    pub fn to_value(&self) -> Value {
        match self {
            ChainItem::Get { property } => Value::object([
                ("type", Value::from("get")),
                ("property", Value::from(property.as_str())),
            ]),
            ChainItem::Apply { arguments } => Value::object([
                ("type", Value::from("apply")),
                ("arguments", Value::Array(arguments.clone())),
            ]),
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error(format!("item must be an object, found {}", value.kind())));
        };
        let kind = fields.remove("type").unwrap_or_default();
        match kind.as_str() {
            Some("get") => match fields.remove("property") {
                Some(Value::String(property)) => Ok(ChainItem::Get { property }),
                _ => Err(Error("get item needs a string property".into())),
            },
            Some("apply") => match fields.remove("arguments") {
                Some(Value::Array(arguments)) => Ok(ChainItem::Apply { arguments }),
                _ => Err(Error("apply item needs an arguments array".into())),
            },
            _ => Err(Error(format!("unknown item type {:?}", kind))),
        }
    }
}

/// An ordered, immutable sequence of `ChainItem`s. Empty means "the target itself".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chain {
    items: Arc<Vec<ChainItem>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new chain with `item` appended.
    pub fn then(&self, item: ChainItem) -> Self {
        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.extend(self.items.iter().cloned());
        items.push(item);
        Self { items: Arc::new(items) }
    }

    pub fn items(&self) -> &[ChainItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(self.items.iter().map(ChainItem::to_value).collect())
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(Error(format!("chain must be an array, found {}", value.kind())));
        };
        items.into_iter().map(ChainItem::from_value).collect()
    }
}

impl FromIterator<ChainItem> for Chain {
    fn from_iter<I: IntoIterator<Item = ChainItem>>(iter: I) -> Self {
        Self { items: Arc::new(iter.into_iter().collect()) }
    }
}

/// A chain and the heap entry it is evaluated against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChainRef {
    pub chain: Chain,
    pub target_heap_id: Option<String>,
}

impl ChainRef {
    pub fn new(chain: Chain, target_heap_id: Option<String>) -> Self {
        Self { chain, target_heap_id }
    }

    /// The heap entry itself, with no operations applied.
    pub fn heap(id: impl Into<String>) -> Self {
        Self::new(Chain::new(), Some(id.into()))
    }

    pub fn to_value(&self) -> Value {
        let mut fields = vec![("chain", self.chain.to_value())];
        if let Some(id) = &self.target_heap_id {
            fields.push(("targetHeapId", Value::from(id.as_str())));
        }
        Value::object(fields)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut fields) = value else {
            return Err(Error(format!("chain reference must be an object, found {}", value.kind())));
        };
        let chain = Chain::from_value(fields.remove("chain").unwrap_or_default())?;
        let target_heap_id = match fields.remove("targetHeapId") {
            None | Some(Value::Undefined) | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(other) => {
                let reason = format!("targetHeapId must be a string, found {}", other.kind());
                return Err(Error(reason));
            }
        };
        Ok(Self { chain, target_heap_id })
    }

    /// Reads a chain reference carried as a host value.
    pub fn from_host(value: &Value) -> Option<&ChainRef> {
        value.as_host::<ChainRef>()
    }
}

impl From<ChainRef> for Value {
    fn from(chain_ref: ChainRef) -> Self {
        Value::host(chain_ref)
    }
}
