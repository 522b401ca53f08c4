//! # Reducer and Reviver Registries
//!
//! A reducer turns a special value into a plain representation, or declines
//! with `None`. A reviver turns that plain representation back into the
//! original value. Pairs are registered under a shared name, which is what
//! travels on the wire.
//!
//! Registries are merged from several sources. Merging keeps the position of
//! an existing name and replaces its function, so later sources override
//! earlier ones without changing the order in which reducers are tried.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::Error;
use crate::Result;
use crate::binary::BufferView;
use crate::binary::ViewKind;
use crate::value::ErrorValue;
use crate::value::Value;

/// Converts a value to its plain representation, or `None` if it is not ours.
pub type ReduceFn = dyn Fn(&Value) -> Option<Value> + Send + Sync;

/// Reconstructs a value from its plain representation.
pub type ReviveFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// Ordered set of named reducers. The first reducer that claims a value wins.
#[derive(Clone, Default)]
pub struct Reducers {
    entries: Vec<(String, Arc<ReduceFn>)>,
}

impl Reducers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `f` under `name`, replacing any reducer of the same name in place.
    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.insert_arc(name.into(), Arc::new(f));
    }

    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.insert(name, f);
        self
    }

    /// Merges `other` over `self`.
    pub fn merge(mut self, other: Reducers) -> Self {
        for (name, f) in other.entries {
            self.insert_arc(name, f);
        }
        self
    }

    fn insert_arc(&mut self, name: String, f: Arc<ReduceFn>) {
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = f,
            None => self.entries.push((name, f)),
        }
    }

    /// Runs the reducers in order and returns the first claim.
    pub fn reduce(&self, value: &Value) -> Option<(&str, Value)> {
        self.entries
            .iter()
            .find_map(|(name, f)| f(value).map(|plain| (name.as_str(), plain)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl fmt::Debug for Reducers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Set of named revivers.
#[derive(Clone, Default)]
pub struct Revivers {
    entries: HashMap<String, Arc<ReviveFn>>,
}

impl Revivers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(f));
    }

    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, f);
        self
    }

    /// Merges `other` over `self`.
    pub fn merge(mut self, other: Revivers) -> Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ReviveFn>> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

impl fmt::Debug for Revivers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_list().entries(names).finish()
    }
}

/// Shorthand for reviver failures.
pub fn revive_error(name: &str, reason: impl Into<String>) -> Error {
    Error::Revive { name: name.into(), reason: reason.into() }
}

/// Splits an array representation into exactly `N` items.
pub fn expect_items<const N: usize>(name: &str, value: Value) -> Result<[Value; N]> {
    let Value::Array(items) = value else {
        return Err(revive_error(name, format!("expected an array, found {}", value.kind())));
    };
    let found = items.len();
    items
        .try_into()
        .map_err(|_| revive_error(name, format!("expected {} items, found {}", N, found)))
}

pub fn expect_string(name: &str, field: &str, value: Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        other => {
            let reason = format!("{} must be a string, found {}", field, other.kind());
            Err(revive_error(name, reason))
        }
    }
}

pub fn expect_number(name: &str, field: &str, value: Value) -> Result<f64> {
    match value {
        Value::Number(n) => Ok(n),
        other => {
            let reason = format!("{} must be a number, found {}", field, other.kind());
            Err(revive_error(name, reason))
        }
    }
}

fn expect_index(name: &str, field: &str, value: Value) -> Result<usize> {
    let n = expect_number(name, field, value)?;
    if n < 0.0 || n.fract() != 0.0 || n > usize::MAX as f64 {
        let reason = format!("{} must be a non-negative integer, found {}", field, n);
        return Err(revive_error(name, reason));
    }
    Ok(n as usize)
}

// ============================================================================
//  STRUCTURED SERIALIZABLE TYPES
// ============================================================================

pub const ARRAY_BUFFER: &str = "ArrayBuffer";
pub const ARRAY_BUFFER_VIEW: &str = "ArrayBufferView";
pub const ERROR: &str = "Error";

/// Error names that survive a round trip. `Error` last, as the fallback.
pub const ALLOWED_ERROR_NAMES: [&str; 7] = [
    "EvalError",
    "RangeError",
    "ReferenceError",
    "SyntaxError",
    "TypeError",
    "URIError",
    "Error",
];

/// Reducers for buffers, buffer views and errors.
pub fn structured_reducers() -> Reducers {
    Reducers::new()
        .with(ARRAY_BUFFER, |value| match value {
            Value::Bytes(b) => Some(Value::Array(vec![Value::String(STANDARD.encode(b))])),
            _ => None,
        })
        .with(ARRAY_BUFFER_VIEW, |value| match value {
            Value::View(view) => Some(Value::Array(vec![
                Value::from(view.kind.name()),
                Value::Bytes(view.buffer.clone()),
                Value::from(view.byte_offset),
                Value::from(view.byte_length),
            ])),
            _ => None,
        })
        .with(ERROR, |value| match value {
            Value::Error(e) => {
                let name = if ALLOWED_ERROR_NAMES.contains(&e.name.as_str()) {
                    e.name.as_str()
                } else {
                    "Error"
                };
                Some(Value::Array(vec![
                    Value::from(name),
                    Value::from(e.message.as_str()),
                    e.stack.clone().map(Value::String).unwrap_or_default(),
                    e.cause.as_deref().cloned().unwrap_or_default(),
                ]))
            }
            _ => None,
        })
}

/// Revivers matching [`structured_reducers`].
pub fn structured_revivers() -> Revivers {
    Revivers::new()
        .with(ARRAY_BUFFER, |value| {
            let [encoded] = expect_items(ARRAY_BUFFER, value)?;
            let encoded = expect_string(ARRAY_BUFFER, "data", encoded)?;
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| revive_error(ARRAY_BUFFER, e.to_string()))?;
            Ok(Value::Bytes(bytes.into()))
        })
        .with(ARRAY_BUFFER_VIEW, |value| {
            let [kind, buffer, offset, length] = expect_items(ARRAY_BUFFER_VIEW, value)?;
            let kind = expect_string(ARRAY_BUFFER_VIEW, "kind", kind)?;
            let kind = ViewKind::from_name(&kind).ok_or_else(|| {
                revive_error(ARRAY_BUFFER_VIEW, format!("unsupported view kind {}", kind))
            })?;
            let Value::Bytes(buffer) = buffer else {
                return Err(revive_error(ARRAY_BUFFER_VIEW, "buffer must be an ArrayBuffer"));
            };
            let offset = expect_index(ARRAY_BUFFER_VIEW, "byteOffset", offset)?;
            let length = expect_index(ARRAY_BUFFER_VIEW, "byteLength", length)?;
            Ok(Value::View(BufferView::new(kind, buffer, offset, length)?))
        })
        .with(ERROR, |value| {
            let [name, message, stack, cause] = expect_items(ERROR, value)?;
            let name = expect_string(ERROR, "name", name)?;
            if !ALLOWED_ERROR_NAMES.contains(&name.as_str()) {
                return Err(revive_error(ERROR, format!("unsupported error type {}", name)));
            }
            let mut error = ErrorValue::named(name, expect_string(ERROR, "message", message)?);
            match stack {
                Value::Undefined => {}
                other => error.stack = Some(expect_string(ERROR, "stack", other)?),
            }
            if !cause.is_undefined() {
                error.cause = Some(Box::new(cause));
            }
            Ok(Value::Error(error))
        })
}
