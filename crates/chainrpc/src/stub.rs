//! # Stubs
//!
//! A `Stub` marks a value that must stay on the server. Exposed methods
//! return `Stub::new(value)` to hand out a reference instead of a copy; the
//! value is placed in the heap and the client receives a chain builder rooted
//! at its heap id.

use std::sync::Arc;

use revive::Value;

/// A capability wrapper. Clones share identity.
#[derive(Debug, Clone)]
pub struct Stub {
    target: Arc<Value>,
}

impl Stub {
    pub fn new(value: impl Into<Value>) -> Self {
        Self { target: Arc::new(value.into()) }
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.target
    }

    /// Stable while any clone is alive.
    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.target) as usize
    }

    pub fn from_value(value: &Value) -> Option<&Stub> {
        value.as_host::<Stub>()
    }
}

impl PartialEq for Stub {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.target, &other.target)
    }
}

impl From<Stub> for Value {
    fn from(stub: Stub) -> Self {
        Value::host(stub)
    }
}
