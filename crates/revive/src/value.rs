//! # Dynamic Values
//!
//! The value model shared by every reducer and reviver. A `Value` is either
//! plain data (which the wire format can represent directly) or a special
//! value that must pass through a named reducer before it can be sent.
//!
//! ## Invariants
//!
//! - Values are trees: containers own their children, so a walk always terminates.
//! - `Function` and `Host` values never have a plain representation. They only
//!   cross the wire when a registered reducer claims them.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::binary::Blob;
use crate::binary::BufferView;
use crate::binary::ByteStream;
use crate::http::Headers;
use crate::http::Request;
use crate::http::Response;

/// String-keyed record.
pub type Object = BTreeMap<String, Value>;

/// A structured value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Object),
    /// An owned binary buffer (`ArrayBuffer`).
    Bytes(Bytes),
    /// A typed window onto a binary buffer (`ArrayBufferView`).
    View(BufferView),
    Error(ErrorValue),
    Headers(Headers),
    Request(Box<Request>),
    Response(Box<Response>),
    /// A live, not yet buffered byte stream.
    Stream(ByteStream),
    Blob(Blob),
    Function(Function),
    /// An opaque application value, only serializable through a reducer.
    Host(HostObject),
}

impl Value {
    /// Builds an `Object` from key/value pairs.
    pub fn object<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// Wraps an application value so reducers can recognise it by type.
    pub fn host<T: Any + Send + Sync>(value: T) -> Self {
        Value::Host(HostObject::new(value))
    }

    /// Returns the wrapped host value if it has type `T`.
    pub fn as_host<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Host(host) => host.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `true` for `Undefined` and `Null`, the two values with no properties.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Short description of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Bytes(_) => "ArrayBuffer",
            Value::View(view) => view.kind.name(),
            Value::Error(_) => "Error",
            Value::Headers(_) => "Headers",
            Value::Request(_) => "Request",
            Value::Response(_) => "Response",
            Value::Stream(_) => "ReadableStream",
            Value::Blob(_) => "Blob",
            Value::Function(_) => "function",
            Value::Host(host) => host.type_name(),
        }
    }

    /// Reads a property of plain data. Unknown properties read as `Undefined`.
    pub fn get(&self, property: &str) -> Value {
        match self {
            Value::Object(map) => map.get(property).cloned().unwrap_or_default(),
            Value::Array(items) => match property {
                "length" => Value::from(items.len()),
                _ => property
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or_default(),
            },
            Value::String(s) if property == "length" => Value::from(s.encode_utf16().count()),
            Value::Bytes(b) if property == "byteLength" => Value::from(b.len()),
            Value::View(view) => match property {
                "byteLength" => Value::from(view.byte_length),
                "byteOffset" => Value::from(view.byte_offset),
                "length" => Value::from(view.len()),
                _ => Value::Undefined,
            },
            Value::Error(e) => match property {
                "name" => Value::from(e.name.as_str()),
                "message" => Value::from(e.message.as_str()),
                "stack" => e.stack.clone().map(Value::String).unwrap_or_default(),
                "cause" => e.cause.as_deref().cloned().unwrap_or_default(),
                _ => Value::Undefined,
            },
            Value::Request(r) => match property {
                "method" => Value::from(r.method.as_str()),
                "url" => Value::from(r.url.as_str()),
                "headers" => Value::Headers(r.headers.clone()),
                "cf" => r.cf.clone(),
                "body" => r.body.clone().map(Value::Stream).unwrap_or(Value::Null),
                _ => Value::Undefined,
            },
            Value::Response(r) => match property {
                "status" => Value::from(r.status),
                "statusText" => Value::from(r.status_text.as_str()),
                "ok" => Value::Bool((200..300).contains(&r.status)),
                "headers" => Value::Headers(r.headers.clone()),
                "cf" => r.cf.clone(),
                "body" => r.body.clone().map(Value::Stream).unwrap_or(Value::Null),
                _ => Value::Undefined,
            },
            Value::Blob(blob) => match property {
                "size" => Value::from(blob.bytes.len()),
                "type" => Value::from(blob.content_type.as_str()),
                "name" => {
                    blob.file.as_ref().map(|f| Value::from(f.name.as_str())).unwrap_or_default()
                }
                _ => Value::Undefined,
            },
            Value::Function(f) if property == "name" => Value::from(f.name()),
            _ => Value::Undefined,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

macro_rules! from_integer {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(n: $t) -> Self {
                Value::Number(n as f64)
            }
        })*
    };
}

from_integer!(i32, i64, u16, u32, u64, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Object> for Value {
    fn from(map: Object) -> Self {
        Value::Object(map)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<ErrorValue> for Value {
    fn from(e: ErrorValue) -> Self {
        Value::Error(e)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Undefined)
    }
}

// ============================================================================
//  ERRORS AS VALUES
// ============================================================================

/// An error travelling as data: what a remote call "throws".
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub cause: Option<Box<Value>>,
}

impl ErrorValue {
    /// A plain `Error` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
            cause: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::named("TypeError", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<Value>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for ErrorValue {}

// ============================================================================
//  FUNCTIONS
// ============================================================================

/// Result of invoking a `Function`.
pub type Invocation = BoxFuture<'static, std::result::Result<Value, ErrorValue>>;

type Callable = dyn Fn(Value, Vec<Value>) -> Invocation + Send + Sync;

/// An invocable value: an async callable plus an optional bound receiver.
#[derive(Clone)]
pub struct Function {
    name: Arc<str>,
    callable: Arc<Callable>,
    receiver: Option<Box<Value>>,
}

impl Function {
    /// Wraps an async callable taking `(receiver, arguments)`.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ErrorValue>> + Send + 'static,
    {
        let name: String = name.into();
        Self {
            name: name.into(),
            callable: Arc::new(move |this, args| f(this, args).boxed()),
            receiver: None,
        }
    }

    /// Wraps a synchronous callable that ignores its receiver.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<Value, ErrorValue> + Send + Sync + 'static,
    {
        Self::new(name, move |_this, args| futures::future::ready(f(args)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_bound(&self) -> bool {
        self.receiver.is_some()
    }

    /// Fixes the receiver. Rebinding an already bound function keeps the first receiver.
    pub fn bind(&self, receiver: Value) -> Self {
        if self.is_bound() {
            return self.clone();
        }
        Self {
            name: self.name.clone(),
            callable: self.callable.clone(),
            receiver: Some(Box::new(receiver)),
        }
    }

    pub fn invoke(&self, args: Vec<Value>) -> Invocation {
        let this = self.receiver.as_deref().cloned().unwrap_or_default();
        (self.callable)(this, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callable, &other.callable) && self.receiver == other.receiver
    }
}

// ============================================================================
//  HOST VALUES
// ============================================================================

/// An opaque application value. Equality is identity.
#[derive(Clone)]
pub struct HostObject {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl HostObject {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Host({})", self.type_name)
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
