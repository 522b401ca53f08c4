//! # Revive
//!
//! Named reducer/reviver registries and a flattened JSON wire format for
//! structured values that plain JSON cannot carry.
//!
//! ## Model
//!
//! - **Value**: a dynamic tree of primitives, containers, binary data, errors,
//!   HTTP shapes, live streams and opaque host objects.
//! - **Reducer**: claims a special value and returns its plain representation.
//! - **Reviver**: rebuilds the special value from that representation.
//!
//! Pairs share a name, and the name is all that travels on the wire.
//!
//! ## Streams
//!
//! Live streams cannot be flattened synchronously. [`encode`] surveys the value,
//! buffers what must be buffered, then flattens again. At most one stream may
//! be left unbuffered and handed back for the transport to carry.

pub mod binary;
pub mod codec;
pub mod flatten;
pub mod http;
pub mod registry;
pub mod value;

#[cfg(test)]
mod tests;

pub use binary::Blob;
pub use binary::BufferView;
pub use binary::ByteStream;
pub use binary::FileInfo;
pub use binary::ViewKind;
pub use codec::Encoded;
pub use codec::decode;
pub use codec::encode;
pub use http::Headers;
pub use http::Request;
pub use http::Response;
pub use http::http_reducers;
pub use http::http_revivers;
pub use registry::Reducers;
pub use registry::Revivers;
pub use registry::structured_reducers;
pub use registry::structured_revivers;
pub use value::ErrorValue;
pub use value::Function;
pub use value::HostObject;
pub use value::Invocation;
pub use value::Object;
pub use value::Value;

/// Encoding and decoding errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No reducer claimed a value that has no plain form. `path` locates it from the root.
    Unserializable { kind: String, path: String },
    /// The payload is not a well-formed flattened document.
    InvalidInput(String),
    /// A tagged slot names a type with no registered reviver.
    UnknownType(String),
    /// A reviver rejected its plain representation.
    Revive { name: String, reason: String },
    /// The payload refers to a side-channel stream that did not arrive.
    MissingStream,
    /// The stream was already read by someone else.
    StreamConsumed(u64),
    /// Reading a stream failed.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Unserializable { kind, path } if path.is_empty() => {
                write!(f, "Cannot serialize {}", kind)
            }
            Error::Unserializable { kind, path } => {
                write!(f, "Cannot serialize {} at {}", kind, path)
            }
            Error::InvalidInput(reason) => write!(f, "Invalid input: {}", reason),
            Error::UnknownType(name) => write!(f, "Unknown type {}", name),
            Error::Revive { name, reason } => write!(f, "Cannot revive {}: {}", name, reason),
            Error::MissingStream => write!(f, "Payload refers to a stream that was not sent"),
            Error::StreamConsumed(id) => write!(f, "Stream {} was already consumed", id),
            Error::Io(reason) => write!(f, "Stream read failed: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for encoding operations.
pub type Result<T> = std::result::Result<T, Error>;
