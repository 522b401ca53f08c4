//! # Stream-aware Encoding
//!
//! `encode` produces a self-contained payload string plus at most one live
//! stream left unbuffered for the transport to carry alongside it.
//!
//! ## Phases
//!
//! 1. **Survey**: walk the value once, recording every live stream by identity.
//!    The first stream may be elected as the unbuffered side channel.
//! 2. **Buffer**: read every other recorded stream into memory, concurrently.
//! 3. **Substitute**: walk again with a table from stream identity to its bytes.
//!
//! If the survey found nothing to buffer, its output is already final.

use std::collections::HashMap;
use std::collections::HashSet;

use bytes::Bytes;
use futures::future::try_join_all;

use crate::Error;
use crate::Result;
use crate::binary::Blob;
use crate::binary::ByteStream;
use crate::binary::FileInfo;
use crate::flatten::BLOB;
use crate::flatten::Flattener;
use crate::flatten::READABLE_STREAM;
use crate::flatten::StreamSlots;
use crate::flatten::unflatten;
use crate::registry::Revivers;
use crate::registry::Reducers;
use crate::registry::expect_number;
use crate::registry::expect_string;
use crate::registry::revive_error;
use crate::value::Value;

/// An encoded payload and its optional side-channel stream.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub value: String,
    pub unbuffered_stream: Option<ByteStream>,
}

/// First pass: records streams, writing `true` placeholders.
#[derive(Default)]
struct Survey {
    allow_unbuffered: bool,
    unbuffered: Option<ByteStream>,
    pending: Vec<ByteStream>,
    seen: HashSet<u64>,
}

impl StreamSlots for Survey {
    fn plain(&mut self, stream: &ByteStream) -> Result<Value> {
        let elected = self.unbuffered.as_ref().is_some_and(|u| u.id() == stream.id());
        if !elected && self.seen.insert(stream.id()) {
            if self.allow_unbuffered && self.unbuffered.is_none() {
                self.unbuffered = Some(stream.clone());
            } else {
                self.pending.push(stream.clone());
            }
        }
        Ok(Value::Bool(true))
    }
}

/// Final pass: buffered streams become their bytes.
struct Substitutions {
    unbuffered: Option<u64>,
    buffered: HashMap<u64, Bytes>,
}

impl StreamSlots for Substitutions {
    fn plain(&mut self, stream: &ByteStream) -> Result<Value> {
        if self.unbuffered == Some(stream.id()) {
            return Ok(Value::Bool(true));
        }
        self.buffered
            .get(&stream.id())
            .cloned()
            .map(Value::Bytes)
            .ok_or(Error::StreamConsumed(stream.id()))
    }
}

/// Encodes `value`, buffering streams as needed.
///
/// With `allow_unbuffered_stream`, the first live stream found is returned
/// as `unbuffered_stream` instead of being read into the payload.
pub async fn encode(
    value: &Value,
    reducers: &Reducers,
    allow_unbuffered_stream: bool,
) -> Result<Encoded> {
    let mut survey = Survey { allow_unbuffered: allow_unbuffered_stream, ..Survey::default() };
    let surveyed = Flattener::new(reducers, &mut survey).stringify(value)?;

    if let Some(stream) = &survey.unbuffered {
        if stream.is_consumed() {
            return Err(Error::StreamConsumed(stream.id()));
        }
    }

    if survey.pending.is_empty() {
        return Ok(Encoded { value: surveyed, unbuffered_stream: survey.unbuffered });
    }

    tracing::trace!(streams = survey.pending.len(), "buffering streams before encode");
    let contents = try_join_all(survey.pending.iter().map(|s| s.buffer())).await?;

    let mut substitutions = Substitutions {
        unbuffered: survey.unbuffered.as_ref().map(ByteStream::id),
        buffered: survey.pending.iter().map(ByteStream::id).zip(contents).collect(),
    };
    let value = Flattener::new(reducers, &mut substitutions).stringify(value)?;
    Ok(Encoded { value, unbuffered_stream: survey.unbuffered })
}

/// Decodes a payload. `unbuffered_stream` is the side channel that arrived with it.
pub fn decode(
    payload: &str,
    unbuffered_stream: Option<ByteStream>,
    revivers: &Revivers,
) -> Result<Value> {
    let revivers = stream_revivers(unbuffered_stream).merge(revivers.clone());
    unflatten(payload, &revivers)
}

fn stream_revivers(unbuffered: Option<ByteStream>) -> Revivers {
    Revivers::new()
        .with(READABLE_STREAM, move |value| match value {
            Value::Bool(true) => unbuffered.clone().map(Value::Stream).ok_or(Error::MissingStream),
            Value::Bytes(bytes) => Ok(Value::Stream(ByteStream::from_bytes(bytes))),
            other => Err(revive_error(READABLE_STREAM, format!("unexpected {}", other.kind()))),
        })
        .with(BLOB, |value| {
            let Value::Array(items) = value else {
                return Err(revive_error(BLOB, "expected an array"));
            };
            let mut items = items.into_iter();
            let (Some(Value::Bytes(bytes)), Some(content_type)) = (items.next(), items.next())
            else {
                return Err(revive_error(BLOB, "expected [bytes, type, ...]"));
            };
            let content_type = expect_string(BLOB, "type", content_type)?;
            let file = match (items.next(), items.next(), items.next()) {
                (None, None, None) => None,
                (Some(name), Some(modified), None) => Some(FileInfo {
                    name: expect_string(BLOB, "name", name)?,
                    last_modified: expect_number(BLOB, "lastModified", modified)?,
                }),
                _ => return Err(revive_error(BLOB, "expected 2 or 4 items")),
            };
            Ok(Value::Blob(Blob { bytes, content_type, file }))
        })
}
