//! # Flattened Wire Format
//!
//! Values are written as a JSON array of slots. Slot 0 holds the root;
//! containers refer to their children by slot index. Values with no JSON
//! form are written as negative sentinels in place of an index.
//!
//! ## Format
//!
//! - **Primitives**: `null`, booleans, finite numbers and strings are stored inline.
//! - **Array**: `[i0, i1, ...]`, a list of slot indices (`-2` marks a hole).
//! - **Object**: `{"key": i, ...}`.
//! - **Reduced**: `["Name", i]`, where slot `i` holds the plain representation.
//!
//! Arrays of indices never start with a string, so the tagged form is unambiguous.

use serde_json::Value as Json;

use crate::Error;
use crate::Result;
use crate::binary::Blob;
use crate::binary::ByteStream;
use crate::registry::Reducers;
use crate::registry::Revivers;
use crate::value::Object;
use crate::value::Value;

pub const UNDEFINED: i64 = -1;
pub const HOLE: i64 = -2;
pub const NAN: i64 = -3;
pub const POSITIVE_INFINITY: i64 = -4;
pub const NEGATIVE_INFINITY: i64 = -5;
pub const NEGATIVE_ZERO: i64 = -6;

/// Reserved name for live streams.
pub const READABLE_STREAM: &str = "ReadableStream";
/// Reserved name for blobs and files.
pub const BLOB: &str = "Blob";

/// Deepest slot nesting either direction accepts.
pub const MAX_DEPTH: usize = 256;

/// A decoded value may be at most this many times the payload length, counted
/// in nodes plus string bytes. Shared slots are copied, so this bounds the copies.
pub const MAX_EXPANSION: usize = 8;

/// Smallest decode budget, so tiny payloads may still share slots.
const MIN_BUDGET: usize = 4096;

/// Largest integer magnitude written without a fractional part.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Decides what a live stream is written as during one encoder pass.
pub(crate) trait StreamSlots {
    fn plain(&mut self, stream: &ByteStream) -> Result<Value>;
}

/// Writes values into the flattened format.
pub(crate) struct Flattener<'a> {
    reducers: &'a Reducers,
    streams: &'a mut dyn StreamSlots,
    slots: Vec<Json>,
    keys: Vec<String>,
}

impl<'a> Flattener<'a> {
    pub(crate) fn new(reducers: &'a Reducers, streams: &'a mut dyn StreamSlots) -> Self {
        Self {
            reducers,
            streams,
            slots: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Flattens `value` and renders the document.
    pub(crate) fn stringify(mut self, value: &Value) -> Result<String> {
        let root = self.flatten(value, 0)?;
        if root < 0 {
            return Ok(root.to_string());
        }
        serde_json::to_string(&self.slots).map_err(|e| Error::InvalidInput(e.to_string()))
    }

    fn flatten(&mut self, value: &Value, depth: usize) -> Result<i64> {
        match value {
            Value::Undefined => return Ok(UNDEFINED),
            Value::Number(n) if n.is_nan() => return Ok(NAN),
            Value::Number(n) if *n == f64::INFINITY => return Ok(POSITIVE_INFINITY),
            Value::Number(n) if *n == f64::NEG_INFINITY => return Ok(NEGATIVE_INFINITY),
            Value::Number(n) if *n == 0.0 && n.is_sign_negative() => return Ok(NEGATIVE_ZERO),
            _ => {}
        }
        if depth > MAX_DEPTH {
            return Err(Error::Unserializable {
                kind: format!("{} nested deeper than {} levels", value.kind(), MAX_DEPTH),
                path: self.keys.concat(),
            });
        }

        // reserve the slot first so parents precede children
        let index = self.slots.len();
        self.slots.push(Json::Null);
        let slot = self.slot(value, depth + 1)?;
        self.slots[index] = slot;
        Ok(index as i64)
    }

    fn slot(&mut self, value: &Value, depth: usize) -> Result<Json> {
        match value {
            Value::Stream(stream) => {
                let plain = self.streams.plain(stream)?;
                return self.tagged(READABLE_STREAM, &plain, depth);
            }
            Value::Blob(blob) => return self.tagged(BLOB, &blob_plain(blob), depth),
            _ => {}
        }

        let reducers = self.reducers;
        if let Some((name, plain)) = reducers.reduce(value) {
            return self.tagged(name, &plain, depth);
        }

        match value {
            Value::Null => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            Value::Number(n) => number(*n),
            Value::String(s) => Ok(Json::String(s.clone())),
            Value::Array(items) => {
                let mut indices = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    self.keys.push(format!("[{}]", i));
                    indices.push(Json::from(self.flatten(item, depth)?));
                    self.keys.pop();
                }
                Ok(Json::Array(indices))
            }
            Value::Object(map) => {
                let mut fields = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    self.keys.push(path_key(key));
                    fields.insert(key.clone(), Json::from(self.flatten(item, depth)?));
                    self.keys.pop();
                }
                Ok(Json::Object(fields))
            }
            other => Err(Error::Unserializable {
                kind: other.kind().to_string(),
                path: self.keys.concat(),
            }),
        }
    }

    fn tagged(&mut self, name: &str, plain: &Value, depth: usize) -> Result<Json> {
        let index = self.flatten(plain, depth)?;
        Ok(Json::Array(vec![Json::String(name.to_string()), Json::from(index)]))
    }
}

/// `.key` for identifiers, `["key"]` for anything else.
fn path_key(key: &str) -> String {
    let mut chars = key.chars();
    let identifier = chars.next().is_some_and(|c| c == '_' || c == '$' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric());
    if identifier {
        return format!(".{}", key);
    }
    let quoted = serde_json::to_string(key).unwrap_or_else(|_| format!("\"{}\"", key));
    format!("[{}]", quoted)
}

fn number(n: f64) -> Result<Json> {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        return Ok(Json::from(n as i64));
    }
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .ok_or_else(|| Error::Unserializable { kind: "number".into(), path: String::new() })
}

fn blob_plain(blob: &Blob) -> Value {
    let mut items = vec![Value::Bytes(blob.bytes.clone()), Value::from(blob.content_type.as_str())];
    if let Some(file) = &blob.file {
        items.push(Value::from(file.name.as_str()));
        items.push(Value::Number(file.last_modified));
    }
    Value::Array(items)
}

fn sentinel(index: i64) -> Option<Value> {
    match index {
        UNDEFINED => Some(Value::Undefined),
        NAN => Some(Value::Number(f64::NAN)),
        POSITIVE_INFINITY => Some(Value::Number(f64::INFINITY)),
        NEGATIVE_INFINITY => Some(Value::Number(f64::NEG_INFINITY)),
        NEGATIVE_ZERO => Some(Value::Number(-0.0)),
        _ => None,
    }
}

/// Parses a flattened document, reviving tagged slots with `revivers`.
pub(crate) fn unflatten(text: &str, revivers: &Revivers) -> Result<Value> {
    let parsed: Json =
        serde_json::from_str(text).map_err(|e| Error::InvalidInput(e.to_string()))?;
    match parsed {
        Json::Number(n) => n
            .as_i64()
            .and_then(sentinel)
            .ok_or_else(|| Error::InvalidInput(format!("{} is not a standalone value", n))),
        Json::Array(slots) if !slots.is_empty() => {
            let budget = text.len().saturating_mul(MAX_EXPANSION).max(MIN_BUDGET);
            Unflattener::new(slots, revivers, budget).hydrate(0, 0).map(|root| root.value)
        }
        _ => Err(Error::InvalidInput("expected a non-empty slot array".into())),
    }
}

/// A hydrated value, its size in budget units and its slot height.
#[derive(Clone)]
struct Hydrated {
    value: Value,
    size: usize,
    height: usize,
}

impl Hydrated {
    fn leaf(value: Value) -> Self {
        Self { value, size: 1, height: 0 }
    }
}

struct Unflattener<'a> {
    slots: Vec<Json>,
    revivers: &'a Revivers,
    /// Slots referenced more than once keep their first hydration.
    shared: Vec<bool>,
    hydrated: Vec<Option<Hydrated>>,
    visiting: Vec<bool>,
    budget: usize,
}

impl<'a> Unflattener<'a> {
    fn new(slots: Vec<Json>, revivers: &'a Revivers, budget: usize) -> Self {
        let len = slots.len();
        let mut references = vec![0u32; len];
        for slot in &slots {
            let operands: Box<dyn Iterator<Item = &Json>> = match slot {
                Json::Array(items) if matches!(items.first(), Some(Json::String(_))) => {
                    Box::new(items.iter().skip(1))
                }
                Json::Array(items) => Box::new(items.iter()),
                Json::Object(fields) => Box::new(fields.values()),
                _ => continue,
            };
            for index in operands.filter_map(Json::as_u64) {
                let slot = usize::try_from(index).ok().and_then(|i| references.get_mut(i));
                if let Some(count) = slot {
                    *count = count.saturating_add(1);
                }
            }
        }
        Self {
            slots,
            revivers,
            shared: references.into_iter().map(|count| count > 1).collect(),
            hydrated: vec![None; len],
            visiting: vec![false; len],
            budget,
        }
    }

    fn charge(&mut self, units: usize) -> Result<()> {
        self.budget = self.budget.checked_sub(units).ok_or_else(|| {
            Error::InvalidInput("decoded value is too large for its payload".into())
        })?;
        Ok(())
    }

    /// Hydrates slot `index` found `depth` slots below the root.
    fn hydrate(&mut self, index: i64, depth: usize) -> Result<Hydrated> {
        if let Some(value) = sentinel(index) {
            return Ok(Hydrated::leaf(value));
        }
        let i = usize::try_from(index)
            .ok()
            .filter(|i| *i < self.slots.len())
            .ok_or_else(|| Error::InvalidInput(format!("slot {} out of range", index)))?;
        if self.visiting[i] {
            return Err(Error::InvalidInput(format!("cyclic reference to slot {}", i)));
        }
        let height = self.hydrated[i].as_ref().map_or(1, |h| h.height);
        if depth + height > MAX_DEPTH + 1 {
            return Err(Error::InvalidInput(format!("nested deeper than {} levels", MAX_DEPTH)));
        }
        if let Some(shared) = self.hydrated[i].clone() {
            self.charge(shared.size)?;
            return Ok(shared);
        }

        self.visiting[i] = true;
        let slot = std::mem::take(&mut self.slots[i]);
        let hydrated = self.hydrate_slot(&slot, depth + 1);
        self.slots[i] = slot;
        self.visiting[i] = false;

        let hydrated = hydrated?;
        if self.shared[i] {
            self.hydrated[i] = Some(hydrated.clone());
        }
        Ok(hydrated)
    }

    /// Hydrates the contents of one slot whose children sit at `depth`.
    /// Charges for the slot itself; children charge for themselves.
    fn hydrate_slot(&mut self, slot: &Json, depth: usize) -> Result<Hydrated> {
        let own = 1 + slot.as_str().map_or(0, str::len);
        self.charge(own)?;
        let mut size = own;
        let mut height = 0;
        let mut child = |hydrated: Hydrated| {
            size += hydrated.size;
            height = height.max(hydrated.height);
            hydrated.value
        };
        let value = match slot {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => n
                .as_f64()
                .map(Value::Number)
                .ok_or_else(|| Error::InvalidInput(format!("unrepresentable number {}", n)))?,
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => match items.first() {
                Some(Json::String(name)) => {
                    let plain = child(self.hydrate(revive_operand(name, items)?, depth)?);
                    self.revive(name, plain)?
                }
                _ => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        let index = slot_index(item)?;
                        if index == HOLE {
                            out.push(Value::Undefined);
                            continue;
                        }
                        out.push(child(self.hydrate(index, depth)?));
                    }
                    Value::Array(out)
                }
            },
            Json::Object(fields) => {
                let mut map = Object::new();
                for (key, item) in fields {
                    map.insert(key.clone(), child(self.hydrate(slot_index(item)?, depth)?));
                }
                Value::Object(map)
            }
        };
        Ok(Hydrated { value, size, height: height + 1 })
    }

    fn revive(&self, name: &str, plain: Value) -> Result<Value> {
        let reviver = self.revivers.get(name).ok_or_else(|| Error::UnknownType(name.to_string()))?;
        reviver(plain)
    }
}

/// The operand slot of a tagged `["Name", i]` slot.
fn revive_operand(name: &str, items: &[Json]) -> Result<i64> {
    let [_, inner] = items else {
        return Err(Error::InvalidInput(format!(
            "tagged slot {} must have exactly one operand",
            name
        )));
    };
    slot_index(inner)
}

fn slot_index(item: &Json) -> Result<i64> {
    item.as_i64()
        .ok_or_else(|| Error::InvalidInput(format!("expected a slot index, found {}", item)))
}
