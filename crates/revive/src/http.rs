//! # HTTP-shaped Values
//!
//! Header maps, requests and responses, plus their reducer/reviver pairs.
//! Bodies are live byte streams and are handled by the stream-aware encoder.

use crate::Result;
use crate::binary::ByteStream;
use crate::registry::Reducers;
use crate::registry::Revivers;
use crate::registry::expect_items;
use crate::registry::expect_number;
use crate::registry::expect_string;
use crate::registry::revive_error;
use crate::value::Value;

pub const HEADERS: &str = "Headers";
pub const REQUEST: &str = "Request";
pub const RESPONSE: &str = "Response";

/// An ordered header list with case-insensitive names (stored lower-cased).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, keeping existing values for the same name.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    /// Replaces every value for `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, value.into()));
    }

    /// All values for `name` joined with `", "`, or `None` if absent.
    pub fn get(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let values: Vec<&str> = self
            .entries
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
            .collect();
        if values.is_empty() { None } else { Some(values.join(", ")) }
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.entries.iter().any(|(n, _)| *n == name)
    }

    /// Distinct names in first-seen order, each with its combined value.
    pub fn combined(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = Vec::new();
        for (name, value) in &self.entries {
            match out.iter_mut().find(|(n, _)| n == name) {
                Some((_, existing)) => {
                    existing.push_str(", ");
                    existing.push_str(value);
                }
                None => out.push((name.clone(), value.clone())),
            }
        }
        out
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name.as_ref(), value);
        }
        headers
    }
}

/// An HTTP request. `cf` carries platform request metadata, `Undefined` if absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub cf: Value,
    pub body: Option<ByteStream>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            cf: Value::Undefined,
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub cf: Value,
    pub body: Option<ByteStream>,
}

impl Response {
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Headers::new(),
            cf: Value::Undefined,
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: ByteStream) -> Self {
        self.body = Some(body);
        self
    }
}

impl From<Headers> for Value {
    fn from(h: Headers) -> Self {
        Value::Headers(h)
    }
}

impl From<Request> for Value {
    fn from(r: Request) -> Self {
        Value::Request(Box::new(r))
    }
}

impl From<Response> for Value {
    fn from(r: Response) -> Self {
        Value::Response(Box::new(r))
    }
}

fn body_value(body: &Option<ByteStream>) -> Value {
    body.clone().map(Value::Stream).unwrap_or(Value::Null)
}

fn expect_body(name: &str, value: Value) -> Result<Option<ByteStream>> {
    match value {
        Value::Null | Value::Undefined => Ok(None),
        Value::Stream(s) => Ok(Some(s)),
        other => {
            let reason = format!("body must be a stream or null, found {}", other.kind());
            Err(revive_error(name, reason))
        }
    }
}

fn expect_headers(name: &str, value: Value) -> Result<Headers> {
    match value {
        Value::Headers(h) => Ok(h),
        other => {
            let reason = format!("headers must be Headers, found {}", other.kind());
            Err(revive_error(name, reason))
        }
    }
}

/// Reducers for `Headers`, `Request` and `Response`.
pub fn http_reducers() -> Reducers {
    Reducers::new()
        .with(HEADERS, |value| match value {
            Value::Headers(h) => Some(Value::object(h.combined())),
            _ => None,
        })
        .with(REQUEST, |value| match value {
            Value::Request(r) => Some(Value::Array(vec![
                Value::from(r.method.as_str()),
                Value::from(r.url.as_str()),
                Value::Headers(r.headers.clone()),
                r.cf.clone(),
                body_value(&r.body),
            ])),
            _ => None,
        })
        .with(RESPONSE, |value| match value {
            Value::Response(r) => Some(Value::Array(vec![
                Value::from(r.status),
                Value::from(r.status_text.as_str()),
                Value::Headers(r.headers.clone()),
                r.cf.clone(),
                body_value(&r.body),
            ])),
            _ => None,
        })
}

/// Revivers matching [`http_reducers`].
pub fn http_revivers() -> Revivers {
    Revivers::new()
        .with(HEADERS, |value| {
            let Value::Object(map) = value else {
                let reason = format!("expected an object, found {}", value.kind());
                return Err(revive_error(HEADERS, reason));
            };
            let mut headers = Headers::new();
            for (name, v) in map {
                headers.append(&name, expect_string(HEADERS, &name, v)?);
            }
            Ok(Value::Headers(headers))
        })
        .with(REQUEST, |value| {
            let [method, url, headers, cf, body] = expect_items(REQUEST, value)?;
            Ok(Value::from(Request {
                method: expect_string(REQUEST, "method", method)?,
                url: expect_string(REQUEST, "url", url)?,
                headers: expect_headers(REQUEST, headers)?,
                cf,
                body: expect_body(REQUEST, body)?,
            }))
        })
        .with(RESPONSE, |value| {
            let [status, status_text, headers, cf, body] = expect_items(RESPONSE, value)?;
            let status = expect_number(RESPONSE, "status", status)?;
            if !(100.0..=999.0).contains(&status) || status.fract() != 0.0 {
                return Err(revive_error(RESPONSE, format!("invalid status {}", status)));
            }
            Ok(Value::from(Response {
                status: status as u16,
                status_text: expect_string(RESPONSE, "statusText", status_text)?,
                headers: expect_headers(RESPONSE, headers)?,
                cf,
                body: expect_body(RESPONSE, body)?,
            }))
        })
}
