use crate::*;

use std::io;

use bytes::Bytes;
use futures::stream;

fn reducers() -> Reducers {
    structured_reducers().merge(http_reducers())
}

fn revivers() -> Revivers {
    structured_revivers().merge(http_revivers())
}

async fn round_trip(value: &Value) -> Result<Value> {
    let encoded = encode(value, &reducers(), false).await?;
    decode(&encoded.value, encoded.unbuffered_stream, &revivers())
}

fn chunked(parts: &[&'static [u8]]) -> ByteStream {
    let chunks: Vec<io::Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
    ByteStream::new(stream::iter(chunks))
}

// ============================================================================
//  WIRE FORMAT
// ============================================================================

#[tokio::test]
async fn test_plain_object_layout() -> Result<()> {
    let value = Value::object([("a", Value::from(1)), ("b", Value::from("x"))]);
    let encoded = encode(&value, &reducers(), false).await?;
    assert_eq!(encoded.value, r#"[{"a":1,"b":2},1,"x"]"#);
    assert!(encoded.unbuffered_stream.is_none());
    Ok(())
}

#[tokio::test]
async fn test_root_sentinels() -> Result<()> {
    let cases = [
        (Value::Undefined, "-1"),
        (Value::Number(f64::NAN), "-3"),
        (Value::Number(f64::INFINITY), "-4"),
        (Value::Number(f64::NEG_INFINITY), "-5"),
        (Value::Number(-0.0), "-6"),
    ];
    for (value, expected) in cases {
        let encoded = encode(&value, &reducers(), false).await?;
        assert_eq!(encoded.value, expected);
    }
    Ok(())
}

#[tokio::test]
async fn test_array_buffer_layout() -> Result<()> {
    let value = Value::Bytes(Bytes::from_static(&[1, 2, 3]));
    let encoded = encode(&value, &reducers(), false).await?;
    assert_eq!(encoded.value, r#"[["ArrayBuffer",1],[2],"AQID"]"#);
    Ok(())
}

#[test]
fn test_decode_holes_and_sentinels() -> Result<()> {
    let value = decode("[[-2,-3,-6,1],2.5]", None, &revivers())?;
    let items = value.as_array().expect("array");
    assert_eq!(items.len(), 4);
    assert!(items[0].is_undefined());
    assert!(items[1].as_f64().expect("nan").is_nan());
    let zero = items[2].as_f64().expect("zero");
    assert!(zero == 0.0 && zero.is_sign_negative());
    assert_eq!(items[3], Value::Number(2.5));
    Ok(())
}

#[test]
fn test_shared_slots_decode_to_equal_values() -> Result<()> {
    let value = decode(r#"[{"left":1,"right":1},{"n":2},7]"#, None, &revivers())?;
    assert_eq!(value.get("left"), value.get("right"));
    assert_eq!(value.get("left").get("n"), Value::from(7));
    Ok(())
}

// ============================================================================
//  STRUCTURED TYPES
// ============================================================================

#[tokio::test]
async fn test_nested_plain_roundtrip() -> Result<()> {
    let value = Value::object([
        ("name", Value::from("Ada")),
        ("tags", Value::Array(vec![Value::from(true), Value::Null, Value::Undefined])),
        ("nested", Value::object([("ratio", Value::from(0.25)), ("big", Value::from(1e300))])),
    ]);
    assert_eq!(round_trip(&value).await?, value);
    Ok(())
}

#[tokio::test]
async fn test_buffer_view_roundtrip() -> Result<()> {
    let buffer = Bytes::from_static(&[0, 1, 2, 3, 4, 5, 6, 7]);
    let view = BufferView::new(ViewKind::Uint16Array, buffer, 2, 4)?;
    let back = round_trip(&Value::View(view.clone())).await?;
    let Value::View(back) = back else { panic!("expected a view") };
    assert_eq!(back, view);
    assert_eq!(back.len(), 2);
    assert_eq!(back.as_bytes(), &[2, 3, 4, 5]);
    Ok(())
}

#[test]
fn test_buffer_view_bounds() {
    let buffer = Bytes::from_static(&[0; 8]);
    assert!(BufferView::new(ViewKind::Uint8Array, buffer.clone(), 4, 8).is_err());
    assert!(BufferView::new(ViewKind::Uint32Array, buffer.clone(), 0, 6).is_err());
    assert!(BufferView::new(ViewKind::Float64Array, buffer, 0, 8).is_ok());
}

#[tokio::test]
async fn test_error_with_cause_roundtrip() -> Result<()> {
    let error = ErrorValue::type_error("bad input")
        .with_stack("TypeError: bad input\n    at check")
        .with_cause(ErrorValue::named("RangeError", "too big"));
    let back = round_trip(&Value::Error(error.clone())).await?;
    assert_eq!(back, Value::Error(error));
    assert_eq!(back.get("cause").get("name"), Value::from("RangeError"));
    Ok(())
}

#[tokio::test]
async fn test_error_name_coerced_to_error() -> Result<()> {
    let back = round_trip(&Value::Error(ErrorValue::named("DatabaseError", "down"))).await?;
    assert_eq!(back.get("name"), Value::from("Error"));
    assert_eq!(back.get("message"), Value::from("down"));
    Ok(())
}

#[test]
fn test_error_reviver_rejects_unknown_name() {
    let payload = r#"[["Error",1],[2,3,-1,-1],"MadeUpError","m"]"#;
    let err = decode(payload, None, &revivers()).unwrap_err();
    assert!(matches!(err, Error::Revive { ref name, .. } if name == "Error"));
}

#[tokio::test]
async fn test_headers_roundtrip_joins_duplicates() -> Result<()> {
    let headers: Headers = [("Content-Type", "text/plain"), ("X-Trace", "a"), ("x-trace", "b")]
        .into_iter()
        .collect();
    let back = round_trip(&Value::Headers(headers)).await?;
    let Value::Headers(back) = back else { panic!("expected headers") };
    assert_eq!(back.get("content-type").as_deref(), Some("text/plain"));
    assert_eq!(back.get("X-TRACE").as_deref(), Some("a, b"));
    Ok(())
}

#[tokio::test]
async fn test_request_with_body_roundtrip() -> Result<()> {
    let mut headers = Headers::new();
    headers.set("Accept", "application/json");
    let request = Request::new("POST", "https://example.com/items")
        .with_headers(headers)
        .with_body(chunked(&[b"hello ", b"world"]));
    let back = round_trip(&Value::from(request)).await?;
    let Value::Request(back) = back else { panic!("expected a request") };
    assert_eq!(back.method, "POST");
    assert_eq!(back.url, "https://example.com/items");
    assert_eq!(back.headers.get("accept").as_deref(), Some("application/json"));
    let body = back.body.expect("body");
    assert_eq!(body.buffer().await?, Bytes::from_static(b"hello world"));
    Ok(())
}

#[tokio::test]
async fn test_response_without_body_roundtrip() -> Result<()> {
    let response = Response::new(404, "Not Found");
    let back = round_trip(&Value::from(response)).await?;
    assert_eq!(back.get("status"), Value::from(404));
    assert_eq!(back.get("ok"), Value::Bool(false));
    assert_eq!(back.get("body"), Value::Null);
    Ok(())
}

#[test]
fn test_response_rejects_bad_status() {
    let payload = r#"[["Response",1],[2,3,4,-1,5],42,"",["Headers",6],null,{}]"#;
    let err = decode(payload, None, &revivers()).unwrap_err();
    assert!(matches!(err, Error::Revive { ref name, .. } if name == "Response"));
}

#[tokio::test]
async fn test_blob_and_file_roundtrip() -> Result<()> {
    let blob = Blob::new(Bytes::from_static(b"abc"), "text/plain");
    let file =
        Blob::file(Bytes::from_static(b"{}"), "application/json", "a.json", 1_700_000_000_000.0);
    let value = Value::Array(vec![Value::Blob(blob.clone()), Value::Blob(file.clone())]);
    let back = round_trip(&value).await?;
    assert_eq!(back, Value::Array(vec![Value::Blob(blob), Value::Blob(file)]));
    assert_eq!(back.get("1").get("name"), Value::from("a.json"));
    Ok(())
}

// ============================================================================
//  CUSTOM REGISTRIES
// ============================================================================

#[derive(Debug, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

#[tokio::test]
async fn test_custom_host_reducer() -> Result<()> {
    let reducers = reducers().with("Point", |value| {
        value
            .as_host::<Point>()
            .map(|p| Value::Array(vec![Value::from(p.x), Value::from(p.y)]))
    });
    let revivers = revivers().with("Point", |value| {
        let [x, y] = registry::expect_items("Point", value)?;
        Ok(Value::host(Point {
            x: registry::expect_number("Point", "x", x)?,
            y: registry::expect_number("Point", "y", y)?,
        }))
    });

    let encoded = encode(&Value::host(Point { x: 1.0, y: -2.5 }), &reducers, false).await?;
    assert!(encoded.value.starts_with(r#"[["Point",1]"#));
    let back = decode(&encoded.value, None, &revivers)?;
    assert_eq!(back.as_host::<Point>(), Some(&Point { x: 1.0, y: -2.5 }));
    Ok(())
}

#[tokio::test]
async fn test_merge_replaces_in_place() -> Result<()> {
    let first = Reducers::new()
        .with("Tagged", |v| v.as_str().map(|_| Value::from("first")))
        .with("Other", |_| None);
    let second = Reducers::new().with("Tagged", |v| v.as_str().map(|_| Value::from("second")));
    let merged = first.merge(second);
    assert_eq!(merged.names().collect::<Vec<_>>(), vec!["Tagged", "Other"]);
    let (name, plain) = merged.reduce(&Value::from("x")).expect("claimed");
    assert_eq!(name, "Tagged");
    assert_eq!(plain, Value::from("second"));
    Ok(())
}

// ============================================================================
//  FAILURES
// ============================================================================

#[tokio::test]
async fn test_function_is_unserializable_with_path() {
    let f = Function::sync("handler", |_| Ok(Value::Undefined));
    let value = Value::object([("handlers", Value::Array(vec![Value::Null, Value::from(f)]))]);
    let err = encode(&value, &reducers(), false).await.unwrap_err();
    assert_eq!(err, Error::Unserializable { kind: "function".into(), path: ".handlers[1]".into() });
}

#[test]
fn test_unknown_type() {
    let err = decode(r#"[["Mystery",1],null]"#, None, &revivers()).unwrap_err();
    assert_eq!(err, Error::UnknownType("Mystery".into()));
}

#[test]
fn test_invalid_documents() {
    for payload in ["", "not json", "[]", "{}", "7", "[[5]]", r#"[{"a":"x"}]"#] {
        let err = decode(payload, None, &revivers()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{} gave {:?}", payload, err);
    }
}

#[test]
fn test_cycle_rejected() {
    let err = decode("[[1],[0]]", None, &revivers()).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(ref reason) if reason.contains("cyclic")));
}

#[tokio::test]
async fn test_non_identifier_keys_are_bracketed_in_paths() {
    let f = Function::sync("handler", |_| Ok(Value::Undefined));
    let value = Value::object([("on click", Value::object([("_ok$1", Value::from(f))]))]);
    let err = encode(&value, &reducers(), false).await.unwrap_err();
    assert_eq!(
        err,
        Error::Unserializable { kind: "function".into(), path: r#"["on click"]._ok$1"#.into() }
    );
}

#[test]
fn test_shared_slot_expansion_is_bounded() {
    // every slot points twice at the next, doubling the decoded size per slot
    let slots: Vec<String> = (1..=40).map(|i| format!("[{},{}]", i, i)).collect();
    let payload = format!("[{},0]", slots.join(","));
    let err = decode(&payload, None, &revivers()).unwrap_err();
    assert!(
        matches!(err, Error::InvalidInput(ref reason) if reason.contains("too large")),
        "{:?}",
        err
    );
}

fn nested(levels: usize) -> Value {
    (0..levels).fold(Value::from(1), |inner, _| Value::Array(vec![inner]))
}

#[test]
fn test_deep_slot_chain_rejected() {
    let slots: Vec<String> = (1..200_000).map(|i| format!("[{}]", i)).collect();
    let payload = format!("[{},0]", slots.join(","));
    let err = decode(&payload, None, &revivers()).unwrap_err();
    assert!(
        matches!(err, Error::InvalidInput(ref reason) if reason.contains("deeper")),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_depth_limit_applies_to_both_directions() -> Result<()> {
    let deepest = nested(flatten::MAX_DEPTH);
    assert_eq!(round_trip(&deepest).await?, deepest);

    let err = encode(&nested(flatten::MAX_DEPTH + 1), &reducers(), false).await.unwrap_err();
    assert!(matches!(err, Error::Unserializable { ref kind, .. } if kind.contains("deeper")));

    let slots: Vec<String> = (1..=flatten::MAX_DEPTH + 1).map(|i| format!("[{}]", i)).collect();
    let payload = format!("[{},1]", slots.join(","));
    assert!(decode(&payload, None, &revivers()).is_err());
    Ok(())
}

// ============================================================================
//  STREAMS
// ============================================================================

#[tokio::test]
async fn test_single_stream_left_unbuffered() -> Result<()> {
    let body = chunked(&[b"abc"]);
    let encoded = encode(&Value::Stream(body.clone()), &reducers(), true).await?;
    assert_eq!(encoded.value, r#"[["ReadableStream",1],true]"#);
    let side = encoded.unbuffered_stream.expect("side channel");
    assert_eq!(side.id(), body.id());
    assert!(!body.is_consumed());

    let back = decode(&encoded.value, Some(side), &revivers())?;
    let Value::Stream(back) = back else { panic!("expected a stream") };
    assert_eq!(back.buffer().await?, Bytes::from_static(b"abc"));
    Ok(())
}

#[tokio::test]
async fn test_stream_buffered_when_side_channel_disallowed() -> Result<()> {
    let body = chunked(&[b"a", b"b"]);
    let encoded = encode(&Value::Stream(body.clone()), &reducers(), false).await?;
    assert!(encoded.unbuffered_stream.is_none());
    assert!(body.is_consumed());
    assert!(encoded.value.contains("ArrayBuffer"));
    Ok(())
}

#[tokio::test]
async fn test_extra_streams_are_buffered() -> Result<()> {
    let value = Value::object([
        ("a", Value::Stream(chunked(&[b"first"]))),
        ("b", Value::Stream(chunked(&[b"sec", b"ond"]))),
    ]);
    let encoded = encode(&value, &reducers(), true).await?;
    let side = encoded.unbuffered_stream.clone().expect("side channel");

    let back = decode(&encoded.value, Some(side), &revivers())?;
    let (Value::Stream(a), Value::Stream(b)) = (back.get("a"), back.get("b")) else {
        panic!("expected streams");
    };
    assert_eq!(a.buffer().await?, Bytes::from_static(b"first"));
    assert_eq!(b.buffer().await?, Bytes::from_static(b"second"));
    Ok(())
}

#[tokio::test]
async fn test_same_stream_twice_buffered_once() -> Result<()> {
    let body = chunked(&[b"shared"]);
    let value = Value::Array(vec![Value::Stream(body.clone()), Value::Stream(body)]);
    let encoded = encode(&value, &reducers(), false).await?;
    let back = decode(&encoded.value, None, &revivers())?;
    for item in back.as_array().expect("array") {
        let Value::Stream(s) = item else { panic!("expected a stream") };
        assert_eq!(s.buffer().await?, Bytes::from_static(b"shared"));
    }
    Ok(())
}

#[tokio::test]
async fn test_consumed_stream_rejected() {
    for allow in [true, false] {
        let body = chunked(&[b"gone"]);
        body.take();
        let err = encode(&Value::Stream(body.clone()), &reducers(), allow).await.unwrap_err();
        assert_eq!(err, Error::StreamConsumed(body.id()));
    }
}

#[tokio::test]
async fn test_stream_read_failure() {
    let failing = ByteStream::new(stream::iter(vec![
        Ok(Bytes::from_static(b"ok")),
        Err(io::Error::other("disk on fire")),
    ]));
    let err = encode(&Value::Stream(failing), &reducers(), false).await.unwrap_err();
    assert!(matches!(err, Error::Io(ref reason) if reason.contains("disk on fire")));
}

#[test]
fn test_missing_side_channel() {
    let err = decode(r#"[["ReadableStream",1],true]"#, None, &revivers()).unwrap_err();
    assert_eq!(err, Error::MissingStream);
}

// ============================================================================
//  VALUE ACCESS
// ============================================================================

#[test]
fn test_property_reads() {
    let value = Value::object([
        ("s", Value::from("héllo😀")),
        ("list", Value::Array(vec![Value::Null; 3])),
    ]);
    assert_eq!(value.get("s").get("length"), Value::from(7));
    assert_eq!(value.get("list").get("length"), Value::from(3));
    assert_eq!(value.get("list").get("9"), Value::Undefined);
    assert_eq!(value.get("missing").get("anything"), Value::Undefined);
    assert_eq!(Value::Bytes(Bytes::from_static(&[0; 5])).get("byteLength"), Value::from(5));
}

#[tokio::test]
async fn test_function_bind_keeps_first_receiver() {
    let f = Function::new("whoami", |this, _args| async move { Ok::<_, ErrorValue>(this) });
    let bound = f.bind(Value::from("first")).bind(Value::from("second"));
    assert_eq!(bound.invoke(vec![]).await, Ok(Value::from("first")));
    assert_eq!(f.invoke(vec![]).await, Ok(Value::Undefined));
}
