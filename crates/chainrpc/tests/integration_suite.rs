//! Integration tests: a client and a server talking over an in-process duplex channel.

use std::future::IntoFuture;
use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use futures::stream;
use rand::Rng;

use chainrpc::ChainBuilder;
use chainrpc::Client;
use chainrpc::ClientBuilder;
use chainrpc::Server;
use chainrpc::ServerBuilder;
use chainrpc::Stub;
use chainrpc::channel::DuplexChannelTransport;
use chainrpc::client::Error;
use chainrpc::message::Message;
use chainrpc::transport;
use chainrpc::transport::Transport;
use revive::ByteStream;
use revive::ErrorValue;
use revive::Function;
use revive::Response;
use revive::Value;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn first(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}

fn counter() -> Value {
    let count = Arc::new(AtomicU64::new(0));
    Value::object([
        ("label", Value::from("counter")),
        (
            "increment",
            Value::from(Function::sync("increment", move |_| {
                Ok(Value::from(count.fetch_add(1, Ordering::SeqCst) + 1))
            })),
        ),
    ])
}

/// The exposed root used by every test.
fn root() -> Value {
    let users = Value::object([(
        "get",
        Value::from(Function::sync("get", |args| {
            Ok(Value::object([("id", first(&args)), ("name", Value::from("Ada"))]))
        })),
    )]);

    Value::object([
        ("users", users),
        (
            "fail",
            Value::from(Function::sync("fail", |_| {
                Err(ErrorValue::new("boom").with_cause(ErrorValue::type_error("inner")))
            })),
        ),
        (
            "counter",
            Value::from(Function::sync("counter", |_| Ok(Value::from(Stub::new(counter()))))),
        ),
        (
            "session",
            Value::from(Function::sync("session", |_| {
                let user = Stub::new(Value::object([("name", "Grace")]));
                Ok(Value::object([("label", Value::from("s1")), ("user", Value::from(user))]))
            })),
        ),
        (
            "greet",
            Value::from(Function::sync("greet", |args| {
                let name = first(&args).get("name");
                Ok(Value::from(format!("Hello, {}", name.as_str().unwrap_or("stranger"))))
            })),
        ),
        ("describe", Value::from(Function::sync("describe", |args| Ok(first(&args).get("label"))))),
        (
            "delayed",
            Value::from(Function::new("delayed", |_this, args| async move {
                let ms = first(&args).as_f64().unwrap_or(0.0) as u64;
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<_, ErrorValue>(args.get(1).cloned().unwrap_or_default())
            })),
        ),
        (
            "hang",
            Value::from(Function::new("hang", |_this, _args| {
                std::future::pending::<Result<Value, ErrorValue>>()
            })),
        ),
        (
            "drain",
            Value::from(Function::new("drain", |_this, args| async move {
                match first(&args) {
                    Value::Stream(body) => body
                        .buffer()
                        .await
                        .map(Value::Bytes)
                        .map_err(|e| ErrorValue::new(e.to_string())),
                    other => {
                        let reason = format!("expected a stream, got {}", other.kind());
                        Err(ErrorValue::type_error(reason))
                    }
                }
            })),
        ),
        (
            "download",
            Value::from(Function::sync("download", |_| {
                let body = ByteStream::from_bytes(Bytes::from_static(b"payload"));
                Ok(Value::from(Response::new(200, "OK").with_body(body)))
            })),
        ),
    ])
}

fn session(name: &str) -> (Client, Server) {
    session_with(ClientBuilder::new(name))
}

fn session_with(builder: ClientBuilder) -> (Client, Server) {
    init_tracing();
    let (client_end, server_end) = DuplexChannelTransport::pair();
    let server = ServerBuilder::new(root()).name("root").build(server_end);
    tokio::spawn(server.clone().serve());
    (builder.connect(client_end), server)
}

fn builder_of(value: &Value) -> ChainBuilder {
    ChainBuilder::from_value(value)
        .unwrap_or_else(|| panic!("expected a remote reference, got {:?}", value))
}

// --- Basic calls ---

#[tokio::test]
async fn test_property_and_call_chain() -> Result<(), Error> {
    let (client, _server) = session("ada");
    let name = client.root().get("users").get("get").call(["42"]).get("name").await?;
    assert_eq!(name, Value::from("Ada"));

    let user = client.root().get("users").get("get").call(["7"]).await?;
    assert_eq!(user.get("id"), Value::from("7"));
    Ok(())
}

#[tokio::test]
async fn test_remote_error_keeps_message_and_cause() {
    let (client, _server) = session("boom");
    let err = client.root().get("fail").apply(vec![]).await.unwrap_err();
    let Error::Remote(e) = err else {
        panic!("expected a remote error, got {:?}", err);
    };
    assert_eq!(e.message, "boom");
    assert_eq!(e.cause.map(|c| c.get("name")), Some(Value::from("TypeError")));
}

#[tokio::test]
async fn test_unknown_heap_id_keeps_session_usable() -> Result<(), Error> {
    let (client, _server) = session("stale");
    let err = client.proxy(Some("never-issued".into())).get("anything").await.unwrap_err();
    assert!(
        matches!(err, Error::Protocol(ref reason) if reason.contains("never-issued")),
        "{:?}",
        err
    );

    let name = client.root().get("users").get("get").call(["1"]).get("name").await?;
    assert_eq!(name, Value::from("Ada"));
    Ok(())
}

// --- Capabilities ---

#[tokio::test]
async fn test_stub_is_promoted_and_reused() -> Result<(), Error> {
    let (client, server) = session("stub");
    let counter = builder_of(&client.root().get("counter").apply(vec![]).await?);
    assert!(counter.target_heap_id().is_some_and(|id| server.heap().contains(id)));

    assert_eq!(counter.get("increment").apply(vec![]).await?, Value::from(1));
    assert_eq!(counter.get("increment").apply(vec![]).await?, Value::from(2));
    assert_eq!(counter.get("label").await?, Value::from("counter"));
    assert_eq!(server.heap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_pipelined_call_on_returned_stub() -> Result<(), Error> {
    let (client, server) = session("pipeline");
    let first = client.root().get("counter").apply(vec![]).get("increment").apply(vec![]).await?;
    assert_eq!(first, Value::from(1));
    assert!(server.heap().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_stub_nested_in_result() -> Result<(), Error> {
    let (client, _server) = session("nested");
    let session_value = client.root().get("session").apply(vec![]).await?;
    assert_eq!(session_value.get("label"), Value::from("s1"));
    let user = builder_of(&session_value.get("user"));
    assert_eq!(user.get("name").await?, Value::from("Grace"));
    Ok(())
}

#[tokio::test]
async fn test_pending_call_as_argument() -> Result<(), Error> {
    let (client, _server) = session("capability");
    let user = client.root().get("users").get("get").call(["42"]);
    let greeting = client.root().get("greet").call([user]).await?;
    assert_eq!(greeting, Value::from("Hello, Ada"));
    Ok(())
}

#[tokio::test]
async fn test_stub_passed_back_as_argument() -> Result<(), Error> {
    let (client, _server) = session("round-trip");
    let counter = builder_of(&client.root().get("counter").apply(vec![]).await?);
    let label = client.root().get("describe").call([counter]).await?;
    assert_eq!(label, Value::from("counter"));
    Ok(())
}

#[tokio::test]
async fn test_release_drops_heap_entry() -> Result<(), Error> {
    let (client, server) = session("release");
    let counter = builder_of(&client.root().get("counter").apply(vec![]).await?);
    assert_eq!(server.heap().len(), 1);

    assert!(counter.release().await?);
    assert!(server.heap().is_empty());
    assert!(!counter.release().await?);

    let err = counter.get("increment").apply(vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{:?}", err);
    Ok(())
}

// --- Streams ---

#[tokio::test]
async fn test_stream_argument_rides_the_side_channel() -> Result<(), Error> {
    let (client, _server) = session("upload");
    let chunks: Vec<io::Result<Bytes>> =
        vec![Ok(Bytes::from_static(b"chunk-1,")), Ok(Bytes::from_static(b"chunk-2"))];
    let upload = Value::Stream(ByteStream::new(stream::iter(chunks)));

    let drained = client.root().get("drain").call([upload]).await?;
    assert_eq!(drained, Value::Bytes(Bytes::from_static(b"chunk-1,chunk-2")));
    Ok(())
}

#[tokio::test]
async fn test_response_body_streams_back() -> Result<(), Error> {
    let (client, _server) = session("download");
    let response = client.root().get("download").apply(vec![]).await?;
    let Value::Response(response) = response else {
        panic!("expected a response, got {:?}", response);
    };
    assert_eq!(response.status, 200);
    let body = response.body.expect("body");
    assert_eq!(body.buffer().await?, Bytes::from_static(b"payload"));
    Ok(())
}

// --- Session behaviour ---

/// Counts sends on the way through.
struct CountingTransport {
    inner: DuplexChannelTransport,
    sends: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Transport for CountingTransport {
    async fn send(&self, message: Message) -> transport::Result<()> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.inner.send(message).await
    }

    async fn recv(&self) -> transport::Result<Option<Message>> {
        self.inner.recv().await
    }
}

#[tokio::test]
async fn test_lazy_until_resolved_then_exactly_once() -> Result<(), Error> {
    init_tracing();
    let (client_end, server_end) = DuplexChannelTransport::pair();
    tokio::spawn(Server::new(root(), server_end).serve());
    let sends = Arc::new(AtomicUsize::new(0));
    let transport = CountingTransport { inner: client_end, sends: sends.clone() };
    let client = Client::connect("counting", transport);

    let mut chain = client.root().get("users").get("get").call(["42"]);
    for _ in 0..50 {
        chain = chain.get("name").get("length");
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sends.load(Ordering::SeqCst), 0);

    let _ = chain.await;
    assert_eq!(sends.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() -> Result<(), Error> {
    let (client, _server) = session("shuffle");
    let mut rng = rand::thread_rng();
    let calls: Vec<_> = (0..8usize)
        .map(|tag| {
            let delay = rng.gen_range(0..40u64);
            client.root().get("delayed").call([Value::from(delay), Value::from(tag)]).into_future()
        })
        .collect();

    let results = futures::future::join_all(calls).await;
    for (tag, result) in results.into_iter().enumerate() {
        assert_eq!(result?, Value::from(tag));
    }
    Ok(())
}

#[tokio::test]
async fn test_deadline_then_session_still_usable() -> Result<(), Error> {
    let (client, _server) =
        session_with(ClientBuilder::new("deadline").deadline(Some(Duration::from_millis(50))));
    let err = client.root().get("hang").apply(vec![]).await.unwrap_err();
    assert_eq!(err, Error::Timeout);
    assert_eq!(client.pending_calls(), 0);

    let name = client.root().get("users").get("get").call(["1"]).get("name").await?;
    assert_eq!(name, Value::from("Ada"));
    Ok(())
}

#[tokio::test]
async fn test_connection_lost_fails_pending_calls() {
    init_tracing();
    let (client_end, server_end) = DuplexChannelTransport::pair();
    let client = Client::connect("orphan", client_end);

    let call = tokio::spawn(client.root().get("anything").into_future());
    let request = server_end.recv().await.expect("transport").expect("request");
    assert!(request.text.len() > chainrpc::message::MESSAGE_ID_LEN);
    drop(server_end);

    let result = call.await.expect("task");
    assert!(
        matches!(result, Err(Error::Transport(transport::Error::ConnectionLost(_)))),
        "{:?}",
        result
    );
}

// --- Extension types ---

#[derive(Debug, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

#[tokio::test]
async fn test_custom_reducers_on_both_sides() -> Result<(), Error> {
    init_tracing();
    let reducers = || {
        revive::Reducers::new().with("Point", |value| {
            value.as_host::<Point>().map(|p| Value::Array(vec![Value::from(p.x), Value::from(p.y)]))
        })
    };
    let revivers = || {
        revive::Revivers::new().with("Point", |value| {
            let [x, y] = revive::registry::expect_items("Point", value)?;
            Ok(Value::host(Point {
                x: revive::registry::expect_number("Point", "x", x)?,
                y: revive::registry::expect_number("Point", "y", y)?,
            }))
        })
    };

    let shapes = Value::object([(
        "mirror",
        Value::from(Function::sync("mirror", |args| match first(&args).as_host::<Point>() {
            Some(p) => Ok(Value::host(Point { x: -p.x, y: -p.y })),
            None => Err(ErrorValue::type_error("expected a point")),
        })),
    )]);

    let (client_end, server_end) = DuplexChannelTransport::pair();
    let server =
        ServerBuilder::new(shapes).reducers(reducers()).revivers(revivers()).build(server_end);
    tokio::spawn(server.serve());
    let client =
        ClientBuilder::new("shapes").reducers(reducers()).revivers(revivers()).connect(client_end);

    let mirrored = client.root().get("mirror").call([Value::host(Point { x: 1.0, y: 2.0 })]).await?;
    assert_eq!(mirrored.as_host::<Point>(), Some(&Point { x: -1.0, y: -2.0 }));
    Ok(())
}
