//! # Chainrpc
//!
//! Promise-pipelined, capability-passing RPC over an abstract message transport.
//!
//! A client records property reads and calls against a remote value with a
//! [`ChainBuilder`](builder::ChainBuilder) and sends the whole chain in a single
//! round trip. The server evaluates it against its exposed root and replies with
//! plain data, or with a reference to a new remote object kept in its heap.
//! Values are carried by the `revive` wire format.

pub mod builder;
pub mod capability;
pub mod chain;
pub mod channel;
pub mod client;
pub mod heap;
pub mod message;
pub mod resolver;
pub mod server;
pub mod stub;
pub mod transport;


pub use builder::ChainBuilder;
pub use client::Client;
pub use client::ClientBuilder;
pub use server::Server;
pub use server::ServerBuilder;
pub use stub::Stub;
