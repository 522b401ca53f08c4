//! # Capability Reducers and Revivers
//!
//! The two names the RPC layer needs on top of the structured types:
//!
//! - **`RpcStub`**: a stub inside a result. The server promotes it into its heap
//!   and sends the heap id; the client revives a chain builder rooted there.
//! - **`UnresolvedChain`**: a chain reference, written as `{chain, targetHeapId}`.
//!   Clients send them as arguments; servers send one for a promoted result.

use std::sync::Arc;

use dashmap::DashMap;
use revive::Reducers;
use revive::Revivers;
use revive::Value;
use revive::registry::expect_string;
use revive::registry::revive_error;

use crate::builder::ChainBuilder;
use crate::chain::ChainRef;
use crate::client::Client;
use crate::heap::Heap;
use crate::stub::Stub;

pub const RPC_STUB: &str = "RpcStub";
pub const UNRESOLVED_CHAIN: &str = "UnresolvedChain";

fn chain_ref(value: Value) -> revive::Result<ChainRef> {
    ChainRef::from_value(value).map_err(|e| revive_error(UNRESOLVED_CHAIN, e.to_string()))
}

/// Stubs met while encoding one reply.
///
/// A stub already in the heap keeps its id. A new stub gets an id staged here,
/// the same one on every encoder pass, and only enters the heap on `commit`.
/// A reply that fails to encode is never committed.
pub struct Promotions {
    heap: Arc<Heap>,
    staged: DashMap<usize, (String, Stub)>,
}

impl Promotions {
    pub fn new(heap: Arc<Heap>) -> Self {
        Self { heap, staged: DashMap::new() }
    }

    fn promote(&self, stub: &Stub) -> String {
        if let Some(id) = self.heap.id_of(stub) {
            return id;
        }
        let staged = self.staged.entry(stub.identity());
        staged.or_insert_with(|| (Heap::mint(), stub.clone())).0.clone()
    }

    /// Moves every staged stub into the heap.
    pub fn commit(&self) {
        let keys: Vec<usize> = self.staged.iter().map(|e| *e.key()).collect();
        for key in keys {
            if let Some((_, (id, stub))) = self.staged.remove(&key) {
                self.heap.adopt(id, stub);
            }
        }
    }
}

/// Server reducers. Stubs found while encoding are staged in `promotions`.
pub fn server_reducers(promotions: Arc<Promotions>) -> Reducers {
    Reducers::new()
        .with(RPC_STUB, move |value| {
            Stub::from_value(value).map(|stub| Value::from(promotions.promote(stub)))
        })
        .with(UNRESOLVED_CHAIN, |value| ChainRef::from_host(value).map(ChainRef::to_value))
}

/// Server revivers. Chain arguments become `ChainRef` host values for the resolver.
pub fn server_revivers() -> Revivers {
    Revivers::new().with(UNRESOLVED_CHAIN, |value| chain_ref(value).map(Value::from))
}

/// Client reducers. Builders passed as values travel as their chain reference.
pub fn client_reducers() -> Reducers {
    Reducers::new().with(UNRESOLVED_CHAIN, |value| {
        if let Some(chain_ref) = ChainRef::from_host(value) {
            return Some(chain_ref.to_value());
        }
        ChainBuilder::from_value(value).map(|builder| builder.reveal().to_value())
    })
}

/// Client revivers. Remote references become chain builders bound to `client`.
pub fn client_revivers(client: &Client) -> Revivers {
    let stubs = client.clone();
    let chains = client.clone();
    Revivers::new()
        .with(RPC_STUB, move |value| {
            let id = expect_string(RPC_STUB, "id", value)?;
            Ok(Value::host(stubs.proxy(Some(id))))
        })
        .with(UNRESOLVED_CHAIN, move |value| {
            let target = chain_ref(value)?;
            Ok(Value::host(ChainBuilder::new(chains.clone(), target)))
        })
}
