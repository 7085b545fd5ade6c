//! In-process network.
//!
//! Every endpoint registered on a [`MemoryHub`] gets an inbound channel.
//! Connections are explicit so tests can model peers that answer without
//! being connected, and any endpoint can be marked unreachable to make
//! sends to it fail.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use fxn_protocol::PeerId;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::error::NetworkError;
use crate::messenger::{InboundMessage, InboundReceiver, Network};
use crate::pipeline::Pipeline;

struct Endpoint {
    tx: mpsc::UnboundedSender<InboundMessage>,
    subscribed: HashSet<String>,
    joined: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<PeerId, Endpoint>,
    links: HashSet<(PeerId, PeerId)>,
    unreachable: HashSet<PeerId>,
}

fn link(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Shared switchboard for in-process endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<RwLock<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. Re-registering a peer replaces its channel.
    pub fn join(&self, peer: PeerId) -> (Arc<MemoryNetwork>, InboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.write().endpoints.insert(
            peer.clone(),
            Endpoint {
                tx,
                subscribed: HashSet::new(),
                joined: HashSet::new(),
            },
        );
        tracing::debug!(peer = %peer, "Endpoint joined memory hub");
        let network = MemoryNetwork {
            hub: self.clone(),
            peer,
        };
        (Arc::new(network), rx)
    }

    /// Remove an endpoint and all its connections.
    pub fn leave(&self, peer: &PeerId) {
        let mut state = self.state.write();
        state.endpoints.remove(peer);
        state.links.retain(|(a, b)| a != peer && b != peer);
    }

    pub fn connect(&self, a: &PeerId, b: &PeerId) {
        self.state.write().links.insert(link(a, b));
    }

    pub fn disconnect(&self, a: &PeerId, b: &PeerId) {
        self.state.write().links.remove(&link(a, b));
    }

    /// Connect every registered endpoint to every other.
    pub fn connect_all(&self) {
        let mut state = self.state.write();
        let peers: Vec<PeerId> = state.endpoints.keys().cloned().collect();
        for (i, a) in peers.iter().enumerate() {
            for b in &peers[i + 1..] {
                state.links.insert(link(a, b));
            }
        }
    }

    /// Make direct sends to `peer` fail, or restore them.
    pub fn set_unreachable(&self, peer: &PeerId, unreachable: bool) {
        let mut state = self.state.write();
        if unreachable {
            state.unreachable.insert(peer.clone());
        } else {
            state.unreachable.remove(peer);
        }
    }

    pub fn is_connected(&self, a: &PeerId, b: &PeerId) -> bool {
        self.state.read().links.contains(&link(a, b))
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.state.read().endpoints.keys().cloned().collect()
    }

    fn deliver(&self, from: &PeerId, to: &PeerId, payload: Vec<u8>) -> Result<(), NetworkError> {
        let state = self.state.read();
        if state.unreachable.contains(to) {
            return Err(NetworkError::Send {
                peer: to.clone(),
                reason: "peer unreachable".into(),
            });
        }
        let endpoint = state.endpoints.get(to).ok_or_else(|| NetworkError::Send {
            peer: to.clone(),
            reason: "unknown peer".into(),
        })?;
        endpoint
            .tx
            .send(InboundMessage {
                from: from.clone(),
                payload,
                pipeline: Pipeline::Direct,
            })
            .map_err(|_| NetworkError::Send {
                peer: to.clone(),
                reason: "peer stopped receiving".into(),
            })
    }

    fn broadcast(&self, from: &PeerId, topic: &str, payload: Vec<u8>) -> Result<(), NetworkError> {
        let state = self.state.read();
        let sender = state.endpoints.get(from).ok_or(NetworkError::Closed)?;
        if !sender.joined.contains(topic) && !sender.subscribed.contains(topic) {
            return Err(NetworkError::Topic(format!("not joined to topic {topic}")));
        }

        let mut delivered = 0usize;
        for (peer, endpoint) in &state.endpoints {
            if peer == from || !endpoint.subscribed.contains(topic) {
                continue;
            }
            if state.unreachable.contains(peer) {
                continue;
            }
            let msg = InboundMessage {
                from: from.clone(),
                payload: payload.clone(),
                pipeline: Pipeline::pubsub(topic),
            };
            if endpoint.tx.send(msg).is_ok() {
                delivered += 1;
            }
        }
        tracing::trace!(peer = %from, topic, delivered, "Broadcast delivered");
        Ok(())
    }

    fn add_topic(&self, peer: &PeerId, topic: &str, subscribe: bool) -> Result<(), NetworkError> {
        let mut state = self.state.write();
        let endpoint = state.endpoints.get_mut(peer).ok_or(NetworkError::Closed)?;
        endpoint.joined.insert(topic.to_string());
        if subscribe {
            endpoint.subscribed.insert(topic.to_string());
        }
        Ok(())
    }
}

/// One endpoint on a [`MemoryHub`].
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: MemoryHub,
    peer: PeerId,
}

impl MemoryNetwork {
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }
}

impl Network for MemoryNetwork {
    fn local_peer(&self) -> PeerId {
        self.peer.clone()
    }

    fn connected(&self, peer: &PeerId) -> bool {
        self.hub.is_connected(&self.peer, peer)
    }

    fn send<'a>(
        &'a self,
        to: &'a PeerId,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), NetworkError>> {
        Box::pin(async move { self.hub.deliver(&self.peer, to, payload) })
    }

    fn join_topic<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<(), NetworkError>> {
        Box::pin(async move { self.hub.add_topic(&self.peer, topic, false) })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<(), NetworkError>> {
        Box::pin(async move { self.hub.add_topic(&self.peer, topic, true) })
    }

    fn publish<'a>(
        &'a self,
        topic: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), NetworkError>> {
        Box::pin(async move { self.hub.broadcast(&self.peer, topic, payload) })
    }
}
