use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use fxn_protocol::{encode, Message, PeerId, DEFAULT_TOPIC};
use tokio::sync::mpsc;

use crate::error::{NetworkError, SendFailures};
use crate::pipeline::Pipeline;

/// A raw payload delivered to this node.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sending peer.
    pub from: PeerId,
    /// Encoded message, type tag included.
    pub payload: Vec<u8>,
    /// How the message arrived.
    pub pipeline: Pipeline,
}

/// Stream of inbound payloads consumed by a node's receive loop.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// Transport operations a node depends on.
///
/// Implementations own peer discovery, connections and topic mechanics.
pub trait Network: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Whether an active transport connection to `peer` exists.
    fn connected(&self, peer: &PeerId) -> bool;

    fn send<'a>(&'a self, to: &'a PeerId, payload: Vec<u8>)
        -> BoxFuture<'a, Result<(), NetworkError>>;

    /// Join a topic for publishing without receiving its messages.
    fn join_topic<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<(), NetworkError>>;

    /// Join a topic and receive its messages.
    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<(), NetworkError>>;

    fn publish<'a>(&'a self, topic: &'a str, payload: Vec<u8>)
        -> BoxFuture<'a, Result<(), NetworkError>>;
}

/// Typed messaging over a [`Network`].
#[derive(Clone)]
pub struct Messenger {
    network: Arc<dyn Network>,
}

impl Messenger {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self { network }
    }

    pub fn local_peer(&self) -> PeerId {
        self.network.local_peer()
    }

    pub fn connected(&self, peer: &PeerId) -> bool {
        self.network.connected(peer)
    }

    pub async fn send<M: Message>(&self, to: &PeerId, msg: &M) -> Result<(), NetworkError> {
        let payload = encode(msg)?;
        self.network.send(to, payload).await?;
        tracing::trace!(peer = %to, msg_type = %M::TYPE, "Sent message");
        Ok(())
    }

    /// Send the same message to every peer concurrently.
    ///
    /// Failing every send is always an error. If only some sends fail the
    /// result depends on `require_all`: an error naming the failed peers, or
    /// a warning and success.
    pub async fn send_to_many<M: Message>(
        &self,
        peers: &[PeerId],
        msg: &M,
        require_all: bool,
    ) -> Result<(), NetworkError> {
        if peers.is_empty() {
            return Ok(());
        }

        let payload = encode(msg)?;
        let sends = peers.iter().map(|peer| {
            let payload = payload.clone();
            async move { (peer, self.network.send(peer, payload).await) }
        });

        let failures: Vec<(PeerId, String)> = join_all(sends)
            .await
            .into_iter()
            .filter_map(|(peer, res)| res.err().map(|e| (peer.clone(), e.to_string())))
            .collect();

        if failures.is_empty() {
            return Ok(());
        }

        let failures = SendFailures {
            total: peers.len(),
            failures,
        };

        if failures.failures.len() == peers.len() {
            return Err(NetworkError::AllSendsFailed(failures));
        }
        if require_all {
            return Err(NetworkError::PartialSend(failures));
        }

        tracing::warn!(
            msg_type = %M::TYPE,
            failed = failures.failures.len(),
            total = failures.total,
            "Some sends failed: {failures}"
        );
        Ok(())
    }

    /// Publish on the default topic.
    pub async fn publish<M: Message>(&self, msg: &M) -> Result<(), NetworkError> {
        self.publish_to_topic(DEFAULT_TOPIC, msg).await
    }

    /// Publish on a topic, joining it first if needed.
    pub async fn publish_to_topic<M: Message>(
        &self,
        topic: &str,
        msg: &M,
    ) -> Result<(), NetworkError> {
        let payload = encode(msg)?;
        self.network.join_topic(topic).await?;
        self.network.publish(topic, payload).await?;
        tracing::trace!(topic, msg_type = %M::TYPE, "Published message");
        Ok(())
    }

    pub async fn join_topic(&self, topic: &str) -> Result<(), NetworkError> {
        self.network.join_topic(topic).await
    }

    pub async fn subscribe(&self, topic: &str) -> Result<(), NetworkError> {
        self.network.subscribe(topic).await
    }
}
