//! Capabilities shared by head and worker nodes.

use std::sync::Arc;

use fxn_network::{InboundReceiver, Messenger, NetworkError};
use fxn_protocol::{message_type, Code, HealthCheck, Message, PeerId};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::router::Router;

/// Messenger, configuration and cancellation for one node.
pub struct NodeCore {
    messenger: Messenger,
    config: NodeConfig,
    cancel: CancellationToken,
}

impl NodeCore {
    pub fn new(
        messenger: Messenger,
        config: NodeConfig,
        cancel: CancellationToken,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        Ok(Self {
            messenger,
            config,
            cancel,
        })
    }

    pub fn id(&self) -> PeerId {
        self.messenger.local_peer()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn connected(&self, peer: &PeerId) -> bool {
        self.messenger.connected(peer)
    }

    pub async fn send<M: Message>(&self, to: &PeerId, msg: &M) -> Result<(), NetworkError> {
        self.messenger.send(to, msg).await
    }

    pub async fn send_to_many<M: Message>(
        &self,
        peers: &[PeerId],
        msg: &M,
        require_all: bool,
    ) -> Result<(), NetworkError> {
        self.messenger.send_to_many(peers, msg, require_all).await
    }

    pub async fn publish<M: Message>(&self, msg: &M) -> Result<(), NetworkError> {
        self.messenger.publish(msg).await
    }

    pub async fn publish_to_topic<M: Message>(
        &self,
        topic: &str,
        msg: &M,
    ) -> Result<(), NetworkError> {
        self.messenger.publish_to_topic(topic, msg).await
    }

    /// Receive loop. Subscribes to the configured topics, then hands each
    /// inbound message to `router` on its own task until the node is
    /// cancelled or the inbound stream ends.
    ///
    /// At most `concurrency` requests are handled at once. Responses bypass
    /// the limit and the loop itself never waits for a permit.
    pub async fn run<N>(
        &self,
        node: Arc<N>,
        router: Arc<Router<N>>,
        mut inbound: InboundReceiver,
    ) -> Result<(), NodeError>
    where
        N: Send + Sync + 'static,
    {
        for topic in self.config.subscriptions() {
            self.messenger.subscribe(&topic).await?;
            tracing::debug!(peer = %self.id(), topic = %topic, "Subscribed to topic");
        }

        let permits = Arc::new(Semaphore::new(self.config.concurrency));
        let mut health_interval = tokio::time::interval(self.config.health_interval());

        tracing::info!(peer = %self.id(), concurrency = self.config.concurrency, "Node is running");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(peer = %self.id(), "Node stopping");
                    break;
                }
                msg = inbound.recv() => {
                    let Some(msg) = msg else {
                        tracing::info!(peer = %self.id(), "Inbound stream closed");
                        break;
                    };
                    let node = node.clone();
                    let router = router.clone();
                    let permits = permits.clone();
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        // Responses complete work already holding a permit,
                        // so they never queue behind it.
                        let _permit = if is_response(&msg.payload) {
                            None
                        } else {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                permit = permits.acquire_owned() => match permit {
                                    Ok(permit) => Some(permit),
                                    Err(_) => return,
                                },
                            }
                        };
                        // Failures are logged by the router.
                        let _ = router.dispatch(node, msg.from, &msg.payload, msg.pipeline).await;
                    });
                }
                _ = health_interval.tick() => {
                    self.send_health_ping().await;
                }
            }
        }

        Ok(())
    }

    async fn send_health_ping(&self) {
        let ping = HealthCheck { code: Code::Ok };
        if let Err(e) = self.messenger.publish(&ping).await {
            tracing::warn!(peer = %self.id(), error = %e, "Failed to publish health ping");
        }
    }
}

fn is_response(payload: &[u8]) -> bool {
    message_type(payload).is_ok_and(|t| t.is_response())
}
