use std::time::Duration;

use fxn_protocol::{
    Attributes, Code, ConsensusType, PeerId, RollCall, RollCallResponse, DEFAULT_TOPIC,
};
use tokio::time::Instant;

use super::{DispatchPhase, HeadNode};
use crate::error::NodeError;
use crate::roll_call::{NodeCount, RollCallReply};

/// Parameters of one roll call.
#[derive(Debug, Clone)]
pub struct RollCallParams {
    /// Request being solicited for.
    pub request_id: String,
    /// Function replying peers must have installed.
    pub function_id: String,
    /// How many qualifying peers to wait for.
    pub node_count: NodeCount,
    /// Checked against the protocol's minimum replica count.
    pub consensus: ConsensusType,
    /// Topic to publish on; the default topic when unset.
    pub topic: Option<String>,
    /// Constraints a worker must satisfy to reply.
    pub attributes: Option<Attributes>,
    /// Overrides the configured roll call window.
    pub timeout: Option<Duration>,
}

impl RollCallParams {
    pub fn new(request_id: impl Into<String>, function_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            function_id: function_id.into(),
            node_count: NodeCount::Exactly(1),
            consensus: ConsensusType::None,
            topic: None,
            attributes: None,
            timeout: None,
        }
    }
}

impl HeadNode {
    /// Publish a roll call and collect the peers that qualify.
    ///
    /// With `NodeCount::Exactly(n)` this returns as soon as the n-th
    /// qualifying reply arrives. With `NodeCount::Any` it waits for the whole
    /// window and succeeds if at least one peer qualified. The result is
    /// checked against the consensus protocol's minimum replica count.
    pub async fn execute_roll_call(&self, params: &RollCallParams) -> Result<Vec<PeerId>, NodeError> {
        let request_id = params.request_id.as_str();
        let guard = self.roll_call.create(
            request_id,
            &params.function_id,
            params.consensus,
            params.attributes.clone(),
        )?;
        let mut replies = self
            .roll_call
            .responses(guard.request_id())
            .ok_or_else(|| NodeError::RollCallExists(request_id.to_string()))?;

        let msg = RollCall {
            origin: self.core.id(),
            function_id: params.function_id.clone(),
            request_id: request_id.to_string(),
            consensus: params.consensus,
            attributes: params.attributes.clone(),
        };
        let topic = params
            .topic
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TOPIC);
        self.core.publish_to_topic(topic, &msg).await?;

        let timeout = params.timeout.unwrap_or_else(|| self.cfg.roll_call_timeout());
        let deadline = Instant::now() + timeout;

        tracing::info!(
            request_id,
            function_id = %params.function_id,
            topic,
            node_count = %params.node_count,
            consensus = %params.consensus,
            timeout_ms = timeout.as_millis() as u64,
            phase = ?DispatchPhase::Waiting,
            "Roll call published"
        );

        let mut peers: Vec<PeerId> = Vec::new();
        loop {
            tokio::select! {
                _ = self.core.cancel_token().cancelled() => {
                    return Err(NodeError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    if params.node_count == NodeCount::Any && !peers.is_empty() {
                        tracing::info!(
                            request_id,
                            peers = peers.len(),
                            phase = ?DispatchPhase::Satisfied,
                            "Roll call window closed"
                        );
                        break;
                    }
                    tracing::warn!(
                        request_id,
                        peers = peers.len(),
                        wanted = %params.node_count,
                        phase = ?DispatchPhase::TimedOut,
                        "Roll call timed out"
                    );
                    return Err(NodeError::RollCallTimeout(request_id.to_string()));
                }
                reply = replies.recv() => {
                    let Some(reply) = reply else {
                        return Err(NodeError::RollCallTimeout(request_id.to_string()));
                    };
                    if !self.qualifies(params, &reply) {
                        continue;
                    }
                    if peers.contains(&reply.from) {
                        tracing::debug!(request_id, peer = %reply.from, "Duplicate roll call reply");
                        continue;
                    }

                    tracing::debug!(request_id, peer = %reply.from, "Peer reported for roll call");
                    peers.push(reply.from);

                    if params.node_count.is_satisfied_by(peers.len()) {
                        tracing::info!(
                            request_id,
                            peers = peers.len(),
                            phase = ?DispatchPhase::Satisfied,
                            "Roll call satisfied"
                        );
                        break;
                    }
                }
            }
        }

        if let Some(need) = params.consensus.minimum_replicas() {
            if peers.len() < need {
                tracing::warn!(
                    request_id,
                    consensus = %params.consensus,
                    have = peers.len(),
                    need,
                    "Not enough replicas for consensus"
                );
                return Err(NodeError::InsufficientReplicas {
                    consensus: params.consensus,
                    have: peers.len(),
                    need,
                });
            }
        }

        Ok(peers)
    }

    fn qualifies(&self, params: &RollCallParams, reply: &RollCallReply) -> bool {
        if reply.function_id != params.function_id {
            tracing::info!(
                request_id = %params.request_id,
                peer = %reply.from,
                function_id = %reply.function_id,
                "Skipping roll call reply for a different function"
            );
            return false;
        }
        if reply.code != Code::Accepted {
            return false;
        }
        if !self.core.connected(&reply.from) {
            tracing::info!(
                request_id = %params.request_id,
                peer = %reply.from,
                "Skipping roll call reply from unconnected peer"
            );
            return false;
        }
        true
    }

    pub(super) fn process_roll_call_response(&self, from: PeerId, res: RollCallResponse) {
        if res.code != Code::Accepted {
            tracing::info!(
                request_id = %res.request_id,
                peer = %from,
                code = %res.code,
                "Skipping roll call response"
            );
            return;
        }

        let reply = RollCallReply {
            from: from.clone(),
            function_id: res.function_id,
            code: res.code,
        };
        if !self.roll_call.add(&res.request_id, reply) {
            tracing::debug!(
                request_id = %res.request_id,
                peer = %from,
                "No active roll call for response, dropping"
            );
        }
    }
}
