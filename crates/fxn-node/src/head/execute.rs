use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use fxn_protocol::*;
use thiserror::Error;
use tokio::time::Instant;

use super::{response_key, DispatchPhase, HeadNode, RollCallParams};
use crate::cluster::Cluster;
use crate::error::NodeError;
use crate::roll_call::NodeCount;
use crate::waitmap::{WaitError, WaitMap};

/// Result of a dispatched execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    /// Request ID, generated when the caller left it empty.
    pub request_id: String,
    /// `Ok` when every expected result arrived, `Accepted` for a detached
    /// start, `Timeout` when only some results arrived.
    pub code: Code,
    /// Result reported by each peer.
    pub results: ResultMap,
    /// Peers the work was sent to.
    pub cluster: Vec<PeerId>,
}

/// An execution that failed before producing results.
#[derive(Error, Debug)]
#[error("request {request_id}: {error}")]
pub struct DispatchFailure {
    /// Request ID the failure belongs to, possibly generated.
    pub request_id: String,
    /// What went wrong.
    #[source]
    pub error: NodeError,
}

impl DispatchFailure {
    pub fn code(&self) -> Code {
        self.error.code()
    }
}

impl HeadNode {
    /// Run a function on peers found by roll call.
    pub async fn execute_function(
        &self,
        request: ExecutionRequest,
        topic: Option<String>,
    ) -> Result<ExecutionOutcome, DispatchFailure> {
        let request_id = new_request_id();
        let result = self.dispatch(&request_id, &request, topic).await;
        match result {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                tracing::warn!(
                    request_id = %request_id,
                    function_id = %request.function_id,
                    code = %error.code(),
                    error = %error,
                    "Execution failed"
                );
                Err(DispatchFailure { request_id, error })
            }
        }
    }

    async fn dispatch(
        &self,
        request_id: &str,
        request: &ExecutionRequest,
        topic: Option<String>,
    ) -> Result<ExecutionOutcome, NodeError> {
        let consensus = request.config.consensus;

        // Fail before soliciting anyone if the raft slot is taken.
        if consensus == ConsensusType::Raft && self.clusters.any_with(ConsensusType::Raft) {
            return Err(NodeError::RaftClusterActive);
        }

        tracing::info!(
            request_id,
            function_id = %request.function_id,
            consensus = %consensus,
            phase = ?DispatchPhase::Soliciting,
            "Processing execution request"
        );

        let params = RollCallParams {
            request_id: request_id.to_string(),
            function_id: request.function_id.clone(),
            node_count: NodeCount::from(request.config.node_count),
            consensus,
            topic,
            attributes: request.config.attributes.clone(),
            timeout: request.config.roll_call_timeout(),
        };
        let peers = self.execute_roll_call(&params).await?;
        let cluster = Cluster::new(request_id, peers, consensus);

        if consensus.is_required() {
            self.form_cluster(&cluster).await?;
        }

        let outcome = self.dispatch_work(&cluster, request).await;

        if consensus.is_required() {
            self.disband_cluster(request_id).await;
        }

        outcome
    }

    /// Ask every peer to join a cluster and wait until all have confirmed.
    /// Any missing or failed confirmation disbands the cluster.
    async fn form_cluster(&self, cluster: &Cluster) -> Result<(), NodeError> {
        let request_id = cluster.request_id.as_str();
        self.clusters.admit(cluster.clone(), |active| {
            if cluster.consensus == ConsensusType::Raft {
                Self::raft_cluster_guard(active)
            } else {
                Ok(())
            }
        })?;

        let msg = FormCluster {
            request_id: request_id.to_string(),
            peers: cluster.peers.clone(),
            consensus: cluster.consensus,
        };
        if let Err(e) = self.core.send_to_many(&cluster.peers, &msg, true).await {
            self.disband_cluster(request_id).await;
            return Err(e.into());
        }

        let deadline = Instant::now() + self.cfg.cluster_formation_timeout();
        let cancel = self.core.cancel_token();
        let waits = cluster.peers.iter().map(|peer| async move {
            let key = response_key(request_id, peer);
            (peer, self.consensus_responses.wait_until(&key, deadline, cancel).await)
        });

        let mut failures = Vec::new();
        for (peer, res) in join_all(waits).await {
            match res {
                Ok(reply) if reply.code == Code::Ok => {}
                Ok(reply) => failures.push(format!(
                    "peer {peer} replied {}{}",
                    reply.code,
                    reply.message.map(|m| format!(" ({m})")).unwrap_or_default()
                )),
                Err(WaitError::Timeout) => failures.push(format!("peer {peer} did not respond")),
                Err(WaitError::Cancelled) => {
                    self.disband_cluster(request_id).await;
                    return Err(NodeError::Cancelled);
                }
            }
        }

        if !failures.is_empty() {
            self.disband_cluster(request_id).await;
            return Err(NodeError::ClusterFormation {
                request_id: request_id.to_string(),
                reason: failures.join("; "),
            });
        }

        tracing::info!(
            request_id,
            consensus = %cluster.consensus,
            peers = cluster.peers.len(),
            "Cluster formed"
        );
        Ok(())
    }

    /// Forget a cluster and tell its peers, best effort.
    async fn disband_cluster(&self, request_id: &str) {
        let Some(cluster) = self.clusters.remove(request_id) else {
            return;
        };
        let msg = DisbandCluster {
            request_id: request_id.to_string(),
        };
        if let Err(e) = self.core.send_to_many(&cluster.peers, &msg, false).await {
            tracing::warn!(request_id, error = %e, "Failed to disband cluster");
        } else {
            tracing::debug!(request_id, "Cluster disbanded");
        }
    }

    async fn dispatch_work(
        &self,
        cluster: &Cluster,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, NodeError> {
        let request_id = cluster.request_id.as_str();
        let msg = Execute {
            request_id: request_id.to_string(),
            request: request.clone(),
            topic: None,
        };
        self.core
            .send_to_many(&cluster.peers, &msg, cluster.consensus.is_required())
            .await?;

        if request.config.detached {
            self.detached.insert(cluster.clone());
        }

        let expected = cluster.consensus.expected_results(cluster.peers.len());
        let timeout = request
            .config
            .timeout()
            .unwrap_or_else(|| self.cfg.execution_timeout());

        tracing::info!(
            request_id,
            peers = cluster.peers.len(),
            expected,
            phase = ?DispatchPhase::Dispatched,
            "Work order sent"
        );

        let results = self
            .gather(&self.work_order_responses, request_id, &cluster.peers, expected, timeout)
            .await?;
        if results.is_empty() {
            return Err(NodeError::ExecutionTimeout(request_id.to_string()));
        }

        let code = if results.len() < expected {
            Code::Timeout
        } else if request.config.detached {
            Code::Accepted
        } else {
            Code::Ok
        };

        self.execution_results
            .put(request_id.to_string(), results.clone());

        tracing::info!(
            request_id,
            code = %code,
            results = results.len(),
            phase = ?DispatchPhase::Done,
            "Execution complete"
        );

        Ok(ExecutionOutcome {
            request_id: request_id.to_string(),
            code,
            results,
            cluster: cluster.peers.clone(),
        })
    }

    /// Collect per-peer results from `map` until `expected` have arrived or
    /// the timeout elapses.
    pub(super) async fn gather(
        &self,
        map: &WaitMap<String, ExecutionResult>,
        request_id: &str,
        peers: &[PeerId],
        expected: usize,
        timeout: Duration,
    ) -> Result<ResultMap, NodeError> {
        let deadline = Instant::now() + timeout;
        let cancel = self.core.cancel_token();

        tracing::debug!(request_id, expected, phase = ?DispatchPhase::Aggregating, "Waiting for results");

        let mut pending: FuturesUnordered<_> = peers
            .iter()
            .map(|peer| async move {
                let key = response_key(request_id, peer);
                (peer, map.wait_until(&key, deadline, cancel).await)
            })
            .collect();

        let mut results = ResultMap::new();
        while let Some((peer, res)) = pending.next().await {
            match res {
                Ok(result) => {
                    results.insert(peer.clone(), result);
                    if results.len() >= expected {
                        break;
                    }
                }
                Err(WaitError::Timeout) => {
                    tracing::debug!(request_id, peer = %peer, "No result from peer");
                }
                Err(WaitError::Cancelled) => return Err(NodeError::Cancelled),
            }
        }

        Ok(results)
    }

    /// Execute on behalf of a remote client and reply with the outcome.
    pub(super) async fn process_execute(&self, from: PeerId, msg: Execute) -> Result<(), NodeError> {
        let response = match msg.request.validate() {
            Err(e) => ExecuteResponse {
                request_id: String::new(),
                code: Code::Invalid,
                results: ResultMap::new(),
                cluster: Vec::new(),
                message: Some(e.to_string()),
            },
            Ok(()) => match self.execute_function(msg.request, msg.topic).await {
                Ok(outcome) => ExecuteResponse {
                    request_id: outcome.request_id,
                    code: outcome.code,
                    results: outcome.results,
                    cluster: outcome.cluster,
                    message: None,
                },
                Err(failure) => ExecuteResponse {
                    code: failure.code(),
                    message: Some(failure.error.to_string()),
                    request_id: failure.request_id,
                    results: ResultMap::new(),
                    cluster: Vec::new(),
                },
            },
        };

        self.core.send(&from, &response).await?;
        Ok(())
    }

    /// Record the result a worker reported for itself.
    pub(super) fn process_execute_response(&self, from: PeerId, mut res: ExecuteResponse) {
        let result = match res.results.remove(&from) {
            Some(result) => result,
            None => {
                if !res.results.is_empty() {
                    tracing::warn!(
                        request_id = %res.request_id,
                        peer = %from,
                        "Ignoring results reported on behalf of other peers"
                    );
                }
                let message = res.message.unwrap_or_else(|| "no result".to_string());
                ExecutionResult::failed(res.request_id.clone(), res.code, message)
            }
        };

        tracing::debug!(request_id = %res.request_id, peer = %from, code = %result.code, "Execution result received");
        self.work_order_responses
            .put(response_key(&res.request_id, &from), result);
    }

    pub(super) fn process_form_cluster_response(&self, from: PeerId, res: FormClusterResponse) {
        tracing::debug!(
            request_id = %res.request_id,
            peer = %from,
            code = %res.code,
            consensus = %res.consensus,
            "Cluster formation response received"
        );
        self.consensus_responses
            .put(response_key(&res.request_id, &from), res);
    }
}
