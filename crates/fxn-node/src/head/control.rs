use std::time::Duration;

use fxn_protocol::{
    Code, ExecAction, ExecControl, ExecControlResponse, ExecutionResult, PeerId, ResultMap,
};

use super::{response_key, HeadNode};
use crate::error::NodeError;

impl HeadNode {
    /// Relay a control action to the peers running a detached execution.
    /// Returns the peers running it.
    ///
    /// A `wait` is only sent to peers that have neither reported a result
    /// nor been asked already. A finished execution is not relayed at all.
    pub async fn execution_control(
        &self,
        request_id: &str,
        action: ExecAction,
    ) -> Result<Vec<PeerId>, NodeError> {
        if action != ExecAction::Wait {
            return Err(NodeError::UnsupportedAction(action));
        }

        if let Some(done) = self.detached_results.get(&request_id.to_string()) {
            tracing::debug!(request_id, "Detached execution already finished");
            return Ok(done.into_keys().collect());
        }

        let peers = self
            .detached
            .peers(request_id)
            .filter(|peers| !peers.is_empty())
            .ok_or_else(|| NodeError::NoKnownPeers(request_id.to_string()))?;

        let targets = self.claim_wait_targets(request_id, &peers);
        if !targets.is_empty() {
            let msg = ExecControl {
                from: self.core.id(),
                request_id: request_id.to_string(),
                action,
            };
            if let Err(e) = self.core.send_to_many(&targets, &msg, false).await {
                self.release_wait_targets(request_id, &targets);
                return Err(e.into());
            }
        }

        tracing::info!(
            request_id,
            action = %action,
            peers = peers.len(),
            relayed = targets.len(),
            "Execution control relayed"
        );
        Ok(peers)
    }

    /// Wait for a detached execution to finish on every peer running it.
    ///
    /// Once every peer has reported, the results are kept by request ID and
    /// later waits return them without contacting the peers again.
    pub async fn execution_wait(
        &self,
        request_id: &str,
        timeout: Option<Duration>,
    ) -> Result<ResultMap, NodeError> {
        let peers = self.execution_control(request_id, ExecAction::Wait).await?;
        if let Some(done) = self.detached_results.get(&request_id.to_string()) {
            return Ok(done);
        }
        let timeout = timeout.unwrap_or_else(|| self.cfg.execution_timeout());

        let results = match self
            .gather(&self.control_responses, request_id, &peers, peers.len(), timeout)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                self.release_wait_targets(request_id, &peers);
                return Err(e);
            }
        };

        let silent: Vec<PeerId> = peers
            .iter()
            .filter(|peer| !results.contains_key(*peer))
            .cloned()
            .collect();
        if !silent.is_empty() {
            // Let a later wait ask these peers again.
            self.release_wait_targets(request_id, &silent);
        }
        if results.is_empty() {
            return Err(NodeError::ExecutionTimeout(request_id.to_string()));
        }

        if silent.is_empty() {
            self.detached_results
                .put(request_id.to_string(), results.clone());
            self.detached.remove(request_id);
            tracing::info!(request_id, peers = peers.len(), "Detached execution finished");
        }
        Ok(results)
    }

    /// Mark the peers that still need a `wait` as asked, and return them.
    fn claim_wait_targets(&self, request_id: &str, peers: &[PeerId]) -> Vec<PeerId> {
        let mut pending = self.pending_waits.lock();
        peers
            .iter()
            .filter(|peer| {
                let key = response_key(request_id, peer);
                !self.control_responses.contains(&key) && pending.insert(key)
            })
            .cloned()
            .collect()
    }

    fn release_wait_targets(&self, request_id: &str, peers: &[PeerId]) {
        let mut pending = self.pending_waits.lock();
        for peer in peers {
            pending.remove(&response_key(request_id, peer));
        }
    }

    /// A remote client asked this head to control an execution.
    pub(super) async fn process_exec_control(
        &self,
        from: PeerId,
        req: ExecControl,
    ) -> Result<(), NodeError> {
        tracing::debug!(request_id = %req.request_id, peer = %from, action = %req.action, "Execution control requested");
        self.execution_control(&req.request_id, req.action).await?;
        Ok(())
    }

    pub(super) fn process_exec_control_response(&self, from: PeerId, mut res: ExecControlResponse) {
        if let Some(message) = &res.message {
            tracing::warn!(request_id = %res.request_id, peer = %from, message = %message, "Execution control failed on peer");
        }

        let key = response_key(&res.request_id, &from);
        self.pending_waits.lock().remove(&key);

        let result = res.results.remove(&from).unwrap_or_else(|| {
            ExecutionResult::failed(
                res.request_id.clone(),
                Code::Error,
                res.message.clone().unwrap_or_else(|| "no result".to_string()),
            )
        });

        let keep_existing = !result.code.is_success()
            && self
                .control_responses
                .get(&key)
                .is_some_and(|existing| existing.code.is_success());
        if keep_existing {
            tracing::debug!(request_id = %res.request_id, peer = %from, code = %result.code, "Keeping earlier successful result");
            return;
        }
        self.control_responses.put(key, result);
    }
}
