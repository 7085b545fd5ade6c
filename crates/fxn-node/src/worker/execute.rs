use fxn_protocol::*;

use super::Worker;
use crate::error::NodeError;

impl Worker {
    pub(super) async fn process_execute(&self, from: PeerId, req: Execute) -> Result<(), NodeError> {
        let request_id = req.request_id;
        let request = req.request;

        let result = self.run_work_order(&request_id, &request).await;
        let code = result.code;
        let mut results = ResultMap::new();
        results.insert(self.core.id(), result);

        let res = ExecuteResponse {
            request_id,
            code,
            results,
            cluster: Vec::new(),
            message: None,
        };
        self.core.send(&from, &res).await?;
        Ok(())
    }

    async fn run_work_order(&self, request_id: &str, request: &ExecutionRequest) -> ExecutionResult {
        match self.fstore.is_installed(&request.function_id).await {
            Ok(true) => {}
            Ok(false) => {
                return ExecutionResult::failed(request_id, Code::NotFound, "function not installed")
            }
            Err(e) => return ExecutionResult::failed(request_id, Code::Error, e.to_string()),
        }

        if let Some(cluster) = self.clusters.get(request_id) {
            tracing::debug!(
                request_id,
                consensus = %cluster.consensus,
                "Executing as cluster member"
            );
        }

        if request.config.detached {
            return match self.control.start(request_id, request).await {
                Ok(_) => ExecutionResult {
                    code: Code::Accepted,
                    request_id: request_id.to_string(),
                    ..Default::default()
                },
                Err(e) => {
                    tracing::warn!(request_id, error = %e, "Could not start detached execution");
                    ExecutionResult::failed(request_id, e.code(), e.to_string())
                }
            };
        }

        match self.executor.execute_function(request_id, request).await {
            Ok(result) => {
                tracing::info!(request_id, code = %result.code, "Function executed");
                result
            }
            Err(e) => {
                tracing::warn!(request_id, error = %e, "Function execution failed");
                ExecutionResult::failed(request_id, Code::Error, e.to_string())
            }
        }
    }

    /// Only `wait` is served; other actions are rejected.
    pub(super) async fn process_exec_control(
        &self,
        from: PeerId,
        req: ExecControl,
    ) -> Result<(), NodeError> {
        if req.action != ExecAction::Wait {
            return Err(NodeError::UnsupportedAction(req.action));
        }

        let (results, message, outcome) = match self.control.wait(&req.request_id).await {
            Ok(result) => {
                let mut results = ResultMap::new();
                results.insert(self.core.id(), result);
                (results, None, Ok(()))
            }
            Err(e) => {
                let message = e.to_string();
                (ResultMap::new(), Some(message), Err(e))
            }
        };

        let res = ExecControlResponse {
            request_id: req.request_id,
            from: self.core.id(),
            action: req.action,
            results,
            message,
        };
        self.core.send(&from, &res).await?;
        outcome
    }
}
