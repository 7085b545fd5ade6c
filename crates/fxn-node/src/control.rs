//! Local control of detached executions.
//!
//! A worker starts a detached job and later answers `wait` requests for it by
//! request ID. The executor owns the jobs; this layer checks that the
//! executor can run them and turns terminal job state into a result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fxn_protocol::{Code, ExecutionRequest, ExecutionResult, RuntimeOutput};

use crate::error::NodeError;
use crate::executor::{Executor, JobState};

/// Returned when a detached job has been started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// Request the job was started for.
    pub request_id: String,
    /// Function the job runs.
    pub function_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ExecutionControl {
    executor: Arc<dyn Executor>,
}

impl ExecutionControl {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    fn ensure_long_running(&self) -> Result<(), NodeError> {
        if self.executor.supports_long_running_jobs() {
            Ok(())
        } else {
            Err(NodeError::LongRunningUnsupported)
        }
    }

    pub async fn start(
        &self,
        request_id: &str,
        request: &ExecutionRequest,
    ) -> Result<JobHandle, NodeError> {
        self.ensure_long_running()?;
        self.executor.start(request_id, request).await?;

        tracing::info!(
            request_id,
            function_id = %request.function_id,
            "Detached execution started"
        );

        Ok(JobHandle {
            request_id: request_id.to_string(),
            function_id: request.function_id.clone(),
            started_at: Utc::now(),
        })
    }

    /// Block until the job finishes and report its output.
    pub async fn wait(&self, request_id: &str) -> Result<ExecutionResult, NodeError> {
        self.ensure_long_running()?;
        let state = self.executor.wait(request_id).await?;
        Ok(result_from_state(request_id, state))
    }

    pub async fn stop(&self, _request_id: &str) -> Result<ExecutionResult, NodeError> {
        self.ensure_long_running()?;
        Err(NodeError::Unsupported("stop"))
    }

    pub async fn stats(&self, _request_id: &str) -> Result<ExecutionResult, NodeError> {
        self.ensure_long_running()?;
        Err(NodeError::Unsupported("stats"))
    }
}

fn result_from_state(request_id: &str, state: JobState) -> ExecutionResult {
    let exit_code = state.exit_code.unwrap_or_else(|| {
        tracing::warn!(request_id, "Exit code missing for executed process");
        0
    });

    ExecutionResult {
        code: Code::Ok,
        request_id: request_id.to_string(),
        result: RuntimeOutput {
            stdout: state.stdout,
            stderr: state.stderr,
            exit_code,
            log: None,
        },
        usage: state.usage,
        message: None,
    }
}
