//! Execution engine interface.

use futures::future::BoxFuture;
use fxn_protocol::{ExecutionRequest, ExecutionResult, ResourceUsage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Function execution failed: {0}")]
    Failed(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),

    #[error("{0} not supported")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal state of a detached job as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobState {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// `None` when the engine could not observe how the process ended.
    pub exit_code: Option<i32>,
    /// Resources consumed so far.
    pub usage: ResourceUsage,
}

/// Runs functions. Sandboxing and resource limits are the engine's concern.
pub trait Executor: Send + Sync {
    /// Run a function to completion.
    fn execute_function<'a>(
        &'a self,
        request_id: &'a str,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<ExecutionResult, ExecutorError>>;

    fn supports_long_running_jobs(&self) -> bool;

    /// Start a detached job and return once it is running.
    fn start<'a>(
        &'a self,
        request_id: &'a str,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<(), ExecutorError>>;

    /// Wait for a detached job to reach a terminal state.
    fn wait<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>>;

    fn stop<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>>;

    fn stats<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>>;
}
