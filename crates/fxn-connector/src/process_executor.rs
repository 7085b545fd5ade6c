//! Executor running functions as child processes.
//!
//! The command is `<runtime> <entry> <args...>`, or `<entry> <args...>` when
//! no runtime is configured, where `<entry>` is `<functions>/<cid>/<method>`.
//! Each request gets its own working directory under `<work>/t/<request id>`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use futures::future::BoxFuture;
use fxn_node::{Executor, ExecutorError, JobState};
use fxn_protocol::{Code, ExecutionRequest, ExecutionResult, ResourceUsage, RuntimeOutput};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::fstore::is_plain_name;

/// Names of the variables set from the request, `;` separated.
pub const LIST_VARS_ENV: &str = "FXN_LIST_VARS";

type Job = JoinHandle<Result<JobState, ExecutorError>>;

pub struct ProcessExecutor {
    functions_dir: PathBuf,
    work_dir: PathBuf,
    runtime: Option<PathBuf>,
    jobs: Mutex<HashMap<String, Job>>,
}

impl ProcessExecutor {
    pub fn new(
        functions_dir: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        runtime: Option<PathBuf>,
    ) -> Self {
        Self {
            functions_dir: functions_dir.into(),
            work_dir: work_dir.into(),
            runtime,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    async fn command(
        &self,
        request_id: &str,
        request: &ExecutionRequest,
    ) -> Result<Command, ExecutorError> {
        for (what, name) in [
            ("request id", request_id),
            ("function id", request.function_id.as_str()),
            ("method", request.method.as_str()),
        ] {
            if !is_plain_name(name) {
                return Err(ExecutorError::Failed(format!("invalid {what}: {name:?}")));
            }
        }

        let entry = self
            .functions_dir
            .join(&request.function_id)
            .join(&request.method);
        let workdir = self.work_dir.join("t").join(request_id);
        tokio::fs::create_dir_all(&workdir).await?;

        let mut cmd = match &self.runtime {
            Some(runtime) => {
                let mut cmd = Command::new(runtime);
                cmd.arg(&entry);
                cmd
            }
            None => Command::new(&entry),
        };

        cmd.args(
            request
                .parameters
                .iter()
                .map(|p| p.value.as_str())
                .filter(|v| !v.is_empty()),
        );

        let names: Vec<&str> = request.env_vars.iter().map(|e| e.name.as_str()).collect();
        cmd.envs(request.env_vars.iter().map(|e| (&e.name, &e.value)))
            .env(LIST_VARS_ENV, names.join(";"))
            .current_dir(&workdir)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }

    async fn spawn(
        &self,
        request_id: &str,
        request: &ExecutionRequest,
    ) -> Result<(Child, Instant), ExecutorError> {
        let mut cmd = self.command(request_id, request).await?;
        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutorError::Failed(format!("could not start process: {e}")))?;

        if let (Some(input), Some(mut pipe)) = (request.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "Process closed stdin early");
                }
            });
        }

        tracing::debug!(
            request_id,
            function_id = %request.function_id,
            pid = child.id(),
            "Process started"
        );
        Ok((child, started))
    }
}

async fn collect(child: Child, started: Instant) -> Result<JobState, ExecutorError> {
    let output = child.wait_with_output().await?;
    Ok(JobState {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
        usage: ResourceUsage {
            wall_clock_time_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        },
    })
}

impl Executor for ProcessExecutor {
    fn execute_function<'a>(
        &'a self,
        request_id: &'a str,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<ExecutionResult, ExecutorError>> {
        Box::pin(async move {
            let (child, started) = self.spawn(request_id, request).await?;
            let state = collect(child, started).await?;

            let (code, message) = match state.exit_code {
                Some(0) => (Code::Ok, None),
                Some(code) => (Code::Error, Some(format!("process exited with code {code}"))),
                None => (Code::Error, Some("process terminated by signal".to_string())),
            };

            Ok(ExecutionResult {
                code,
                request_id: request_id.to_string(),
                result: RuntimeOutput {
                    stdout: state.stdout,
                    stderr: state.stderr,
                    exit_code: state.exit_code.unwrap_or(-1),
                    log: None,
                },
                usage: state.usage,
                message,
            })
        })
    }

    fn supports_long_running_jobs(&self) -> bool {
        true
    }

    fn start<'a>(
        &'a self,
        request_id: &'a str,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<(), ExecutorError>> {
        Box::pin(async move {
            if self.jobs.lock().contains_key(request_id) {
                return Err(ExecutorError::DuplicateJob(request_id.to_string()));
            }
            let (child, started) = self.spawn(request_id, request).await?;
            let job = tokio::spawn(collect(child, started));
            self.jobs.lock().insert(request_id.to_string(), job);
            Ok(())
        })
    }

    fn wait<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>> {
        Box::pin(async move {
            let job = self
                .jobs
                .lock()
                .remove(request_id)
                .ok_or_else(|| ExecutorError::UnknownJob(request_id.to_string()))?;
            job.await
                .map_err(|e| ExecutorError::Failed(format!("job task failed: {e}")))?
        })
    }

    /// Kill a detached job. Its output is discarded.
    fn stop<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>> {
        Box::pin(async move {
            let job = self
                .jobs
                .lock()
                .remove(request_id)
                .ok_or_else(|| ExecutorError::UnknownJob(request_id.to_string()))?;
            job.abort();
            tracing::info!(request_id, "Detached job stopped");
            Ok(JobState::default())
        })
    }

    fn stats<'a>(&'a self, _request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>> {
        Box::pin(async { Err(ExecutorError::Unsupported("stats")) })
    }
}
