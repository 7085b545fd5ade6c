use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codes::Code;
use crate::consensus::ConsensusType;
use crate::constants::{ANY_NODE_COUNT, PBFT_MINIMUM_REPLICA_COUNT};
use crate::error::ProtocolError;
use crate::identity::PeerId;

/// Name/value pair used for function parameters and attribute constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Attribute constraints a worker must satisfy to answer a roll call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes {
    /// Required name/value pairs.
    #[serde(default)]
    pub values: Vec<Parameter>,
}

impl Attributes {
    /// True if every constraint is present with the same value in `node`.
    pub fn satisfied_by(&self, node: &HashMap<String, String>) -> bool {
        self.values
            .iter()
            .all(|want| node.get(&want.name).is_some_and(|have| *have == want.value))
    }
}

/// A request to run one function on some number of peers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Content ID of the function to run.
    pub function_id: String,
    /// Entry point inside the function artifact.
    pub method: String,
    /// Positional arguments, passed in order.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    /// Environment variables set for the invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<Parameter>,
    /// Fed to the function on standard input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// How and where the request runs.
    #[serde(default)]
    pub config: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of peers to run on; -1 means every peer that answers the roll call.
    #[serde(default = "default_node_count")]
    pub node_count: i32,
    /// Consensus protocol the executing peers form.
    #[serde(default)]
    pub consensus: ConsensusType,
    /// Constraints a worker must satisfy to be picked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Attributes>,
    /// Roll call window in seconds, overriding the head's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll_call_timeout_secs: Option<u64>,
    /// Result collection window in seconds, overriding the head's default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Start the job and return without waiting for it.
    #[serde(default)]
    pub detached: bool,
}

fn default_node_count() -> i32 {
    1
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            node_count: default_node_count(),
            consensus: ConsensusType::None,
            attributes: None,
            roll_call_timeout_secs: None,
            timeout_secs: None,
            detached: false,
        }
    }
}

impl ExecutionConfig {
    pub fn roll_call_timeout(&self) -> Option<Duration> {
        self.roll_call_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.filter(|secs| *secs > 0).map(Duration::from_secs)
    }
}

impl ExecutionRequest {
    pub fn new(function_id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            function_id: function_id.into(),
            method: method.into(),
            ..Default::default()
        }
    }

    /// Reject requests that could never be satisfied. Called at the API
    /// boundary; the orchestrator itself enforces the same limits after the
    /// roll call.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.function_id.is_empty() {
            return Err(ProtocolError::InvalidRequest("function_id is empty".into()));
        }
        if self.method.is_empty() {
            return Err(ProtocolError::InvalidRequest("method is empty".into()));
        }
        let count = self.config.node_count;
        if count == 0 || count < ANY_NODE_COUNT {
            return Err(ProtocolError::InvalidRequest(format!(
                "invalid node count: {count}"
            )));
        }
        if self.config.consensus == ConsensusType::Pbft
            && count > 0
            && (count as usize) < PBFT_MINIMUM_REPLICA_COUNT
        {
            return Err(ProtocolError::InvalidRequest(format!(
                "minimum {PBFT_MINIMUM_REPLICA_COUNT} nodes needed for PBFT consensus"
            )));
        }
        Ok(())
    }
}

/// Output captured from one function invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Process exit code, zero on success.
    pub exit_code: i32,
    /// Runtime log, when the executor keeps one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// Resource usage of one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Elapsed time of the invocation.
    pub wall_clock_time_ms: u64,
    pub cpu_user_time_ms: u64,
    pub cpu_sys_time_ms: u64,
    /// Peak resident memory.
    pub memory_max_kb: u64,
}

/// Result of executing a request on a single peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Outcome on this peer.
    pub code: Code,
    /// Request the result belongs to.
    pub request_id: String,
    /// Output of the invocation.
    #[serde(default)]
    pub result: RuntimeOutput,
    /// Resources the invocation consumed.
    #[serde(default)]
    pub usage: ResourceUsage,
    /// Error text when the invocation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecutionResult {
    pub fn failed(request_id: impl Into<String>, code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            request_id: request_id.into(),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Execution results keyed by the peer that produced them.
pub type ResultMap = HashMap<PeerId, ExecutionResult>;
