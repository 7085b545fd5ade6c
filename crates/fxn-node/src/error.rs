use fxn_network::NetworkError;
use fxn_protocol::{Code, ConsensusType, ExecAction, MessageType, ProtocolError};
use thiserror::Error;

use crate::executor::ExecutorError;
use crate::fstore::StoreError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Roll call already in progress for request {0}")]
    RollCallExists(String),

    #[error("Roll call timed out for request {0}")]
    RollCallTimeout(String),

    #[error("{consensus} needs at least {need} replicas, roll call found {have}")]
    InsufficientReplicas {
        consensus: ConsensusType,
        have: usize,
        need: usize,
    },

    #[error("A raft cluster is already active")]
    RaftClusterActive,

    #[error("Cluster formation failed for request {request_id}: {reason}")]
    ClusterFormation { request_id: String, reason: String },

    #[error("No results received for request {0}")]
    ExecutionTimeout(String),

    #[error("no known peers for detached execution (request: {0})")]
    NoKnownPeers(String),

    #[error("unsupported action: {0}")]
    UnsupportedAction(ExecAction),

    #[error("{0} not supported")]
    Unsupported(&'static str),

    #[error("executor doesn't support long running jobs")]
    LongRunningUnsupported,

    #[error("No handler registered for {0}")]
    UnhandledMessage(MessageType),

    #[error("Invalid router: {0}")]
    InvalidRouter(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Function store error: {0}")]
    Store(#[from] StoreError),
}

impl NodeError {
    /// Response code reported to the caller for this failure.
    pub fn code(&self) -> Code {
        match self {
            Self::RollCallTimeout(_) | Self::ExecutionTimeout(_) => Code::Timeout,
            Self::InsufficientReplicas { .. } | Self::RaftClusterActive => Code::NotAvailable,
            Self::UnsupportedAction(_) | Self::Unsupported(_) | Self::LongRunningUnsupported => {
                Code::Unsupported
            }
            Self::NoKnownPeers(_) => Code::NotFound,
            Self::Protocol(ProtocolError::InvalidRequest(_)) => Code::Invalid,
            Self::Store(e) if e.is_not_found() => Code::NotFound,
            _ => Code::Error,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RollCallTimeout(_) | Self::ExecutionTimeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
