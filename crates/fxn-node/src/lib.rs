//! fxn Node - Dispatch and response correlation for head and worker roles
//!
//! A head solicits peers with a roll call, forms a cluster when the request
//! asks for consensus, dispatches the work and correlates the responses. A
//! worker answers roll calls and runs functions through its [`Executor`].
//!
//! Both roles are built on [`NodeCore`], which owns the messenger, the node
//! configuration and the cancellation token, and on a [`Router`] mapping
//! message types to handlers.

pub mod cluster;
pub mod config;
pub mod control;
pub mod error;
pub mod executor;
pub mod fstore;
pub mod head;
pub mod node;
pub mod roll_call;
pub mod router;
pub mod waitmap;
pub mod worker;

pub use cluster::{Cluster, ClusterTable};
pub use config::{HeadConfig, NodeConfig, WorkerConfig};
pub use control::{ExecutionControl, JobHandle};
pub use node::NodeCore;
pub use error::NodeError;
pub use executor::{Executor, ExecutorError, JobState};
pub use fstore::{FunctionArtifact, FunctionStore, StoreError};
pub use head::{DispatchFailure, DispatchPhase, ExecutionOutcome, HeadNode, RollCallParams};
pub use roll_call::{NodeCount, RollCallCollector, RollCallGuard, RollCallReply};
pub use router::{Router, RouterBuilder};
pub use waitmap::{WaitError, WaitMap};
pub use worker::Worker;
