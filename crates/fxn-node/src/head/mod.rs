//! Head node: solicits peers, forms clusters, dispatches work and
//! correlates the responses.
//!
//! Lifecycle of one execution:
//! 1. `Soliciting` - roll call published
//! 2. `Waiting` - collecting qualifying replies
//! 3. `Satisfied` / `TimedOut` - roll call window closed
//! 4. `Dispatched` - cluster formed if required, work sent
//! 5. `Aggregating` - collecting per-peer results
//! 6. `Done`

mod control;
mod execute;
mod roll_call;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use fxn_network::{InboundReceiver, Messenger, Network};
use fxn_protocol::*;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::cluster::{Cluster, ClusterTable};
use crate::config::{HeadConfig, NodeConfig};
use crate::error::NodeError;
use crate::node::NodeCore;
use crate::roll_call::RollCallCollector;
use crate::router::Router;
use crate::waitmap::WaitMap;

pub use execute::{DispatchFailure, ExecutionOutcome};
pub use roll_call::RollCallParams;

/// Stage of a single execution, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Soliciting,
    Waiting,
    Satisfied,
    TimedOut,
    Dispatched,
    Aggregating,
    Done,
}

/// Key for responses correlated per request and peer.
fn response_key(request_id: &str, peer: &PeerId) -> String {
    format!("{request_id}/{peer}")
}

pub struct HeadNode {
    core: NodeCore,
    cfg: HeadConfig,
    roll_call: RollCallCollector,
    /// Cluster formation replies, keyed by request/peer.
    consensus_responses: WaitMap<String, FormClusterResponse>,
    /// Execution results, keyed by request/peer.
    work_order_responses: WaitMap<String, ExecutionResult>,
    /// Detached execution results, keyed by request/peer.
    control_responses: WaitMap<String, ExecutionResult>,
    /// Aggregated results by request ID.
    execution_results: WaitMap<String, ResultMap>,
    /// Final results of detached executions every peer has reported on.
    detached_results: WaitMap<String, ResultMap>,
    /// Wait relays sent and not yet answered, keyed by request/peer.
    pending_waits: Mutex<HashSet<String>>,
    clusters: ClusterTable,
    /// Detached executions still running, with the peers running them.
    detached: ClusterTable,
}

impl HeadNode {
    pub fn new(
        network: Arc<dyn Network>,
        node_cfg: NodeConfig,
        cfg: HeadConfig,
        cancel: CancellationToken,
    ) -> Result<Self, NodeError> {
        cfg.validate()?;
        let core = NodeCore::new(Messenger::new(network), node_cfg, cancel)?;
        let capacity = cfg.result_cache_size;
        Ok(Self {
            core,
            cfg,
            roll_call: RollCallCollector::new(),
            consensus_responses: WaitMap::new(capacity),
            work_order_responses: WaitMap::new(capacity),
            control_responses: WaitMap::new(capacity),
            execution_results: WaitMap::new(capacity),
            detached_results: WaitMap::new(capacity),
            pending_waits: Mutex::new(HashSet::new()),
            clusters: ClusterTable::new(),
            detached: ClusterTable::bounded(capacity),
        })
    }

    pub fn id(&self) -> PeerId {
        self.core.id()
    }

    pub fn config(&self) -> &HeadConfig {
        &self.cfg
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    pub fn roll_calls(&self) -> &RollCallCollector {
        &self.roll_call
    }

    pub fn clusters(&self) -> &ClusterTable {
        &self.clusters
    }

    pub fn detached(&self) -> &ClusterTable {
        &self.detached
    }

    /// Start tracking a detached execution's peers outside of a dispatch,
    /// for example after a restart.
    pub fn track_detached(&self, request_id: &str, peers: Vec<PeerId>) {
        self.detached
            .insert(Cluster::new(request_id, peers, ConsensusType::None));
    }

    /// Aggregated results of a finished execution.
    pub fn execution_result(&self, request_id: &str) -> Option<ResultMap> {
        self.execution_results.get(&request_id.to_string())
    }

    /// Run the receive loop until cancelled.
    pub async fn run(self: Arc<Self>, inbound: InboundReceiver) -> Result<(), NodeError> {
        let router = Arc::new(Self::router()?);
        self.core.run(self.clone(), router, inbound).await
    }

    fn router() -> Result<Router<Self>, NodeError> {
        Router::builder()
            .route(|_head: Arc<Self>, from: PeerId, _msg: HealthCheck, _p| async move {
                tracing::trace!(peer = %from, "Peer health check received");
                Ok(())
            })
            .route(|head: Arc<Self>, from, msg: RollCallResponse, _p| async move {
                head.process_roll_call_response(from, msg);
                Ok(())
            })
            .route(|head: Arc<Self>, from, msg: Execute, _p| async move {
                head.process_execute(from, msg).await
            })
            .route(|head: Arc<Self>, from, msg: ExecuteResponse, _p| async move {
                head.process_execute_response(from, msg);
                Ok(())
            })
            .route(|head: Arc<Self>, from, msg: FormClusterResponse, _p| async move {
                head.process_form_cluster_response(from, msg);
                Ok(())
            })
            .route(|_head: Arc<Self>, from, msg: InstallFunctionResponse, _p| async move {
                process_install_function_response(from, msg);
                Ok(())
            })
            .route(|head: Arc<Self>, from, msg: ExecControl, _p| async move {
                head.process_exec_control(from, msg).await
            })
            .route(|head: Arc<Self>, from, msg: ExecControlResponse, _p| async move {
                head.process_exec_control_response(from, msg);
                Ok(())
            })
            .build()
    }

    /// Ask workers on `topic` (or the default topic) to install a function.
    /// Without a manifest URL the CID's gateway manifest is used.
    pub async fn publish_function_install(
        &self,
        manifest_url: &str,
        cid: &str,
        topic: Option<&str>,
    ) -> Result<(), NodeError> {
        let msg = InstallFunction::new(manifest_url, cid);
        let topic = topic.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TOPIC);
        self.core.publish_to_topic(topic, &msg).await?;
        tracing::info!(cid, manifest_url = %msg.manifest_url, topic, "Function install requested");
        Ok(())
    }

    /// Only one raft cluster may be active in this process at a time.
    ///
    /// Runs under the cluster table's write lock when a cluster is admitted.
    pub fn raft_cluster_guard(active: &HashMap<String, Cluster>) -> Result<(), NodeError> {
        if active
            .values()
            .any(|cluster| cluster.consensus == ConsensusType::Raft)
        {
            Err(NodeError::RaftClusterActive)
        } else {
            Ok(())
        }
    }
}

fn process_install_function_response(from: PeerId, msg: InstallFunctionResponse) {
    if msg.code == Code::Ok {
        tracing::info!(peer = %from, cid = %msg.cid, "Function installed on peer");
    } else {
        tracing::warn!(
            peer = %from,
            cid = %msg.cid,
            code = %msg.code,
            message = msg.message.as_deref().unwrap_or_default(),
            "Function install failed on peer"
        );
    }
}
