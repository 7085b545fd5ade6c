//! Worker node: answers roll calls, installs functions and runs work orders.

mod execute;

use std::sync::Arc;

use fxn_network::{InboundReceiver, Messenger, Network, Pipeline};
use fxn_protocol::*;
use tokio_util::sync::CancellationToken;

use crate::cluster::{Cluster, ClusterTable};
use crate::config::{NodeConfig, WorkerConfig};
use crate::control::ExecutionControl;
use crate::error::NodeError;
use crate::executor::Executor;
use crate::fstore::FunctionStore;
use crate::node::NodeCore;
use crate::router::Router;

pub struct Worker {
    core: NodeCore,
    cfg: WorkerConfig,
    executor: Arc<dyn Executor>,
    fstore: Arc<dyn FunctionStore>,
    control: ExecutionControl,
    clusters: ClusterTable,
}

impl Worker {
    pub fn new(
        network: Arc<dyn Network>,
        node_cfg: NodeConfig,
        cfg: WorkerConfig,
        executor: Arc<dyn Executor>,
        fstore: Arc<dyn FunctionStore>,
        cancel: CancellationToken,
    ) -> Result<Self, NodeError> {
        cfg.validate()?;
        let core = NodeCore::new(Messenger::new(network), node_cfg, cancel)?;
        Ok(Self {
            core,
            cfg,
            control: ExecutionControl::new(executor.clone()),
            executor,
            fstore,
            clusters: ClusterTable::new(),
        })
    }

    pub fn id(&self) -> PeerId {
        self.core.id()
    }

    pub fn core(&self) -> &NodeCore {
        &self.core
    }

    /// Clusters this worker currently belongs to.
    pub fn clusters(&self) -> &ClusterTable {
        &self.clusters
    }

    pub async fn run(self: Arc<Self>, inbound: InboundReceiver) -> Result<(), NodeError> {
        let router = Arc::new(Self::router()?);
        self.core.run(self.clone(), router, inbound).await
    }

    fn router() -> Result<Router<Self>, NodeError> {
        Router::builder()
            .route(|_worker: Arc<Self>, from: PeerId, _msg: HealthCheck, _p| async move {
                tracing::trace!(peer = %from, "Peer health check received");
                Ok(())
            })
            .route(|worker: Arc<Self>, from, msg: InstallFunction, pipeline| async move {
                worker.process_install_function(from, msg, pipeline).await
            })
            .route(|worker: Arc<Self>, from, msg: RollCall, _p| async move {
                worker.process_roll_call(from, msg).await
            })
            .route(|worker: Arc<Self>, from, msg: Execute, _p| async move {
                worker.process_execute(from, msg).await
            })
            .route(|worker: Arc<Self>, from, msg: FormCluster, _p| async move {
                worker.process_form_cluster(from, msg).await
            })
            .route(|worker: Arc<Self>, from, msg: DisbandCluster, _p| async move {
                worker.process_disband_cluster(from, msg);
                Ok(())
            })
            .route(|worker: Arc<Self>, from, msg: ExecControl, _p| async move {
                worker.process_exec_control(from, msg).await
            })
            .build()
    }

    async fn process_install_function(
        &self,
        from: PeerId,
        req: InstallFunction,
        pipeline: Pipeline,
    ) -> Result<(), NodeError> {
        tracing::info!(
            peer = %from,
            cid = %req.cid,
            manifest_url = %req.manifest_url,
            pipeline = %pipeline,
            "Installing function"
        );

        let (code, message) = match self.fstore.install(&req.manifest_url, &req.cid).await {
            Ok(artifact) => {
                tracing::info!(cid = %req.cid, path = %artifact.path.display(), "Function installed");
                (Code::Ok, None)
            }
            Err(e) => {
                tracing::warn!(cid = %req.cid, error = %e, "Function install failed");
                (Code::Error, Some(e.to_string()))
            }
        };

        let res = InstallFunctionResponse {
            cid: req.cid,
            code,
            message,
        };
        self.core.send(&from, &res).await?;
        Ok(())
    }

    /// Answer a roll call: accepted if the function is installed and the
    /// attribute constraints match this worker.
    async fn process_roll_call(&self, from: PeerId, req: RollCall) -> Result<(), NodeError> {
        let attributes_ok = req
            .attributes
            .as_ref()
            .map_or(true, |attrs| attrs.satisfied_by(&self.cfg.attributes));

        let code = if !attributes_ok {
            tracing::debug!(request_id = %req.request_id, "Attributes do not match roll call");
            Code::NotFound
        } else {
            match self.fstore.is_installed(&req.function_id).await {
                Ok(true) => Code::Accepted,
                Ok(false) => Code::NotFound,
                Err(e) => {
                    tracing::warn!(function_id = %req.function_id, error = %e, "Could not check function store");
                    Code::Error
                }
            }
        };

        let origin = if req.origin.is_empty() { from } else { req.origin };
        tracing::debug!(
            request_id = %req.request_id,
            function_id = %req.function_id,
            origin = %origin,
            code = %code,
            "Answering roll call"
        );

        let res = RollCallResponse {
            request_id: req.request_id,
            function_id: req.function_id,
            code,
        };
        self.core.send(&origin, &res).await?;
        Ok(())
    }

    async fn process_form_cluster(&self, from: PeerId, req: FormCluster) -> Result<(), NodeError> {
        let is_member = req.peers.contains(&self.core.id());
        let (code, message) = if is_member {
            self.clusters
                .insert(Cluster::new(req.request_id.clone(), req.peers.clone(), req.consensus));
            tracing::info!(
                request_id = %req.request_id,
                consensus = %req.consensus,
                peers = req.peers.len(),
                "Joined cluster"
            );
            (Code::Ok, None)
        } else {
            (Code::Invalid, Some("not a member of the requested cluster".to_string()))
        };

        let res = FormClusterResponse {
            request_id: req.request_id,
            code,
            consensus: req.consensus,
            message,
        };
        self.core.send(&from, &res).await?;
        Ok(())
    }

    fn process_disband_cluster(&self, from: PeerId, req: DisbandCluster) {
        if self.clusters.remove(&req.request_id).is_some() {
            tracing::info!(request_id = %req.request_id, peer = %from, "Left cluster");
        }
    }
}
