//! In-process head and workers on one memory hub.

use std::sync::Arc;

use anyhow::{Context, Result};
use fxn_network::MemoryHub;
use fxn_node::{HeadNode, NodeError, Worker};
use fxn_protocol::PeerId;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectorConfig;
use crate::fstore::DirFunctionStore;
use crate::process_executor::ProcessExecutor;

pub const HEAD_NAME: &str = "head";

pub struct LocalSwarm {
    /// In-memory network all nodes are joined to.
    pub hub: MemoryHub,
    pub head: Arc<HeadNode>,
    /// Workers named `worker-<n>`.
    pub workers: Vec<Arc<Worker>>,
    tasks: Vec<(PeerId, JoinHandle<Result<(), NodeError>>)>,
}

impl LocalSwarm {
    /// Build the swarm and start every node loop. The loops stop when
    /// `cancel` is cancelled.
    pub async fn start(config: &ConnectorConfig, cancel: &CancellationToken) -> Result<Self> {
        let hub = MemoryHub::new();
        let mut tasks = Vec::new();

        let (net, rx) = hub.join(PeerId::new(HEAD_NAME));
        let head = Arc::new(HeadNode::new(
            net,
            config.node.clone(),
            config.head.clone(),
            cancel.child_token(),
        )?);
        tasks.push((head.id(), tokio::spawn(head.clone().run(rx))));

        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let name = format!("worker-{i}");
            let functions = config.functions_dir(&name);
            tokio::fs::create_dir_all(&functions)
                .await
                .with_context(|| format!("Failed to create {}", functions.display()))?;

            let executor = Arc::new(ProcessExecutor::new(
                functions.clone(),
                config.work_dir(&name),
                config.runtime.clone(),
            ));
            let store = Arc::new(DirFunctionStore::new(functions));

            let (net, rx) = hub.join(PeerId::new(name.as_str()));
            let worker = Arc::new(Worker::new(
                net,
                config.node.clone(),
                config.worker.clone(),
                executor,
                store,
                cancel.child_token(),
            )?);
            // Subscribed before the loop starts so early broadcasts reach it.
            for topic in config.node.subscriptions() {
                worker.core().messenger().subscribe(&topic).await?;
            }
            tasks.push((worker.id(), tokio::spawn(worker.clone().run(rx))));
            workers.push(worker);
        }

        hub.connect_all();
        tracing::info!(
            head = %head.id(),
            workers = workers.len(),
            "Local swarm started"
        );

        Ok(Self {
            hub,
            head,
            workers,
            tasks,
        })
    }

    /// Wait for every node loop to exit.
    pub async fn join(self) {
        for (peer, task) in self.tasks {
            match task.await {
                Ok(Ok(())) => tracing::debug!(peer = %peer, "Node stopped"),
                Ok(Err(e)) => tracing::error!(peer = %peer, error = %e, "Node stopped with error"),
                Err(e) => tracing::error!(peer = %peer, error = %e, "Node task panicked"),
            }
        }
    }
}
