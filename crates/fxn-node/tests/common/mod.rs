#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use fxn_network::{InboundReceiver, MemoryHub, Messenger};
use fxn_node::*;
use fxn_protocol::*;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub const FUNCTION_ID: &str = "bafy-hello";

/// Executor returning canned output.
pub struct MockExecutor {
    pub long_running: bool,
    jobs: Mutex<HashMap<String, ExecutionRequest>>,
    pub runs: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new(long_running: bool) -> Self {
        Self {
            long_running,
            jobs: Mutex::new(HashMap::new()),
            runs: Mutex::new(Vec::new()),
        }
    }
}

impl Executor for MockExecutor {
    fn execute_function<'a>(
        &'a self,
        request_id: &'a str,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<ExecutionResult, ExecutorError>> {
        Box::pin(async move {
            self.runs.lock().push(request_id.to_string());
            Ok(ExecutionResult {
                code: Code::Ok,
                request_id: request_id.to_string(),
                result: RuntimeOutput {
                    stdout: format!("{} ok", request.method),
                    ..Default::default()
                },
                usage: ResourceUsage {
                    wall_clock_time_ms: 12,
                    ..Default::default()
                },
                message: None,
            })
        })
    }

    fn supports_long_running_jobs(&self) -> bool {
        self.long_running
    }

    fn start<'a>(
        &'a self,
        request_id: &'a str,
        request: &'a ExecutionRequest,
    ) -> BoxFuture<'a, Result<(), ExecutorError>> {
        Box::pin(async move {
            self.jobs
                .lock()
                .insert(request_id.to_string(), request.clone());
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
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(JobState {
                stdout: format!("detached {} done", job.method),
                stderr: String::new(),
                exit_code: Some(0),
                usage: ResourceUsage::default(),
            })
        })
    }

    fn stop<'a>(&'a self, _request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>> {
        Box::pin(async { Err(ExecutorError::Unsupported("stop")) })
    }

    fn stats<'a>(&'a self, _request_id: &'a str) -> BoxFuture<'a, Result<JobState, ExecutorError>> {
        Box::pin(async { Err(ExecutorError::Unsupported("stats")) })
    }
}

/// Function store backed by a set of CIDs.
#[derive(Default)]
pub struct MemoryStore {
    installed: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn with(cids: &[&str]) -> Self {
        Self {
            installed: Mutex::new(cids.iter().map(|c| c.to_string()).collect()),
        }
    }

    fn artifact(cid: &str, manifest_url: &str) -> FunctionArtifact {
        FunctionArtifact {
            cid: cid.to_string(),
            manifest_url: manifest_url.to_string(),
            path: PathBuf::from("/functions").join(cid),
        }
    }
}

impl FunctionStore for MemoryStore {
    fn get<'a>(&'a self, cid: &'a str) -> BoxFuture<'a, Result<FunctionArtifact, StoreError>> {
        Box::pin(async move {
            if self.installed.lock().contains(cid) {
                Ok(Self::artifact(cid, ""))
            } else {
                Err(StoreError::NotFound(cid.to_string()))
            }
        })
    }

    fn install<'a>(
        &'a self,
        manifest_url: &'a str,
        cid: &'a str,
    ) -> BoxFuture<'a, Result<FunctionArtifact, StoreError>> {
        Box::pin(async move {
            if manifest_url.is_empty() {
                return Err(StoreError::UnsupportedUri(manifest_url.to_string()));
            }
            self.installed.lock().insert(cid.to_string());
            Ok(Self::artifact(cid, manifest_url))
        })
    }

    fn is_installed<'a>(&'a self, cid: &'a str) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move { Ok(self.installed.lock().contains(cid)) })
    }
}

pub fn head_config() -> HeadConfig {
    HeadConfig {
        roll_call_timeout_secs: 2,
        execution_timeout_secs: 5,
        cluster_formation_timeout_secs: 3,
        result_cache_size: 100,
    }
}

/// A head and its workers on one memory hub.
pub struct TestSwarm {
    pub hub: MemoryHub,
    pub cancel: CancellationToken,
    pub head: Arc<HeadNode>,
    pub workers: Vec<Arc<Worker>>,
    pub stores: Vec<Arc<MemoryStore>>,
}

impl TestSwarm {
    /// Start a head node without workers.
    pub fn head_only() -> Self {
        Self::head_with(NodeConfig::default())
    }

    pub fn head_with(node_cfg: NodeConfig) -> Self {
        let hub = MemoryHub::new();
        let cancel = CancellationToken::new();
        let (net, rx) = hub.join(PeerId::new("head"));
        let head = Arc::new(
            HeadNode::new(net, node_cfg, head_config(), cancel.child_token()).unwrap(),
        );
        tokio::spawn(head.clone().run(rx));
        Self {
            hub,
            cancel,
            head,
            workers: Vec::new(),
            stores: Vec::new(),
        }
    }

    /// Start a head and `count` workers, all connected.
    pub async fn start(count: usize, long_running: bool, installed: &[&str]) -> Self {
        let mut swarm = Self::head_only();
        for i in 0..count {
            swarm.add_worker(&format!("worker-{i}"), long_running, installed).await;
        }
        swarm.hub.connect_all();
        swarm
    }

    pub async fn add_worker(&mut self, name: &str, long_running: bool, installed: &[&str]) -> Arc<Worker> {
        let (net, rx) = self.hub.join(PeerId::new(name));
        let store = Arc::new(MemoryStore::with(installed));
        let worker = Arc::new(
            Worker::new(
                net,
                NodeConfig::default(),
                WorkerConfig::default(),
                Arc::new(MockExecutor::new(long_running)),
                store.clone(),
                self.cancel.child_token(),
            )
            .unwrap(),
        );
        // Subscribe before returning so broadcasts are not missed.
        worker
            .core()
            .messenger()
            .subscribe(DEFAULT_TOPIC)
            .await
            .unwrap();
        tokio::spawn(worker.clone().run(rx));
        self.workers.push(worker.clone());
        self.stores.push(store);
        worker
    }
}

impl Drop for TestSwarm {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Raw endpoint that answers roll calls the way a test wants.
pub struct Responder {
    pub peer: PeerId,
    pub messenger: Messenger,
}

#[derive(Clone)]
pub struct Reply {
    pub code: Code,
    pub function_id: Option<String>,
    pub delay: Duration,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            code: Code::Accepted,
            function_id: None,
            delay: Duration::ZERO,
        }
    }
}

pub async fn responder(hub: &MemoryHub, name: &str, reply: Reply) -> Responder {
    let peer = PeerId::new(name);
    let (net, rx) = hub.join(peer.clone());
    let messenger = Messenger::new(net);
    messenger.subscribe(DEFAULT_TOPIC).await.unwrap();
    tokio::spawn(answer_roll_calls(messenger.clone(), rx, reply));
    Responder { peer, messenger }
}

async fn answer_roll_calls(messenger: Messenger, mut rx: InboundReceiver, reply: Reply) {
    while let Some(msg) = rx.recv().await {
        if message_type(&msg.payload).ok() != Some(MessageType::RollCall) {
            continue;
        }
        let Ok(rc) = decode::<RollCall>(&msg.payload) else {
            continue;
        };
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        let res = RollCallResponse {
            request_id: rc.request_id,
            function_id: reply.function_id.clone().unwrap_or(rc.function_id),
            code: reply.code,
        };
        let _ = messenger.send(&rc.origin, &res).await;
    }
}

/// Let spawned tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
