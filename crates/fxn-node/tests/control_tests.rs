mod common;

use std::time::Duration;

use common::*;
use fxn_node::*;
use fxn_protocol::*;

fn detached_request(node_count: i32) -> ExecutionRequest {
    let mut req = ExecutionRequest::new(FUNCTION_ID, "serve.wasm");
    req.config.node_count = node_count;
    req.config.detached = true;
    req
}

#[tokio::test(start_paused = true)]
async fn test_wait_without_tracked_peers_sends_nothing() {
    let swarm = TestSwarm::head_only();
    let (_net, mut observer) = swarm.hub.join(PeerId::new("observer"));
    swarm.hub.connect_all();

    let err = swarm
        .head
        .execution_control("req-unknown", ExecAction::Wait)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::NoKnownPeers(ref id) if id == "req-unknown"));
    assert_eq!(err.code(), Code::NotFound);
    assert_eq!(
        err.to_string(),
        "no known peers for detached execution (request: req-unknown)"
    );

    settle().await;
    assert!(observer.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_empty_peer_list_counts_as_unknown() {
    let swarm = TestSwarm::head_only();
    swarm.head.track_detached("req-empty", Vec::new());

    let err = swarm
        .head
        .execution_wait("req-empty", None)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::NoKnownPeers(_)));
}

#[tokio::test(start_paused = true)]
async fn test_stat_and_kill_are_unsupported() {
    let swarm = TestSwarm::start(1, true, &[FUNCTION_ID]).await;
    swarm
        .head
        .track_detached("req-1", vec![swarm.workers[0].id()]);

    for action in [ExecAction::Stat, ExecAction::Kill] {
        let err = swarm
            .head
            .execution_control("req-1", action)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::UnsupportedAction(a) if a == action));
        assert_eq!(err.code(), Code::Unsupported);
        assert_eq!(err.to_string(), format!("unsupported action: {action}"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_detached_execution_then_wait() {
    let swarm = TestSwarm::start(2, true, &[FUNCTION_ID]).await;

    let outcome = swarm
        .head
        .execute_function(detached_request(2), None)
        .await
        .unwrap();
    assert_eq!(outcome.code, Code::Accepted);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.values().all(|r| r.code == Code::Accepted));

    let results = swarm
        .head
        .execution_wait(&outcome.request_id, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    for worker in &swarm.workers {
        let result = &results[&worker.id()];
        assert_eq!(result.code, Code::Ok);
        assert_eq!(result.result.stdout, "detached serve.wasm done");
        assert_eq!(result.result.exit_code, 0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_detached_on_short_lived_executor() {
    let swarm = TestSwarm::start(1, false, &[FUNCTION_ID]).await;

    let outcome = swarm
        .head
        .execute_function(detached_request(1), None)
        .await
        .unwrap();

    let result = &outcome.results[&swarm.workers[0].id()];
    assert_eq!(result.code, Code::Unsupported);
    assert_eq!(
        result.message.as_deref(),
        Some("executor doesn't support long running jobs")
    );
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_unknown_job_reports_peer_error() {
    let swarm = TestSwarm::start(1, true, &[FUNCTION_ID]).await;
    let worker = swarm.workers[0].id();
    swarm.head.track_detached("req-lost", vec![worker.clone()]);

    let results = swarm
        .head
        .execution_wait("req-lost", Some(Duration::from_secs(2)))
        .await
        .unwrap();

    let result = &results[&worker];
    assert_eq!(result.code, Code::Error);
    assert!(result.message.as_deref().unwrap().contains("req-lost"));
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_when_peer_is_gone() {
    let swarm = TestSwarm::start(1, true, &[FUNCTION_ID]).await;
    let worker = swarm.workers[0].id();
    swarm.head.track_detached("req-gone", vec![worker.clone()]);
    swarm.hub.leave(&worker);

    let err = swarm
        .head
        .execution_wait("req-gone", Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    // The single send fails outright.
    assert!(matches!(err, NodeError::Network(_)), "{err}");
}

#[tokio::test(start_paused = true)]
async fn test_repeated_wait_returns_finished_results() {
    let swarm = TestSwarm::start(1, true, &[FUNCTION_ID]).await;
    let worker = swarm.workers[0].id();

    let outcome = swarm
        .head
        .execute_function(detached_request(1), None)
        .await
        .unwrap();
    assert!(swarm.head.detached().contains(&outcome.request_id));

    let first = swarm
        .head
        .execution_wait(&outcome.request_id, None)
        .await
        .unwrap();
    assert_eq!(first[&worker].code, Code::Ok);
    assert!(swarm.head.detached().is_empty());

    // The worker no longer knows the job; asking again would fail.
    let second = swarm
        .head
        .execution_wait(&outcome.request_id, None)
        .await
        .unwrap();
    assert_eq!(second, first);

    let peers = swarm
        .head
        .execution_control(&outcome.request_id, ExecAction::Wait)
        .await
        .unwrap();
    assert_eq!(peers, vec![worker]);
}

#[tokio::test(start_paused = true)]
async fn test_wait_after_control_relay_is_not_sent_twice() {
    let swarm = TestSwarm::start(1, true, &[FUNCTION_ID]).await;
    let worker = swarm.workers[0].id();

    let outcome = swarm
        .head
        .execute_function(detached_request(1), None)
        .await
        .unwrap();

    // Job still running when the wait is relayed the first time.
    swarm
        .head
        .execution_control(&outcome.request_id, ExecAction::Wait)
        .await
        .unwrap();
    let results = swarm
        .head
        .execution_wait(&outcome.request_id, None)
        .await
        .unwrap();

    let result = &results[&worker];
    assert_eq!(result.code, Code::Ok, "{:?}", result.message);
    assert_eq!(result.result.stdout, "detached serve.wasm done");
}

#[tokio::test(start_paused = true)]
async fn test_late_failure_keeps_earlier_result() {
    let swarm = TestSwarm::head_only();
    let peer = PeerId::new("runner");
    let (net, mut inbound) = swarm.hub.join(peer.clone());
    let runner = fxn_network::Messenger::new(net);
    swarm.hub.connect_all();
    swarm.head.track_detached("req-r", vec![peer.clone()]);

    let done = ExecutionResult {
        code: Code::Ok,
        request_id: "req-r".into(),
        result: RuntimeOutput {
            stdout: "finished".into(),
            ..Default::default()
        },
        usage: ResourceUsage::default(),
        message: None,
    };
    let mut results = ResultMap::new();
    results.insert(peer.clone(), done);
    let ok = ExecControlResponse {
        request_id: "req-r".into(),
        from: peer.clone(),
        action: ExecAction::Wait,
        results,
        message: None,
    };
    let failed = ExecControlResponse {
        results: ResultMap::new(),
        message: Some("unknown job: req-r".into()),
        ..ok.clone()
    };
    runner.send(&swarm.head.id(), &ok).await.unwrap();
    runner.send(&swarm.head.id(), &failed).await.unwrap();
    settle().await;

    let results = swarm
        .head
        .execution_wait("req-r", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(results[&peer].code, Code::Ok);
    assert_eq!(results[&peer].result.stdout, "finished");

    // Already answered, so no wait went out.
    settle().await;
    assert!(inbound.try_recv().is_err());
}
