mod common;

use std::time::Duration;

use common::*;
use fxn_node::*;
use fxn_protocol::*;
use tokio::time::Instant;

fn params(request_id: &str, node_count: NodeCount) -> RollCallParams {
    RollCallParams {
        node_count,
        ..RollCallParams::new(request_id, FUNCTION_ID)
    }
}

async fn responders(swarm: &TestSwarm, count: usize, reply: Reply) -> Vec<Responder> {
    let mut out = Vec::new();
    for i in 0..count {
        out.push(responder(&swarm.hub, &format!("peer-{i}"), reply.clone()).await);
    }
    swarm.hub.connect_all();
    out
}

#[tokio::test(start_paused = true)]
async fn test_returns_at_nth_qualifying_reply() {
    let swarm = TestSwarm::head_only();
    let _peers = responders(&swarm, 5, Reply::default()).await;

    let started = Instant::now();
    let peers = swarm
        .head
        .execute_roll_call(&params("req-n", NodeCount::Exactly(3)))
        .await
        .unwrap();

    assert_eq!(peers.len(), 3);
    assert!(started.elapsed() < swarm.head.config().roll_call_timeout());
    assert!(!swarm.head.roll_calls().exists("req-n"), "entry removed on return");
}

#[tokio::test(start_paused = true)]
async fn test_late_replies_are_ignored() {
    let swarm = TestSwarm::head_only();
    let _fast = responder(&swarm.hub, "fast", Reply::default()).await;
    let _slow = responder(
        &swarm.hub,
        "slow",
        Reply {
            delay: Duration::from_millis(500),
            ..Default::default()
        },
    )
    .await;
    swarm.hub.connect_all();

    let peers = swarm
        .head
        .execute_roll_call(&params("req-late", NodeCount::Exactly(1)))
        .await
        .unwrap();
    assert_eq!(peers, vec![PeerId::new("fast")]);

    // The slow reply lands after the roll call closed and is dropped.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(swarm.head.roll_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_any_count_collects_until_window_closes() {
    let swarm = TestSwarm::head_only();
    let _peers = responders(&swarm, 2, Reply::default()).await;

    let started = Instant::now();
    let peers = swarm
        .head
        .execute_roll_call(&params("req-any", NodeCount::Any))
        .await
        .unwrap();

    assert_eq!(peers.len(), 2);
    assert!(started.elapsed() >= swarm.head.config().roll_call_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_any_count_without_replies_times_out() {
    let swarm = TestSwarm::head_only();

    let err = swarm
        .head
        .execute_roll_call(&params("req-none", NodeCount::Any))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::RollCallTimeout(ref id) if id == "req-none"));
    assert_eq!(err.code(), Code::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_per_request_timeout_overrides_default() {
    let swarm = TestSwarm::head_only();

    let started = Instant::now();
    let mut p = params("req-short", NodeCount::Exactly(1));
    p.timeout = Some(Duration::from_millis(300));
    assert!(swarm.head.execute_roll_call(&p).await.is_err());
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < swarm.head.config().roll_call_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_function_never_counts() {
    let swarm = TestSwarm::head_only();
    let _peers = responders(
        &swarm,
        3,
        Reply {
            function_id: Some("bafy-other".into()),
            ..Default::default()
        },
    )
    .await;

    let err = swarm
        .head
        .execute_roll_call(&params("req-fn", NodeCount::Exactly(1)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_rejections_never_count() {
    let swarm = TestSwarm::head_only();
    let _peers = responders(
        &swarm,
        3,
        Reply {
            code: Code::NotFound,
            ..Default::default()
        },
    )
    .await;

    let err = swarm
        .head
        .execute_roll_call(&params("req-rej", NodeCount::Any))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_unconnected_peer_never_counts() {
    let swarm = TestSwarm::head_only();
    let connected = responder(&swarm.hub, "connected", Reply::default()).await;
    let _stranger = responder(&swarm.hub, "stranger", Reply::default()).await;
    swarm.hub.connect(&swarm.head.id(), &connected.peer);

    let err = swarm
        .head
        .execute_roll_call(&params("req-two", NodeCount::Exactly(2)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    let peers = swarm
        .head
        .execute_roll_call(&params("req-any", NodeCount::Any))
        .await
        .unwrap();
    assert_eq!(peers, vec![connected.peer.clone()]);
}

#[tokio::test(start_paused = true)]
async fn test_pbft_below_minimum_is_a_quorum_violation() {
    let swarm = TestSwarm::head_only();
    let _peers = responders(&swarm, 3, Reply::default()).await;

    let mut p = params("req-pbft", NodeCount::Exactly(3));
    p.consensus = ConsensusType::Pbft;
    let err = swarm.head.execute_roll_call(&p).await.unwrap_err();

    assert!(
        matches!(
            err,
            NodeError::InsufficientReplicas {
                consensus: ConsensusType::Pbft,
                have: 3,
                need: 4
            }
        ),
        "{err}"
    );
    assert!(!err.is_timeout());
    assert_eq!(err.code(), Code::NotAvailable);
}

#[tokio::test(start_paused = true)]
async fn test_pbft_with_enough_replicas() {
    let swarm = TestSwarm::head_only();
    let _peers = responders(&swarm, 4, Reply::default()).await;

    let mut p = params("req-pbft-ok", NodeCount::Any);
    p.consensus = ConsensusType::Pbft;
    let peers = swarm.head.execute_roll_call(&p).await.unwrap();
    assert_eq!(peers.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_request_id_is_rejected() {
    let swarm = TestSwarm::head_only();
    let head = swarm.head.clone();
    let first = tokio::spawn(async move {
        head.execute_roll_call(&params("req-dup", NodeCount::Exactly(1))).await
    });

    while !swarm.head.roll_calls().exists("req-dup") {
        tokio::task::yield_now().await;
    }
    let err = swarm
        .head
        .execute_roll_call(&params("req-dup", NodeCount::Exactly(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::RollCallExists(_)));

    assert!(first.await.unwrap().unwrap_err().is_timeout());
}

#[tokio::test(start_paused = true)]
async fn test_response_for_unknown_request_is_dropped() {
    let swarm = TestSwarm::head_only();
    let stray = responder(&swarm.hub, "stray", Reply::default()).await;
    swarm.hub.connect_all();

    let res = RollCallResponse {
        request_id: "never-asked".into(),
        function_id: FUNCTION_ID.into(),
        code: Code::Accepted,
    };
    stray.messenger.send(&swarm.head.id(), &res).await.unwrap();
    settle().await;

    assert!(swarm.head.roll_calls().is_empty());
    // The head keeps serving.
    let peers = swarm
        .head
        .execute_roll_call(&params("req-after", NodeCount::Exactly(1)))
        .await
        .unwrap();
    assert_eq!(peers, vec![stray.peer.clone()]);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_is_reported_distinctly() {
    let swarm = TestSwarm::head_only();
    let cancel = swarm.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
    });

    let err = swarm
        .head
        .execute_roll_call(&params("req-cancel", NodeCount::Exactly(1)))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(!swarm.head.roll_calls().exists("req-cancel"));
}

#[tokio::test(start_paused = true)]
async fn test_roll_call_uses_requested_topic() {
    let swarm = TestSwarm::head_only();
    let (net, mut rx) = swarm.hub.join(PeerId::new("gpu-peer"));
    fxn_network::Messenger::new(net).subscribe("gpu").await.unwrap();

    let mut p = params("req-topic", NodeCount::Exactly(1));
    p.topic = Some("gpu".into());
    p.timeout = Some(Duration::from_millis(100));
    let _ = swarm.head.execute_roll_call(&p).await;

    let got = rx.recv().await.unwrap();
    assert_eq!(got.pipeline.topic(), Some("gpu"));
    let rc: RollCall = decode(&got.payload).unwrap();
    assert_eq!(rc.request_id, "req-topic");
    assert_eq!(rc.origin, swarm.head.id());
}
