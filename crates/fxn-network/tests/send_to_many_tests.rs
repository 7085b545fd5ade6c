use fxn_network::*;
use fxn_protocol::*;

struct Swarm {
    hub: MemoryHub,
    sender: Messenger,
    peers: Vec<PeerId>,
    inboxes: Vec<InboundReceiver>,
}

fn swarm(size: usize) -> Swarm {
    let hub = MemoryHub::new();
    let (head, head_rx) = hub.join(PeerId::new("head"));
    let mut peers = Vec::new();
    let mut inboxes = vec![head_rx];
    for i in 0..size {
        let peer = PeerId::new(format!("worker-{i}"));
        let (_net, rx) = hub.join(peer.clone());
        peers.push(peer);
        inboxes.push(rx);
    }
    Swarm {
        hub,
        sender: Messenger::new(head),
        peers,
        inboxes: inboxes,
    }
}

fn msg() -> DisbandCluster {
    DisbandCluster {
        request_id: "req".into(),
    }
}

#[tokio::test]
async fn test_all_sends_succeed() {
    let s = swarm(5);
    s.sender.send_to_many(&s.peers, &msg(), true).await.unwrap();
}

#[tokio::test]
async fn test_partial_failure_tolerated_without_require_all() {
    let s = swarm(5);
    s.hub.set_unreachable(&s.peers[1], true);
    s.hub.set_unreachable(&s.peers[3], true);

    s.sender.send_to_many(&s.peers, &msg(), false).await.unwrap();
}

#[tokio::test]
async fn test_partial_failure_names_every_failed_peer_with_require_all() {
    let s = swarm(5);
    s.hub.set_unreachable(&s.peers[1], true);
    s.hub.set_unreachable(&s.peers[3], true);

    let err = s.sender.send_to_many(&s.peers, &msg(), true).await.unwrap_err();
    assert!(matches!(err, NetworkError::PartialSend(_)));

    let failed = err.failed_peers();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&s.peers[1]));
    assert!(failed.contains(&s.peers[3]));

    let text = err.to_string();
    assert!(text.contains("worker-1"), "{text}");
    assert!(text.contains("worker-3"), "{text}");
    assert!(text.contains("2 of 5"), "{text}");
}

#[tokio::test]
async fn test_total_failure_is_always_an_error() {
    let s = swarm(5);
    for peer in &s.peers {
        s.hub.set_unreachable(peer, true);
    }
    for require_all in [false, true] {
        let err = s
            .sender
            .send_to_many(&s.peers, &msg(), require_all)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::AllSendsFailed(_)));
        assert!(err.to_string().starts_with("all sends failed"));
        assert_eq!(err.failed_peers().len(), 5);
    }
}

#[tokio::test]
async fn test_every_peer_receives_the_same_message() {
    let mut s = swarm(3);
    s.sender.send_to_many(&s.peers, &msg(), true).await.unwrap();
    for inbox in s.inboxes.iter_mut().skip(1) {
        let got = inbox.recv().await.unwrap();
        let decoded: DisbandCluster = decode(&got.payload).unwrap();
        assert_eq!(decoded.request_id, "req");
    }
}

#[tokio::test]
async fn test_empty_peer_list_is_a_no_op() {
    let s = swarm(0);
    s.sender.send_to_many(&[], &msg(), true).await.unwrap();
}
