use fxn_network::*;
use fxn_protocol::*;

fn health() -> HealthCheck {
    HealthCheck { code: Code::Ok }
}

#[tokio::test]
async fn test_direct_send_arrives_tagged_direct() {
    let hub = MemoryHub::new();
    let (a, _a_rx) = hub.join(PeerId::new("a"));
    let (_b, mut b_rx) = hub.join(PeerId::new("b"));

    let messenger = Messenger::new(a);
    let msg = DisbandCluster {
        request_id: "req-1".into(),
    };
    messenger.send(&PeerId::new("b"), &msg).await.unwrap();

    let inbound = b_rx.recv().await.unwrap();
    assert_eq!(inbound.from, PeerId::new("a"));
    assert_eq!(inbound.pipeline, Pipeline::Direct);
    assert_eq!(message_type(&inbound.payload).unwrap(), MessageType::DisbandCluster);
}

#[tokio::test]
async fn test_send_to_unknown_peer_fails() {
    let hub = MemoryHub::new();
    let (a, _rx) = hub.join(PeerId::new("a"));
    let err = Messenger::new(a)
        .send(&PeerId::new("ghost"), &health())
        .await
        .unwrap_err();
    assert!(err.is_send_failure());
    assert_eq!(err.failed_peers(), vec![PeerId::new("ghost")]);
}

#[tokio::test]
async fn test_publish_reaches_subscribers_but_not_sender() {
    let hub = MemoryHub::new();
    let (head, mut head_rx) = hub.join(PeerId::new("head"));
    let (w1, mut w1_rx) = hub.join(PeerId::new("w1"));
    let (_w2, mut w2_rx) = hub.join(PeerId::new("w2"));

    let w1 = Messenger::new(w1);
    w1.subscribe(DEFAULT_TOPIC).await.unwrap();

    let head = Messenger::new(head);
    head.subscribe(DEFAULT_TOPIC).await.unwrap();
    head.publish(&health()).await.unwrap();

    let got = w1_rx.recv().await.unwrap();
    assert_eq!(got.pipeline, Pipeline::pubsub(DEFAULT_TOPIC));
    assert!(w2_rx.try_recv().is_err(), "w2 never subscribed");
    assert!(head_rx.try_recv().is_err(), "publisher does not hear itself");
}

#[tokio::test]
async fn test_publish_to_topic_joins_lazily() {
    let hub = MemoryHub::new();
    let (head, _head_rx) = hub.join(PeerId::new("head"));
    let (w1, mut w1_rx) = hub.join(PeerId::new("w1"));
    Messenger::new(w1).subscribe("gpu").await.unwrap();

    let rc = RollCall {
        origin: PeerId::new("head"),
        function_id: "fn".into(),
        request_id: "req".into(),
        consensus: ConsensusType::None,
        attributes: None,
    };
    Messenger::new(head).publish_to_topic("gpu", &rc).await.unwrap();

    let got = w1_rx.recv().await.unwrap();
    assert_eq!(got.pipeline.topic(), Some("gpu"));
    let decoded: RollCall = decode(&got.payload).unwrap();
    assert_eq!(decoded, rc);
}

#[tokio::test]
async fn test_connections_are_explicit_and_symmetric() {
    let hub = MemoryHub::new();
    let (a, _a_rx) = hub.join(PeerId::new("a"));
    let (b, _b_rx) = hub.join(PeerId::new("b"));
    let (_c, _c_rx) = hub.join(PeerId::new("c"));

    assert!(!a.connected(&PeerId::new("b")));
    hub.connect(&PeerId::new("a"), &PeerId::new("b"));
    assert!(a.connected(&PeerId::new("b")));
    assert!(b.connected(&PeerId::new("a")));
    assert!(!a.connected(&PeerId::new("c")));

    hub.connect_all();
    assert!(b.connected(&PeerId::new("c")));

    hub.disconnect(&PeerId::new("b"), &PeerId::new("a"));
    assert!(!a.connected(&PeerId::new("b")));

    hub.leave(&PeerId::new("c"));
    assert!(!a.connected(&PeerId::new("c")));
}
