//! End-to-end runtime behavior against a scripted in-memory node.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time;

use chainpipe_core::frame::{op, push, SUBCODE_RESULT};
use chainpipe_core::{
    capability, ClientError, CorrelationId, Frame, FrameTransport, Lookup, RuntimeConfig,
    StatusCode,
};
use chainpipe_runtime::{ConnectOptions, NodeClient};

// --- mock plumbing -------------------------------------------------------

struct MockTransport {
    inbound: mpsc::Receiver<Frame>,
    outbound: mpsc::Sender<Frame>,
}

#[async_trait]
impl FrameTransport for MockTransport {
    async fn send(&mut self, frame: Frame) -> Result<(), ClientError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClientError::Transport("peer gone".into()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, ClientError>> {
        self.inbound.recv().await.map(Ok)
    }
}

/// Returns (client transport, node's inbox, node's outbox-to-client).
fn mock_pair() -> (MockTransport, mpsc::Receiver<Frame>, mpsc::Sender<Frame>) {
    let (to_client_tx, to_client_rx) = mpsc::channel(64);
    let (from_client_tx, from_client_rx) = mpsc::channel(64);
    let transport = MockTransport {
        inbound: to_client_rx,
        outbound: from_client_tx,
    };
    (transport, from_client_rx, to_client_tx)
}

fn spawn_node<F>(mut inbox: mpsc::Receiver<Frame>, outbox: mpsc::Sender<Frame>, mut on_frame: F)
where
    F: FnMut(Frame) -> Vec<Frame> + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            for reply in on_frame(frame) {
                if outbox.send(reply).await.is_err() {
                    return;
                }
            }
        }
    });
}

fn grant(names: &[&str]) -> Frame {
    Frame::new(
        push::CAPABILITY_GRANT,
        0,
        serde_json::to_vec(names).unwrap(),
    )
}

fn heartbeat_reply() -> Frame {
    Frame::new(push::HEARTBEAT_REPLY, 0, Vec::new())
}

fn status(id: CorrelationId, status: StatusCode) -> Frame {
    Frame::tagged(status.wire_code(), 0, id, Vec::new())
}

fn status_with_result(id: CorrelationId, status: StatusCode, result: &[u8]) -> Frame {
    let mut payload = vec![0xEE; 32];
    payload.extend_from_slice(result);
    Frame::tagged(status.wire_code(), SUBCODE_RESULT, id, payload)
}

fn event_callback(topic: &str, block_number: u64) -> Frame {
    let events = serde_json::json!([{
        "topic": topic,
        "block_hash": format!("0x{block_number:064x}"),
        "block_number": block_number,
        "log_index": 0,
        "tx_hash": "0xfeed",
        "tx_index": 0,
        "payload": [],
        "removed": false,
    }]);
    Frame::new(push::EVENT_CALLBACK, 0, serde_json::to_vec(&events).unwrap())
}

const ALL_CAPS: [&str; 3] = [
    capability::TX_SUBMIT,
    capability::STATE_QUERY,
    capability::EVENTS_SUBSCRIBE,
];

/// Handshake + heartbeat handling shared by most scripted nodes.
fn ambient(frame: &Frame, caps: &'static [&'static str]) -> Option<Vec<Frame>> {
    match frame.code {
        op::HELLO => Some(vec![grant(caps)]),
        op::HEARTBEAT_PROBE => Some(vec![heartbeat_reply()]),
        _ => None,
    }
}

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        max_pending: 64,
        table_capacity: 256,
        table_max_age: Duration::from_secs(60),
        heartbeat_interval: Duration::from_millis(40),
        heartbeat_tolerance: 3,
        heartbeat_reply_timeout: Duration::from_millis(30),
        receive_timeout: Duration::from_millis(300),
        worker_ceiling: 8,
        settle_delay: Duration::from_millis(10),
        poll_fallback: Duration::from_millis(10),
    }
}

async fn connected<F>(config: RuntimeConfig, on_frame: F) -> (NodeClient, mpsc::Sender<Frame>)
where
    F: FnMut(Frame) -> Vec<Frame> + Send + 'static,
{
    let (transport, inbox, outbox) = mock_pair();
    spawn_node(inbox, outbox.clone(), on_frame);
    let client = NodeClient::new(config);
    client
        .connect(transport, ConnectOptions::new("mock://node"))
        .await
        .expect("connect");
    (client, outbox)
}

// --- tests ---------------------------------------------------------------

#[tokio::test]
async fn connect_handshake_then_destroy() {
    let (client, _node) = connected(fast_config(), |frame| {
        ambient(&frame, &ALL_CAPS).unwrap_or_default()
    })
    .await;

    assert!(client.is_connected());
    let caps = client.capabilities();
    assert!(caps.is_granted(capability::TX_SUBMIT));
    assert!(caps.is_granted(capability::STATE_QUERY));
    assert!(!caps.is_granted(capability::ADMIN_CONTROL));

    let state = client.state();
    assert!(state.connected);
    assert_eq!(state.in_flight, 0);
    assert_eq!(state.capabilities.len(), 3);

    client.destroy().await.expect("destroy");
    assert!(!client.is_connected());
    assert!(!client.state().connected);
    assert!(matches!(
        client.destroy().await,
        Err(ClientError::NotConnected)
    ));
}

#[tokio::test]
async fn connect_rejects_empty_url() {
    let (transport, _inbox, _outbox) = mock_pair();
    let client = NodeClient::new(fast_config());
    let result = client
        .connect(transport, ConnectOptions::new("  "))
        .await;
    assert!(matches!(result, Err(ClientError::EmptyUrl)));
}

#[tokio::test]
async fn handshake_timeout_fails_connect() {
    // Node answers heartbeats but never grants anything.
    let (transport, inbox, outbox) = mock_pair();
    spawn_node(inbox, outbox, |frame| match frame.code {
        op::HEARTBEAT_PROBE => vec![heartbeat_reply()],
        _ => vec![],
    });
    let client = NodeClient::new(fast_config());
    let mut opts = ConnectOptions::new("mock://node");
    opts.timeout = Duration::from_millis(100);
    let result = client.connect(transport, opts).await;
    assert!(matches!(result, Err(ClientError::Timeout { .. })));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn send_blocking_reaches_terminal_with_result() {
    let (client, _node) = connected(fast_config(), |frame| {
        if let Some(replies) = ambient(&frame, &ALL_CAPS) {
            return replies;
        }
        match frame.code {
            op::REQUEST => {
                let id = frame.correlation_id.unwrap();
                vec![
                    status(id, StatusCode::Received),
                    status_with_result(id, StatusCode::Included, b"receipt"),
                ]
            }
            _ => vec![],
        }
    })
    .await;

    let id = CorrelationId::generate();
    let record = client
        .send_blocking(id, b"tx-bytes".to_vec(), Duration::from_secs(2))
        .await
        .expect("terminal record");

    assert_eq!(record.status, StatusCode::Included);
    assert_eq!(record.result_payload.as_deref(), Some(b"receipt".as_slice()));
    assert!(record.result_id.is_some());
    assert_eq!(client.in_flight(), 0, "gate released on terminal");

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn monotonic_status_ignores_stale_update() {
    // The node confirms inclusion and then emits a stale `Received`.
    let (client, _node) = connected(fast_config(), |frame| {
        if let Some(replies) = ambient(&frame, &ALL_CAPS) {
            return replies;
        }
        match frame.code {
            op::REQUEST => {
                let id = frame.correlation_id.unwrap();
                vec![status(id, StatusCode::Included), status(id, StatusCode::Received)]
            }
            _ => vec![],
        }
    })
    .await;

    let id = CorrelationId::generate();
    let record = client
        .send_blocking(id, vec![1], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(record.status, StatusCode::Included);

    // Give the stale update time to land, then confirm no regression.
    time::sleep(Duration::from_millis(100)).await;
    match client.get_status(id) {
        Lookup::Found(rec) => assert_eq!(rec.status, StatusCode::Included),
        Lookup::Unknown => panic!("record must still be tracked"),
    }

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn late_payload_attaches_without_status_change() {
    let (client, node) = connected(fast_config(), |frame| {
        if let Some(replies) = ambient(&frame, &ALL_CAPS) {
            return replies;
        }
        match frame.code {
            op::REQUEST => vec![status(frame.correlation_id.unwrap(), StatusCode::Included)],
            _ => vec![],
        }
    })
    .await;

    let id = CorrelationId::generate();
    let record = client
        .send_blocking(id, vec![2], Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(record.status, StatusCode::Included);
    assert!(record.result_payload.is_none());

    // Terminal-shaped update arrives after the fact.
    node.send(status_with_result(id, StatusCode::Included, b"late-receipt"))
        .await
        .unwrap();

    let deadline = time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Lookup::Found(rec) = client.get_status(id) {
            if rec.result_payload.is_some() {
                assert_eq!(rec.status, StatusCode::Included);
                assert_eq!(rec.result_payload.as_deref(), Some(b"late-receipt".as_slice()));
                break;
            }
        }
        assert!(time::Instant::now() < deadline, "late payload never attached");
        time::sleep(Duration::from_millis(10)).await;
    }

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn capacity_error_is_synchronous() {
    let mut config = fast_config();
    config.max_pending = 2;
    // Never answer requests, so nothing reaches terminal.
    let (client, _node) = connected(config, |frame| {
        ambient(&frame, &ALL_CAPS).unwrap_or_default()
    })
    .await;

    let _a = client.send_async(CorrelationId::generate(), vec![1]).unwrap();
    let _b = client.send_async(CorrelationId::generate(), vec![2]).unwrap();
    let third = client.send_async(CorrelationId::generate(), vec![3]);
    assert!(matches!(third, Err(ClientError::Capacity { limit: 2 })));

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn aged_out_live_requests_release_capacity() {
    // Node acknowledges nothing, so no terminal update ever releases the
    // in-flight slots; age eviction must give them back instead.
    let mut config = fast_config();
    config.max_pending = 2;
    config.table_max_age = Duration::from_millis(100);
    let (client, _node) = connected(config, |frame| {
        ambient(&frame, &ALL_CAPS).unwrap_or_default()
    })
    .await;

    let a = CorrelationId::generate();
    let _fut_a = client.send_async(a, vec![1]).unwrap();
    let _fut_b = client.send_async(CorrelationId::generate(), vec![2]).unwrap();
    assert!(matches!(
        client.send_async(CorrelationId::generate(), vec![3]),
        Err(ClientError::Capacity { .. })
    ));

    time::sleep(Duration::from_millis(150)).await;
    // The lookup purges the aged records, freeing their slots.
    assert!(matches!(client.get_status(a), Lookup::Unknown));
    assert_eq!(client.in_flight(), 0);
    client
        .send_async(CorrelationId::generate(), vec![4])
        .expect("evicted live requests must release capacity");

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn timeout_leaves_request_live_and_eviction_reads_unknown() {
    let mut config = fast_config();
    config.table_max_age = Duration::from_millis(150);
    let (client, node) = connected(config, |frame| {
        ambient(&frame, &ALL_CAPS).unwrap_or_default()
    })
    .await;

    let id = CorrelationId::generate();
    let result = client
        .send_blocking(id, vec![7], Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(ClientError::Timeout { .. })));

    // The caller-side timeout did not cancel anything: the record is still
    // tracked and a late status still lands.
    assert!(matches!(client.get_status(id), Lookup::Found(_)));
    node.send(status(id, StatusCode::Included)).await.unwrap();
    let deadline = time::Instant::now() + Duration::from_secs(1);
    loop {
        if let Lookup::Found(rec) = client.get_status(id) {
            if rec.status == StatusCode::Included {
                break;
            }
        }
        assert!(time::Instant::now() < deadline);
        time::sleep(Duration::from_millis(10)).await;
    }

    // Past max age the id is evicted: Unknown, distinct from a fresh record.
    time::sleep(Duration::from_millis(200)).await;
    assert!(matches!(client.get_status(id), Lookup::Unknown));

    let fresh = CorrelationId::generate();
    let _ = client
        .send_blocking(fresh, vec![8], Duration::from_millis(30))
        .await;
    match client.get_status(fresh) {
        Lookup::Found(rec) => assert_eq!(rec.status, StatusCode::Initiated),
        Lookup::Unknown => panic!("fresh record must read as Initiated, not Unknown"),
    }

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn completion_order_is_not_fifo() {
    // First request only gets an ack; once the second arrives, the node
    // completes second-then-first.
    let mut first_seen: Option<CorrelationId> = None;
    let (client, _node) = connected(fast_config(), move |frame| {
        if let Some(replies) = ambient(&frame, &ALL_CAPS) {
            return replies;
        }
        match frame.code {
            op::REQUEST => {
                let id = frame.correlation_id.unwrap();
                match first_seen {
                    None => {
                        first_seen = Some(id);
                        vec![status(id, StatusCode::Received)]
                    }
                    Some(first) => vec![
                        status(id, StatusCode::Included),
                        status(first, StatusCode::Included),
                    ],
                }
            }
            _ => vec![],
        }
    })
    .await;

    let a = CorrelationId::generate();
    let b = CorrelationId::generate();
    let fut_a = client.send_async(a, vec![0xA]).unwrap();
    let fut_b = client.send_async(b, vec![0xB]).unwrap();

    let rec_b = time::timeout(Duration::from_secs(3), fut_b)
        .await
        .expect("B within deadline")
        .expect("B terminal");
    let rec_a = time::timeout(Duration::from_secs(3), fut_a)
        .await
        .expect("A within deadline")
        .expect("A terminal");
    assert!(rec_a.is_terminal() && rec_b.is_terminal());

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn heartbeat_exhaustion_tears_down_and_resolves_futures() {
    // Grants, but never answers probes or requests.
    let (transport, inbox, outbox) = mock_pair();
    spawn_node(inbox, outbox, |frame| match frame.code {
        op::HELLO => vec![grant(&ALL_CAPS)],
        _ => vec![],
    });
    let client = NodeClient::new(fast_config());
    client
        .connect(transport, ConnectOptions::new("mock://node"))
        .await
        .unwrap();

    let fut = client.send_async(CorrelationId::generate(), vec![9]).unwrap();

    // tolerance 3 at 40ms interval + 30ms reply timeout: well under 2s.
    let result = time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("future must resolve after teardown");
    match result {
        Err(e) => assert!(e.is_fatal(), "expected a transport-class error, got {e}"),
        Ok(rec) => panic!("request must not complete, got {:?}", rec.status),
    }
    assert!(!client.is_connected());

    // Dependent operations now report transport errors instead of hanging.
    let blocked = client
        .send_blocking(CorrelationId::generate(), vec![1], Duration::from_millis(50))
        .await;
    assert!(matches!(blocked, Err(ClientError::Transport(_))));
}

#[tokio::test]
async fn event_delivery_and_drain_semantics() {
    let (client, node) = connected(fast_config(), |frame| {
        ambient(&frame, &ALL_CAPS).unwrap_or_default()
    })
    .await;

    client.subscribe("Transfer").unwrap();
    node.send(event_callback("Transfer", 1)).await.unwrap();
    node.send(event_callback("Transfer", 2)).await.unwrap();
    // No subscriber for this topic: dropped silently.
    node.send(event_callback("Approval", 3)).await.unwrap();

    let deadline = time::Instant::now() + Duration::from_secs(2);
    let drained = loop {
        let drained = client.drain(&["Transfer"]);
        if drained.len() == 2 {
            break drained;
        }
        assert!(drained.is_empty(), "partial drains must still be in order");
        assert!(time::Instant::now() < deadline, "events never arrived");
        time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(drained[0].block_number, 1);
    assert_eq!(drained[1].block_number, 2);

    assert!(client.drain(&["Transfer"]).is_empty());
    assert!(client.drain(&["Unsubscribed"]).is_empty());
    assert!(client.drain(&["Approval"]).is_empty());

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn out_of_band_frames_reach_the_same_processing_path() {
    let (client, _node) = connected(fast_config(), |frame| {
        ambient(&frame, &ALL_CAPS).unwrap_or_default()
    })
    .await;

    client.subscribe("Transfer").unwrap();
    client
        .push_out_of_band(event_callback("Transfer", 42))
        .unwrap();

    let deadline = time::Instant::now() + Duration::from_secs(2);
    loop {
        let drained = client.drain(&["Transfer"]);
        if !drained.is_empty() {
            assert_eq!(drained[0].block_number, 42);
            break;
        }
        assert!(time::Instant::now() < deadline);
        time::sleep(Duration::from_millis(10)).await;
    }

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn ungranted_capability_fails_before_transport() {
    // Only queries are granted.
    let (client, _node) = connected(fast_config(), |frame| match frame.code {
        op::HELLO => vec![grant(&[capability::STATE_QUERY])],
        op::HEARTBEAT_PROBE => vec![heartbeat_reply()],
        op::QUERY => {
            let mut reversed = frame.payload.clone();
            reversed.reverse();
            vec![Frame::new(push::QUERY_REPLY, 0, reversed)]
        }
        _ => vec![],
    })
    .await;

    let submit = client
        .send_blocking(CorrelationId::generate(), vec![1], Duration::from_secs(1))
        .await;
    assert!(matches!(submit, Err(ClientError::Privilege { .. })));
    assert_eq!(client.in_flight(), 0, "rejected submit must not hold a slot");

    assert!(matches!(
        client.subscribe("Transfer"),
        Err(ClientError::Privilege { .. })
    ));

    let reply = client.send_non_blocking(vec![1, 2, 3]).await.unwrap();
    assert_eq!(reply, vec![3, 2, 1]);

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn reconnect_replaces_connection() {
    let (client, _node) = connected(fast_config(), |frame| {
        ambient(&frame, &ALL_CAPS).unwrap_or_default()
    })
    .await;

    // A second connect without the reconnect flag is refused.
    let (transport, _inbox, _outbox) = mock_pair();
    let result = client
        .connect(transport, ConnectOptions::new("mock://other"))
        .await;
    assert!(matches!(result, Err(ClientError::AlreadyConnected)));
    assert!(client.is_connected());

    // With the flag, the old runtime is destroyed and replaced.
    let (transport, inbox, outbox) = mock_pair();
    spawn_node(inbox, outbox, |frame| match frame.code {
        op::HELLO => vec![grant(&[capability::TX_SUBMIT])],
        op::HEARTBEAT_PROBE => vec![heartbeat_reply()],
        _ => vec![],
    });
    let mut opts = ConnectOptions::new("mock://other");
    opts.reconnect = true;
    client.connect(transport, opts).await.expect("reconnect");

    // The capability set belongs to the new handshake.
    let caps = client.capabilities();
    assert!(caps.is_granted(capability::TX_SUBMIT));
    assert!(!caps.is_granted(capability::STATE_QUERY));

    client.destroy().await.unwrap();
}

#[tokio::test]
async fn operations_require_a_connection() {
    let client = NodeClient::new(fast_config());
    assert!(matches!(
        client.send_non_blocking(vec![]).await,
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.send_async(CorrelationId::generate(), vec![]),
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(client.get_status(CorrelationId::generate()), Lookup::Unknown));
    assert!(client.drain(&["Transfer"]).is_empty());
}
