//! Gateway shard and client integration tests
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use cord_gateway::protocol::api_query;
use cord_gateway::{Client, ClientConfig, SharedEventHandler, Shard, ShardState};
use integration_tests::{
    drive_for, drive_until, heartbeat_ack, hello, init_logging, invalid_session, op, ready, resumed,
    test_reactor, test_shard_config, GatewayAction, MockGateway, MockHttpServer, MockResponse,
    RecordingHandler, TEST_TOKEN,
};
use serde_json::json;

const IDENTIFY: u64 = 2;
const HEARTBEAT: u64 = 1;
const RESUME: u64 = 6;
const WAIT: Duration = Duration::from_secs(5);

fn start_shard(gateway: &MockGateway, recorder: &Rc<RefCell<RecordingHandler>>) -> Shard {
    let events: SharedEventHandler = recorder.clone();
    Shard::new(
        0,
        1,
        format!("{}{}", gateway.url(), api_query(6)),
        test_shard_config(),
        events,
    )
}

// ============================================================================
// Identify / Resume
// ============================================================================

#[test]
fn test_fresh_shard_identifies() {
    init_logging();
    let gateway = MockGateway::start(
        |_| vec![GatewayAction::Send(hello(45_000))],
        |_, frame| match op(frame) {
            Some(IDENTIFY) => vec![GatewayAction::Send(ready("session-a", 1))],
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let recorder = RecordingHandler::shared();
    let mut reactor = test_reactor();
    let shard = start_shard(&gateway, &recorder);
    shard.start(&mut reactor);

    assert!(drive_until(&mut reactor, WAIT, || shard.state() == ShardState::Ready));

    let frames = gateway.received_on(0);
    assert_eq!(op(&frames[0]), Some(IDENTIFY));
    let identify = &frames[0]["d"];
    assert_eq!(identify["token"], TEST_TOKEN);
    assert_eq!(identify["shard"], json!([0, 1]));
    assert_eq!(identify["compress"], false);
    assert_eq!(identify["large_threshold"], 250);

    assert_eq!(shard.session_id().as_deref(), Some("session-a"));
    assert_eq!(shard.seq(), Some(1));
    assert_eq!(recorder.borrow().saw("READY"), 1);
    assert!(recorder.borrow().saw_state(0, ShardState::AwaitingHello));
    assert!(recorder.borrow().saw_state(0, ShardState::Ready));
}

#[test]
fn test_dropped_connection_resumes() {
    init_logging();
    let gateway = MockGateway::start(
        |_| vec![GatewayAction::Send(hello(45_000))],
        |connection, frame| match (connection, op(frame)) {
            (0, Some(IDENTIFY)) => vec![
                GatewayAction::Send(ready("session-b", 1)),
                GatewayAction::Send(integration_tests::dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"}))),
                GatewayAction::Drop,
            ],
            (_, Some(RESUME)) => vec![GatewayAction::Send(resumed(3))],
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let recorder = RecordingHandler::shared();
    let mut reactor = test_reactor();
    let shard = start_shard(&gateway, &recorder);
    shard.start(&mut reactor);

    assert!(drive_until(&mut reactor, WAIT, || recorder.borrow().saw("RESUMED") == 1));

    assert_eq!(gateway.connections(), 2);
    let reconnect = gateway.received_on(1);
    assert_eq!(op(&reconnect[0]), Some(RESUME));
    assert_eq!(reconnect[0]["d"]["session_id"], "session-b");
    assert_eq!(reconnect[0]["d"]["seq"], 2);
    assert_eq!(reconnect[0]["d"]["token"], TEST_TOKEN);

    assert_eq!(recorder.borrow().saw("MESSAGE_CREATE"), 1);
    assert_eq!(shard.state(), ShardState::Ready);
    assert_eq!(shard.seq(), Some(3));
}

#[test]
fn test_missed_heartbeat_ack_reconnects_with_resume() {
    init_logging();
    let gateway = MockGateway::start(
        // 100ms interval on the first connection, long afterwards
        |connection| {
            let interval = if connection == 0 { 100 } else { 45_000 };
            vec![GatewayAction::Send(hello(interval))]
        },
        |_, frame| match op(frame) {
            Some(IDENTIFY) => vec![GatewayAction::Send(ready("session-c", 4))],
            Some(RESUME) => vec![GatewayAction::Send(resumed(5))],
            // never acknowledged
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let recorder = RecordingHandler::shared();
    let mut reactor = test_reactor();
    let shard = start_shard(&gateway, &recorder);
    shard.start(&mut reactor);

    assert!(drive_until(&mut reactor, WAIT, || recorder.borrow().saw("RESUMED") == 1));

    let first = gateway.received_on(0);
    let heartbeats: Vec<_> = first.iter().filter(|frame| op(frame) == Some(HEARTBEAT)).collect();
    assert_eq!(heartbeats.len(), 1);
    assert_eq!(heartbeats[0]["d"], 4);

    let second = gateway.received_on(1);
    assert_eq!(op(&second[0]), Some(RESUME));
    assert_eq!(second[0]["d"]["session_id"], "session-c");
}

#[test]
fn test_acknowledged_heartbeats_keep_connection() {
    init_logging();
    let gateway = MockGateway::start(
        |_| vec![GatewayAction::Send(hello(100))],
        |_, frame| match op(frame) {
            Some(IDENTIFY) => vec![GatewayAction::Send(ready("session-d", 1))],
            Some(HEARTBEAT) => vec![GatewayAction::Send(heartbeat_ack())],
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let recorder = RecordingHandler::shared();
    let mut reactor = test_reactor();
    let shard = start_shard(&gateway, &recorder);
    shard.start(&mut reactor);

    assert!(drive_until(&mut reactor, WAIT, || gateway.received_op(HEARTBEAT).len() >= 3));
    assert_eq!(gateway.connections(), 1);
    assert_eq!(shard.state(), ShardState::Ready);
}

#[test]
fn test_invalid_session_identifies_again() {
    init_logging();
    let gateway = MockGateway::start(
        |_| vec![GatewayAction::Send(hello(45_000))],
        |connection, frame| match (connection, op(frame)) {
            (0, Some(IDENTIFY)) => vec![GatewayAction::Send(invalid_session())],
            (_, Some(IDENTIFY)) => vec![GatewayAction::Send(ready("session-e", 1))],
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let recorder = RecordingHandler::shared();
    let mut reactor = test_reactor();
    let shard = start_shard(&gateway, &recorder);
    shard.start(&mut reactor);

    assert!(drive_until(&mut reactor, WAIT, || shard.state() == ShardState::Ready));

    assert_eq!(gateway.connections(), 2);
    assert_eq!(op(&gateway.received_on(1)[0]), Some(IDENTIFY));
    assert!(gateway.received_op(RESUME).is_empty());
}

#[test]
fn test_fatal_close_stops_shard() {
    init_logging();
    let gateway = MockGateway::start(
        |_| vec![GatewayAction::Send(hello(45_000))],
        |_, frame| match op(frame) {
            Some(IDENTIFY) => vec![GatewayAction::Close(4004)],
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let recorder = RecordingHandler::shared();
    let mut reactor = test_reactor();
    let shard = start_shard(&gateway, &recorder);
    shard.start(&mut reactor);

    assert!(drive_until(&mut reactor, WAIT, || shard.state() == ShardState::Stopped));
    drive_for(&mut reactor, Duration::from_millis(300));
    assert_eq!(gateway.connections(), 1);
}

#[test]
fn test_unreachable_gateway_keeps_retrying() {
    init_logging();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let recorder = RecordingHandler::shared();
    let events: SharedEventHandler = recorder.clone();
    let mut reactor = test_reactor();
    let shard = Shard::new(0, 1, format!("ws://127.0.0.1:{port}"), test_shard_config(), events);
    shard.start(&mut reactor);

    // connect_retry is 100ms in the test config
    drive_for(&mut reactor, Duration::from_millis(450));
    let attempts = recorder
        .borrow()
        .states
        .iter()
        .filter(|(_, state)| *state == ShardState::Connecting)
        .count();
    assert!(attempts >= 2, "only {attempts} attempts");
    assert_ne!(shard.state(), ShardState::Stopped);
}

// ============================================================================
// Client
// ============================================================================

#[test]
fn test_client_login_starts_recommended_shards() {
    init_logging();
    let gateway = MockGateway::start(
        |_| vec![GatewayAction::Send(hello(45_000))],
        |connection, frame| match op(frame) {
            Some(IDENTIFY) => vec![GatewayAction::Send(ready(&format!("session-{connection}"), 1))],
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let gateway_url = gateway.url();
    let api = MockHttpServer::start(move |request, _| {
        if request.target.starts_with("/api/gateway/bot") {
            MockResponse::json(200, &json!({"url": gateway_url, "shards": 2}))
        } else {
            MockResponse::new(404, "")
        }
    })
    .expect("api");

    let mut config = ClientConfig::new(TEST_TOKEN, api.url("/api"));
    config.shard = test_shard_config();
    let recorder = RecordingHandler::shared();
    let events: SharedEventHandler = recorder.clone();
    let client = Client::new(config, events);
    let mut reactor = test_reactor();

    client.login(&mut reactor).expect("login request");
    assert!(drive_until(&mut reactor, WAIT, || {
        let shards = client.shards();
        shards.len() == 2 && shards.iter().all(|shard| shard.state() == ShardState::Ready)
    }));

    let request = &api.requests()[0];
    assert_eq!(request.method, "GET");
    assert_eq!(request.target, "/api/gateway/bot?v=6&encoding=json");
    assert_eq!(request.header("Authorization"), Some("Bot test-token"));
    assert!(request.header("User-Agent").unwrap().starts_with("DiscordBot ("));

    let mut shard_ids: Vec<_> = gateway
        .received_op(IDENTIFY)
        .into_iter()
        .map(|(_, frame)| frame["d"]["shard"].clone())
        .collect();
    shard_ids.sort_by_key(|shard| shard[0].as_u64());
    assert_eq!(shard_ids, vec![json!([0, 2]), json!([1, 2])]);

    client.shutdown(&mut reactor);
    drive_for(&mut reactor, Duration::from_millis(50));
    assert!(client.shards().iter().all(|shard| shard.state() == ShardState::Stopped));
}

#[test]
fn test_client_configured_shard_count_wins() {
    init_logging();
    let gateway = MockGateway::start(
        |_| vec![GatewayAction::Send(hello(45_000))],
        |_, frame| match op(frame) {
            Some(IDENTIFY) => vec![GatewayAction::Send(ready("session", 1))],
            _ => Vec::new(),
        },
    )
    .expect("gateway");
    let gateway_url = gateway.url();
    let api = MockHttpServer::start(move |_, _| {
        MockResponse::json(200, &json!({"url": gateway_url, "shards": 5}))
    })
    .expect("api");

    let mut config = ClientConfig::new(TEST_TOKEN, api.url("/api"));
    config.shards = Some(1);
    config.shard = test_shard_config();
    let client = Client::new(config, RecordingHandler::shared());
    let mut reactor = test_reactor();

    client.login(&mut reactor).expect("login request");
    assert!(drive_until(&mut reactor, WAIT, || {
        client.shards().first().is_some_and(|shard| shard.state() == ShardState::Ready)
    }));
    assert_eq!(client.shards().len(), 1);
    assert_eq!(gateway.connections(), 1);
}

#[test]
fn test_client_run_fails_on_rejected_token() {
    init_logging();
    let api = MockHttpServer::start(|_, _| {
        MockResponse::json(401, &json!({"message": "401: Unauthorized", "code": 0}))
    })
    .expect("api");

    let client = Client::new(ClientConfig::new("bad-token", api.url("/api")), RecordingHandler::shared());
    let mut reactor = test_reactor();

    let result = client.run(&mut reactor);
    assert!(matches!(result, Err(cord_gateway::GatewayError::Unauthorized(_))));
    assert!(client.shards().is_empty());
}
