//! WebSocket client integration tests
//!
//! Run with: cargo test -p integration-tests --test ws_tests

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use cord_io::ws::{Message, WebSocket, WsHandler};
use cord_io::Reactor;
use integration_tests::{drive_until, init_logging, test_reactor, GatewayAction, MockGateway};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct Seen {
    opened: bool,
    texts: Vec<String>,
    closed: Option<(u16, String)>,
}

struct Recorder(Rc<RefCell<Seen>>);

impl WsHandler for Recorder {
    fn on_open(&mut self, _reactor: &mut Reactor, _ws: &WebSocket) {
        self.0.borrow_mut().opened = true;
    }

    fn on_message(&mut self, _reactor: &mut Reactor, _ws: &WebSocket, message: Message) {
        if let Some(text) = message.as_text() {
            self.0.borrow_mut().texts.push(text.to_string());
        }
    }

    fn on_close(&mut self, _reactor: &mut Reactor, status: u16, reason: &str) {
        self.0.borrow_mut().closed = Some((status, reason.to_string()));
    }
}

fn connect(reactor: &mut Reactor, gateway: &MockGateway) -> (WebSocket, Rc<RefCell<Seen>>) {
    let seen = Rc::new(RefCell::new(Seen::default()));
    let ws = WebSocket::connect(reactor, &gateway.url(), Box::new(Recorder(Rc::clone(&seen))))
        .expect("connect");
    (ws, seen)
}

#[test]
fn test_ping_is_answered_with_matching_pong() {
    init_logging();
    let gateway = MockGateway::start(
        |_| {
            vec![
                GatewayAction::Ping(b"are-you-there".to_vec()),
                GatewayAction::Send(json!({"after": "ping"})),
            ]
        },
        |_, _| Vec::new(),
    )
    .expect("gateway");
    let mut reactor = test_reactor();
    let (ws, seen) = connect(&mut reactor, &gateway);

    assert!(drive_until(&mut reactor, WAIT, || !gateway.pongs().is_empty()));
    assert_eq!(gateway.pongs(), vec![(0, b"are-you-there".to_vec())]);

    // control frames never reach the handler
    assert!(drive_until(&mut reactor, WAIT, || !seen.borrow().texts.is_empty()));
    assert_eq!(seen.borrow().texts, vec![r#"{"after":"ping"}"#]);
    assert!(ws.is_open());
    assert!(seen.borrow().closed.is_none());
}

#[test]
fn test_server_close_is_echoed_and_reported() {
    init_logging();
    let gateway = MockGateway::start(|_| vec![GatewayAction::Close(4009)], |_, _| Vec::new())
        .expect("gateway");
    let mut reactor = test_reactor();
    let (ws, seen) = connect(&mut reactor, &gateway);

    assert!(drive_until(&mut reactor, WAIT, || seen.borrow().closed.is_some()));
    assert!(seen.borrow().opened);
    assert_eq!(seen.borrow().closed.as_ref().map(|(status, _)| *status), Some(4009));
    assert!(!ws.is_open());

    assert!(drive_until(&mut reactor, WAIT, || !gateway.close_handshakes().is_empty()));
    assert_eq!(gateway.close_handshakes(), vec![(0, true)]);
}

#[test]
fn test_local_close_reports_local_status() {
    init_logging();
    let gateway = MockGateway::start(|_| vec![GatewayAction::Send(json!({"op": 10}))], |_, _| Vec::new())
        .expect("gateway");
    let mut reactor = test_reactor();
    let (ws, seen) = connect(&mut reactor, &gateway);

    assert!(drive_until(&mut reactor, WAIT, || !seen.borrow().texts.is_empty()));
    ws.close(&mut reactor, 4000, "going away");

    assert!(drive_until(&mut reactor, WAIT, || seen.borrow().closed.is_some()));
    assert_eq!(
        seen.borrow().closed.clone(),
        Some((4000, "going away".to_string()))
    );
}
